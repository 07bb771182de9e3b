//! Role wiring
//!
//! Builds the link, transport, trigger and session pieces for the sending
//! or receiving endpoint from a [`Config`] and runs them.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::codec::{CapturePrefix, FrameBuilder, TxEncapsulation, RAW_PRE_HEADER_LEN};
use crate::config::{Config, PacketType, RxMode, TriggerOutput};
use crate::error::{LatencyError, Result};
use crate::link::{
    CommandLink, ConnectivityStateMachine, LinkControl, LinkError, LinkEvent, ReadinessLevel,
    StationRegistry,
};
use crate::session::{
    run_udp_receiver, CaptureCounts, CaptureLoop, SessionCommand, SessionController, SessionReport,
};
use crate::signal::Signals;
use crate::transport::{loopback_pair, RawTransport, Transport, UdpClient, UdpServer};
use crate::trigger::{LogPulse, PulseOutput, SysfsLed, TimingTrigger, TriggerRole};
use crate::wireless::{CaptureConfig, InterfaceMode, PcapCapture, PcapInjector, WirelessInterface};

const EVENT_QUEUE: usize = 64;
const OPERSTATE_POLL: Duration = Duration::from_millis(500);

/// Trigger for `role` as configured
pub fn build_trigger(config: &Config, role: TriggerRole) -> Arc<TimingTrigger> {
    let output: Arc<dyn PulseOutput> = match config.trigger.output {
        TriggerOutput::Log => Arc::new(LogPulse::new(role.to_string())),
        TriggerOutput::Sysfs => {
            let path = match role {
                TriggerRole::Send => &config.trigger.tx_path,
                TriggerRole::Receive => &config.trigger.rx_path,
            };
            Arc::new(SysfsLed::new(path.clone()))
        }
    };
    Arc::new(TimingTrigger::current(
        role,
        output,
        Duration::from_millis(config.trigger.pulse_width_ms),
    ))
}

/// Link pieces shared by every role
struct LinkStack {
    interface: WirelessInterface,
    link: Arc<CommandLink>,
    machine: Arc<ConnectivityStateMachine>,
    signals: Arc<Signals>,
}

impl LinkStack {
    fn start(
        config: &Config,
        readiness: ReadinessLevel,
        with_registry: bool,
        signals: Arc<Signals>,
    ) -> Result<Self> {
        let interface =
            WirelessInterface::resolve(config.general.interface.as_deref()).map_err(LinkError::from)?;
        info!("Using wireless interface {}", interface.name);

        let (events_tx, events_rx) = mpsc::channel::<LinkEvent>(EVENT_QUEUE);
        let link = Arc::new(
            CommandLink::new(&interface.name, config.station_credentials(), events_tx)
                .with_attempt_timeout(Duration::from_secs(config.connection.attempt_timeout_secs)),
        );

        let mut machine = ConnectivityStateMachine::new(
            link.clone(),
            Arc::clone(&signals),
            config.retry_budget(),
            readiness,
        )
        .with_backoff(Duration::from_millis(config.connection.backoff_ms));
        if with_registry {
            let ap = &config.access_point;
            let registry = StationRegistry::new(
                ap.capacity,
                ap.pool_start,
                Duration::from_millis(ap.settle_delay_ms),
                Arc::clone(&signals),
            )
            .with_lease_file(config.lease_file(&interface.name));
            machine = machine.with_registry(Arc::new(registry));
        }
        let machine = Arc::new(machine);

        machine.spawn_event_pump(events_rx);
        link.spawn_operstate_watch(OPERSTATE_POLL);

        Ok(Self {
            interface,
            link,
            machine,
            signals,
        })
    }

    /// Monitor mode on the configured channel, then wait for the interface
    fn prepare_monitor(&mut self, config: &Config) -> Result<()> {
        if let Some(country) = &config.general.country {
            self.interface.set_reg_domain(country).map_err(LinkError::from)?;
        }
        self.interface.set_mode(InterfaceMode::Monitor).map_err(LinkError::from)?;
        self.interface.set_channel(config.raw.channel).map_err(LinkError::from)?;
        Ok(())
    }

    async fn wait_up(&self, config: &Config) -> Result<()> {
        let timeout = Duration::from_secs(config.general.iface_up_timeout_secs);
        self.machine.wait_interface_up(timeout).await?;
        Ok(())
    }

    async fn connect(&self, config: &Config) -> Result<()> {
        let timeout = Duration::from_secs(config.connection.attempt_timeout_secs);
        self.machine.connect_with_retry(timeout).await?;
        Ok(())
    }
}

/// Sending endpoint: one session right away, then one per start command.
/// Returns the report of the last session once the command channel closes.
pub async fn run_tx(config: &Config, commands: mpsc::Receiver<SessionCommand>) -> Result<Option<SessionReport>> {
    let signals = Arc::new(Signals::new());

    let (transport, stack): (Box<dyn Transport>, LinkStack) = match config.general.packet_type {
        PacketType::Raw => {
            let template = config
                .injection_template()
                .map_err(|e| LatencyError::Config(e.to_string()))?;
            let mut stack = LinkStack::start(config, ReadinessLevel::LinkOnly, false, signals)?;
            stack.prepare_monitor(config)?;
            stack.wait_up(config).await?;
            let injector = PcapInjector::open(&stack.interface.name)?;
            let builder = FrameBuilder::new(template);
            (Box::new(RawTransport::new(builder, Box::new(injector))), stack)
        }
        PacketType::Udp => {
            let client = UdpClient::new(config.udp.target);
            let stack = LinkStack::start(config, client.readiness(), false, signals)?;
            stack.connect(config).await?;
            (Box::new(client), stack)
        }
    };

    let controller = Arc::new(SessionController::new(
        transport,
        build_trigger(config, TriggerRole::Send),
        config.session(),
    ));

    // Commands are served while the first session runs so a stop reaches it
    controller.start()?;
    let report = Arc::clone(&controller).serve(commands).await;
    controller.shutdown().await;

    if config.general.packet_type == PacketType::Udp {
        if let Err(e) = stack.machine.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
    }
    Ok(report)
}

/// Receiving endpoint; runs until `stop` is set
pub async fn run_rx(config: &Config, stop: Arc<AtomicBool>) -> Result<CaptureCounts> {
    let signals = Arc::new(Signals::new());
    let trigger = build_trigger(config, TriggerRole::Receive);

    match (config.general.packet_type, config.general.rx_mode) {
        (PacketType::Raw, RxMode::Monitor) => {
            let mut stack = LinkStack::start(config, ReadinessLevel::LinkOnly, false, signals)?;
            stack.prepare_monitor(config)?;
            stack.wait_up(config).await?;
            run_capture(config, &stack.interface.name, trigger, stop).await
        }
        (PacketType::Raw, RxMode::Promiscuous) => {
            let stack = LinkStack::start(config, ReadinessLevel::LinkOnly, false, signals)?;
            stack.connect(config).await?;
            run_capture(config, &stack.interface.name, trigger, stop).await
        }
        (PacketType::Udp, RxMode::SoftAp) => {
            let ap = &config.access_point;
            let stack = LinkStack::start(config, ReadinessLevel::AddressBound, true, signals)?;
            stack.link.start_access_point(&config.access_point_settings()).await?;
            let _monitor = stack.link.spawn_iw_monitor()?;

            info!("Waiting for the first station to join {}", ap.ssid);
            stack.signals.peer_ready.take().await;
            run_datagrams(config, trigger, stop).await
        }
        (PacketType::Udp, RxMode::Station) => {
            let stack = LinkStack::start(config, ReadinessLevel::AddressBound, false, signals)?;
            stack.connect(config).await?;
            run_datagrams(config, trigger, stop).await
        }
        (packet_type, rx_mode) => Err(LatencyError::Config(format!(
            "rx_mode {:?} cannot receive {:?} packets",
            rx_mode, packet_type
        ))),
    }
}

async fn run_capture(
    config: &Config,
    interface: &str,
    trigger: Arc<TimingTrigger>,
    stop: Arc<AtomicBool>,
) -> Result<CaptureCounts> {
    let capture = PcapCapture::open(
        CaptureConfig::for_interface(interface)
            .with_read_timeout(Duration::from_millis(config.raw.capture_timeout_ms)),
    )?;

    let capture_loop = Arc::new(CaptureLoop::new(config.classifier(), config.raw.capture_prefix, trigger));
    Arc::clone(&capture_loop)
        .spawn(Box::new(capture), stop)
        .await
        .map_err(|e| LatencyError::Task(e.to_string()))??;
    Ok(capture_loop.stats())
}

async fn run_datagrams(config: &Config, trigger: Arc<TimingTrigger>, stop: Arc<AtomicBool>) -> Result<CaptureCounts> {
    let server = UdpServer::bind(config.udp.listen).await?;
    let timeout = Duration::from_millis(config.udp.recv_timeout_ms);
    Ok(run_udp_receiver(&server, &trigger, &stop, timeout).await?)
}

/// Result of an in-process TX to RX run
#[derive(Debug, Clone)]
pub struct DryRunSummary {
    pub report: SessionReport,
    pub capture: CaptureCounts,
    pub tx_pulses: u64,
    pub rx_pulses: u64,
}

/// Capture prefix seen by a receiver of frames built with `encapsulation`
pub fn loopback_prefix(encapsulation: TxEncapsulation) -> CapturePrefix {
    match encapsulation {
        TxEncapsulation::DriverPreHeader => CapturePrefix::Fixed(RAW_PRE_HEADER_LEN),
        TxEncapsulation::Radiotap => CapturePrefix::Radiotap,
    }
}

/// One raw session through the loopback path, no radio involved
pub async fn dry_run(config: &Config) -> Result<DryRunSummary> {
    let template = config.frame_template();
    let prefix = loopback_prefix(template.encapsulation);
    let (sink, source) = loopback_pair(1024);

    let tx_trigger = build_trigger(config, TriggerRole::Send);
    let rx_trigger = build_trigger(config, TriggerRole::Receive);

    let capture_loop = Arc::new(CaptureLoop::new(config.classifier(), prefix, Arc::clone(&rx_trigger)));
    let stop = Arc::new(AtomicBool::new(false));
    let receiver = Arc::clone(&capture_loop).spawn(
        Box::new(source.with_timeout(Duration::from_millis(100))),
        stop,
    );

    let controller = SessionController::new(
        Box::new(RawTransport::new(FrameBuilder::new(template), Box::new(sink))),
        Arc::clone(&tx_trigger),
        config.session(),
    );
    let report = controller.run().await?;
    // Dropping the sink ends the capture loop once the queue is drained
    controller.shutdown().await;

    receiver
        .await
        .map_err(|e| LatencyError::Task(e.to_string()))??;

    let capture = capture_loop.stats();
    if capture.matches != report.sent {
        warn!("{} frames sent but {} matched", report.sent, capture.matches);
    }

    Ok(DryRunSummary {
        report,
        capture,
        tx_pulses: tx_trigger.fire_count(),
        rx_pulses: rx_trigger.fire_count(),
    })
}
