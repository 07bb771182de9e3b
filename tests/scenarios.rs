//! End-to-end scenarios on virtual time: sessions, receive classification,
//! soft-AP gating and connection retry.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use wlatency::codec::{Classification, FrameBuilder, TestFrameTemplate};
use wlatency::link::{
    AccessPointSettings, ConnectionState, ConnectivityStateMachine, LinkControl, LinkError, LinkEvent,
    ReadinessLevel, RetryBudget, StationRegistry,
};
use wlatency::session::{CaptureLoop, SessionConfig, SessionController, SessionOutcome};
use wlatency::signal::Signals;
use wlatency::transport::{loopback_pair, RawTransport};
use wlatency::trigger::{LogPulse, TimingTrigger, TriggerRole};
use wlatency::wireless::MacAddr;

fn trigger(role: TriggerRole) -> Arc<TimingTrigger> {
    Arc::new(TimingTrigger::current(
        role,
        Arc::new(LogPulse::new(role.to_string())),
        Duration::from_millis(50),
    ))
}

/// Link whose association attempts always fail, or that does nothing
struct TestLink {
    events: mpsc::Sender<LinkEvent>,
    fail: bool,
    connects: AtomicU32,
}

#[async_trait]
impl LinkControl for TestLink {
    async fn check_interface(&self) -> Result<(), LinkError> {
        Ok(())
    }

    async fn connect(&self, attempt: u32) -> Result<(), LinkError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            let failed = LinkEvent::AttemptResult {
                attempt,
                associated: false,
                reason: 2,
            };
            let _ = self.events.send(failed).await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        Ok(())
    }

    async fn start_access_point(&self, _settings: &AccessPointSettings) -> Result<(), LinkError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn ten_second_session_delivers_ten_matching_frames() {
    let (sink, source) = loopback_pair(64);
    let tx_trigger = trigger(TriggerRole::Send);
    let rx_trigger = trigger(TriggerRole::Receive);

    let controller = SessionController::new(
        Box::new(RawTransport::new(FrameBuilder::new(TestFrameTemplate::default()), Box::new(sink))),
        Arc::clone(&tx_trigger),
        SessionConfig {
            duration: Duration::from_millis(10_000),
            interval: Duration::from_millis(1000),
            slice: Duration::from_millis(10),
        },
    );

    let report = controller.run().await.unwrap();
    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.sent, 10);
    assert_eq!(tx_trigger.fire_count(), 10);

    let receiver = CaptureLoop::new(
        Default::default(),
        wlatency::app::loopback_prefix(Default::default()),
        Arc::clone(&rx_trigger),
    );
    let sequences: Vec<u16> = source
        .drain()
        .iter()
        .map(|frame| match receiver.handle(frame) {
            Classification::Match { sequence, .. } => sequence,
            other => panic!("unexpected {:?}", other),
        })
        .collect();

    assert_eq!(sequences, (1..=10).collect::<Vec<u16>>());
    assert_eq!(receiver.stats().matches, 10);
    assert_eq!(rx_trigger.fire_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn soft_ap_receiver_waits_for_first_join_only() {
    let signals = Arc::new(Signals::new());
    let (events_tx, events_rx) = mpsc::channel(16);
    let registry = Arc::new(StationRegistry::new(
        4,
        Ipv4Addr::new(192, 168, 1, 2),
        Duration::from_millis(500),
        Arc::clone(&signals),
    ));
    let machine = Arc::new(
        ConnectivityStateMachine::new(
            Arc::new(TestLink {
                events: events_tx.clone(),
                fail: false,
                connects: AtomicU32::new(0),
            }),
            Arc::clone(&signals),
            RetryBudget::default(),
            ReadinessLevel::AddressBound,
        )
        .with_registry(Arc::clone(&registry)),
    );
    machine.spawn_event_pump(events_rx);

    let starts = Arc::new(AtomicU32::new(0));
    let receiver = {
        let signals = Arc::clone(&signals);
        let starts = Arc::clone(&starts);
        tokio::spawn(async move {
            signals.peer_ready.take().await;
            starts.fetch_add(1, Ordering::SeqCst);
        })
    };

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(starts.load(Ordering::SeqCst), 0);

    let first = MacAddr::new([0x02, 0, 0, 0, 0, 1]);
    let second = MacAddr::new([0x02, 0, 0, 0, 0, 2]);
    events_tx.send(LinkEvent::PeerJoined(first)).await.unwrap();
    receiver.await.unwrap();
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    events_tx.send(LinkEvent::PeerJoined(second)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(signals.peer_ready.pending(), 0);

    let stations = registry.stations();
    assert_eq!(stations.len(), 2);
    assert_eq!(stations[0].address, Some(Ipv4Addr::new(192, 168, 1, 2)));
    assert_eq!(stations[1].address, Some(Ipv4Addr::new(192, 168, 1, 3)));

    // Leaving peers do not disturb the rest of the registry
    events_tx.send(LinkEvent::PeerLeft(first)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(registry.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_request_ends_session_within_one_slice() {
    let (sink, _source) = loopback_pair(64);
    let slice = Duration::from_millis(10);
    let controller = Arc::new(SessionController::new(
        Box::new(RawTransport::new(FrameBuilder::new(TestFrameTemplate::default()), Box::new(sink))),
        trigger(TriggerRole::Send),
        SessionConfig {
            duration: Duration::from_millis(10_000),
            interval: Duration::from_millis(1000),
            slice,
        },
    ));

    let running = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.run().await }
    });

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let stop_at = tokio::time::Instant::now();
    controller.request_stop();

    let report = running.await.unwrap().unwrap();
    assert!(stop_at.elapsed() <= slice);
    assert_eq!(report.outcome, SessionOutcome::Stopped);
    assert_eq!(report.sent, 3);
}

#[tokio::test(start_paused = true)]
async fn connect_with_retry_gives_up_after_budget() {
    let (events_tx, events_rx) = mpsc::channel(16);
    let link = Arc::new(TestLink {
        events: events_tx,
        fail: true,
        connects: AtomicU32::new(0),
    });
    let machine = Arc::new(
        ConnectivityStateMachine::new(
            link.clone(),
            Arc::new(Signals::new()),
            RetryBudget::new(3, Duration::from_secs(5)),
            ReadinessLevel::AddressBound,
        )
        .with_backoff(Duration::from_secs(1)),
    );
    machine.spawn_event_pump(events_rx);

    let err = machine.connect_with_retry(Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, LinkError::ConnectionExhausted { attempts: 3 }));
    assert_eq!(link.connects.load(Ordering::SeqCst), 3);
    assert_eq!(machine.state(), ConnectionState::Failed);
}
