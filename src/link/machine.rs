//! Connectivity state machine
//!
//! Single owner of [`ConnectionState`] and the [`RetryBudget`]. Events from
//! the platform back-end are dispatched through [`handle_event`]; waiters use
//! the shared [`Signals`].
//!
//! [`handle_event`]: ConnectivityStateMachine::handle_event

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::LinkControl;
use super::events::LinkEvent;
use super::registry::StationRegistry;
use super::state::{ConnectionState, ReadinessLevel, RetryBudget};
use super::LinkError;
use crate::signal::Signals;

/// Pause between association attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    budget: RetryBudget,
    readiness: ReadinessLevel,
    address: Option<IpAddr>,
    /// Number of the latest association attempt; results for older ones are stale
    attempt: u32,
}

pub struct ConnectivityStateMachine {
    inner: Mutex<Inner>,
    link: Arc<dyn LinkControl>,
    signals: Arc<Signals>,
    registry: Option<Arc<StationRegistry>>,
    backoff: Duration,
}

impl ConnectivityStateMachine {
    pub fn new(
        link: Arc<dyn LinkControl>,
        signals: Arc<Signals>,
        budget: RetryBudget,
        readiness: ReadinessLevel,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                budget,
                readiness,
                address: None,
                attempt: 0,
            }),
            link,
            signals,
            registry: None,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Forward peer join/leave events to `registry`
    pub fn with_registry(mut self, registry: Arc<StationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn attempts(&self) -> u32 {
        self.inner.lock().budget.attempts()
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.inner.lock().address
    }

    pub fn readiness(&self) -> ReadinessLevel {
        self.inner.lock().readiness
    }

    pub fn set_readiness(&self, level: ReadinessLevel) {
        self.inner.lock().readiness = level;
    }

    pub fn signals(&self) -> &Arc<Signals> {
        &self.signals
    }

    pub fn registry(&self) -> Option<&Arc<StationRegistry>> {
        self.registry.as_ref()
    }

    /// Start one association attempt
    pub async fn request_connect(&self) -> Result<(), LinkError> {
        self.link.check_interface().await?;
        let attempt = {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Connecting;
            inner.address = None;
            inner.attempt = inner.attempt.wrapping_add(1);
            inner.attempt
        };
        self.link.connect(attempt).await
    }

    /// Result reported by the back-end for association attempt `attempt`.
    /// Results of superseded attempts are dropped.
    pub fn on_attempt_result(&self, attempt: u32, associated: bool, reason: u16) {
        let current = self.inner.lock().attempt;
        if attempt != current {
            debug!(
                "Dropping result of stale attempt {} (current {}, associated={})",
                attempt, current, associated
            );
            return;
        }
        self.on_l2_result(associated, reason);
    }

    /// Outcome of an association attempt
    pub fn on_l2_result(&self, success: bool, reason: u16) {
        let mut inner = self.inner.lock();

        if success {
            info!("Link associated");
            inner.state = ConnectionState::Connected;
            if inner.readiness == ReadinessLevel::LinkOnly {
                inner.budget.reset();
                drop(inner);
                self.signals.link_ready.give();
            }
            return;
        }

        let exhausted = inner.budget.record_failure();
        inner.state = if exhausted {
            ConnectionState::Failed
        } else {
            ConnectionState::Disconnected
        };
        warn!(
            "Association failed (reason {}), attempt {}/{}",
            reason,
            inner.budget.attempts(),
            inner.budget.max()
        );
        drop(inner);
        self.signals.attempt_failed.give();
    }

    /// Network address acquired. Ignored unless associated.
    pub fn on_l3_bound(&self, addr: IpAddr) {
        let mut inner = self.inner.lock();

        if inner.state != ConnectionState::Connected {
            warn!("Address {} bound while {}, ignoring", addr, inner.state);
            return;
        }

        info!("Address bound: {}", addr);
        inner.address = Some(addr);
        if inner.readiness == ReadinessLevel::AddressBound {
            inner.budget.reset();
            drop(inner);
            self.signals.link_ready.give();
        }
    }

    /// Link lost. While an attempt is pending this counts as a failed attempt.
    pub fn on_disconnect(&self, reason: u16) {
        let state = self.inner.lock().state;
        match state {
            ConnectionState::Disconnected | ConnectionState::Failed => {
                debug!("Disconnect (reason {}) while {}, ignoring", reason, state);
            }
            ConnectionState::Connecting => self.on_l2_result(false, reason),
            ConnectionState::Connected => {
                let mut inner = self.inner.lock();
                inner.state = ConnectionState::Disconnected;
                inner.address = None;
                warn!("Link lost (reason {})", reason);
            }
        }
    }

    pub fn handle_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::InterfaceUp => {
                info!("Interface up");
                self.signals.iface_up.give();
            }
            LinkEvent::InterfaceDown => warn!("Interface down"),
            LinkEvent::Associated => self.on_l2_result(true, 0),
            LinkEvent::AssociationFailed { reason } => self.on_l2_result(false, reason),
            LinkEvent::AttemptResult {
                attempt,
                associated,
                reason,
            } => self.on_attempt_result(attempt, associated, reason),
            LinkEvent::Disconnected { reason } => self.on_disconnect(reason),
            LinkEvent::AddressBound { addr } => self.on_l3_bound(addr),
            LinkEvent::PeerJoined(mac) => match &self.registry {
                Some(registry) => {
                    registry.on_peer_join(mac);
                }
                None => debug!("Peer {} joined with no registry attached", mac),
            },
            LinkEvent::PeerLeft(mac) => {
                if let Some(registry) = &self.registry {
                    registry.on_peer_leave(mac);
                }
            }
        }
    }

    /// Dispatch events from `events` until the channel closes
    pub fn spawn_event_pump(self: &Arc<Self>, mut events: mpsc::Receiver<LinkEvent>) -> JoinHandle<()> {
        let machine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                machine.handle_event(event);
            }
            debug!("Link event stream closed");
        })
    }

    fn record_timeout(&self) -> bool {
        let mut inner = self.inner.lock();
        let exhausted = inner.budget.record_failure();
        inner.state = if exhausted {
            ConnectionState::Failed
        } else {
            ConnectionState::Disconnected
        };
        exhausted
    }

    fn is_exhausted(&self) -> bool {
        self.inner.lock().budget.is_exhausted()
    }

    /// Connect and wait for readiness at the configured level, retrying with
    /// a fixed backoff until the budget runs out.
    pub async fn connect_with_retry(&self, timeout: Duration) -> Result<(), LinkError> {
        self.signals.link_ready.reset();
        self.signals.attempt_failed.reset();
        self.inner.lock().budget.reset();

        loop {
            match self.request_connect().await {
                Err(LinkError::NoInterface) => return Err(LinkError::NoInterface),
                Err(e) => {
                    warn!("Could not start association: {}", e);
                    self.record_timeout();
                }
                Ok(()) => {
                    tokio::select! {
                        _ = self.signals.link_ready.take() => {
                            info!("Link ready ({:?})", self.readiness());
                            return Ok(());
                        }
                        _ = self.signals.attempt_failed.take() => {}
                        _ = tokio::time::sleep(timeout) => {
                            warn!("No readiness within {:?}", timeout);
                            self.record_timeout();
                        }
                    }
                }
            }

            if self.is_exhausted() {
                let attempts = self.attempts();
                self.inner.lock().state = ConnectionState::Failed;
                return Err(LinkError::ConnectionExhausted { attempts });
            }

            tokio::time::sleep(self.backoff).await;
            self.signals.attempt_failed.reset();
        }
    }

    /// Wait for the interface to report up
    pub async fn wait_interface_up(&self, timeout: Duration) -> Result<(), LinkError> {
        if self.signals.iface_up.take_timeout(timeout).await {
            Ok(())
        } else {
            Err(LinkError::Timeout("interface up"))
        }
    }

    /// Leave the network; later disconnect events are no-ops
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Disconnected;
            inner.address = None;
        }
        self.link.disconnect().await
    }
}

impl std::fmt::Debug for ConnectivityStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityStateMachine")
            .field("inner", &*self.inner.lock())
            .field("backoff", &self.backoff)
            .finish()
    }
}
