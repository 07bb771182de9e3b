//! Timed measurement session
//!
//! One session fires the send trigger, sends a unit and waits out the
//! interval in short slices so a stop request is noticed quickly. Only one
//! session runs at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::SessionError;
use crate::transport::{Transport, TransportError};
use crate::trigger::TimingTrigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub duration: Duration,
    pub interval: Duration,
    /// Granularity of stop checks while waiting between sends
    pub slice: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
            interval: Duration::from_millis(100),
            slice: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Ran for the full duration
    Completed,
    /// Stop requested
    Stopped,
    /// Aborted by a send failure
    Error(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub sent: u64,
    /// Units dropped because no send buffer was available
    pub dropped: u64,
    pub outcome: SessionOutcome,
}

impl std::fmt::Display for SessionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "session started {} ran {} ms: {} sent, {} dropped, {:?}",
            self.started_at.format("%H:%M:%S%.3f"),
            self.elapsed_ms,
            self.sent,
            self.dropped,
            self.outcome
        )
    }
}

/// Inbound session control (keyboard, CLI, button)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
}

pub struct SessionController {
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    trigger: Arc<TimingTrigger>,
    config: SessionConfig,
    phase: Mutex<SessionPhase>,
    stop: AtomicBool,
    last_report: Mutex<Option<SessionReport>>,
    /// Task of the session started by `start`
    current: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(transport: Box<dyn Transport>, trigger: Arc<TimingTrigger>, config: SessionConfig) -> Self {
        Self {
            transport: tokio::sync::Mutex::new(transport),
            trigger,
            config,
            phase: Mutex::new(SessionPhase::Idle),
            stop: AtomicBool::new(false),
            last_report: Mutex::new(None),
            current: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    pub fn is_running(&self) -> bool {
        self.phase() == SessionPhase::Running
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Ask the running session to stop at the next slice boundary
    pub fn request_stop(&self) {
        if self.is_running() {
            info!("Stop requested");
        }
        self.stop.store(true, Ordering::SeqCst);
    }

    pub(crate) fn last_report(&self) -> Option<SessionReport> {
        self.last_report.lock().clone()
    }

    /// Claim the Running phase. The stop flag is cleared before the phase
    /// becomes visible, so a stop issued after this returns is never lost.
    fn begin(&self) -> Result<(), SessionError> {
        let mut phase = self.phase.lock();
        if *phase == SessionPhase::Running {
            return Err(SessionError::AlreadyRunning);
        }
        self.stop.store(false, Ordering::SeqCst);
        *phase = SessionPhase::Running;
        Ok(())
    }

    /// Run one session to completion
    pub async fn run(&self) -> Result<SessionReport, SessionError> {
        self.begin()?;
        self.run_claimed().await
    }

    /// Start a session on its own task and return right away
    pub fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        self.begin()?;

        let controller = Arc::clone(self);
        let task = tokio::spawn(async move {
            if let Err(e) = controller.run_claimed().await {
                error!("Session failed: {}", e);
            }
        });
        *self.current.lock() = Some(task);
        Ok(())
    }

    /// Stop the session started by `start`, if any, and wait for its report
    pub async fn finish(&self) -> Option<SessionReport> {
        self.request_stop();
        let task = self.current.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Session task failed: {}", e);
            }
        }
        self.last_report()
    }

    async fn run_claimed(&self) -> Result<SessionReport, SessionError> {
        let result = self.run_loop().await;

        *self.phase.lock() = SessionPhase::Idle;
        if let Ok(report) = &result {
            info!("{}", report);
            *self.last_report.lock() = Some(report.clone());
        }
        result
    }

    async fn run_loop(&self) -> Result<SessionReport, SessionError> {
        let mut transport = self.transport.lock().await;
        transport.open().await?;

        let SessionConfig { duration, interval, slice } = self.config;
        info!(
            "Session start: {} transport, {:?} every {:?}",
            transport.name(),
            duration,
            interval
        );

        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = started + duration;
        let mut sent = 0u64;
        let mut dropped = 0u64;

        let outcome = loop {
            if self.stop.load(Ordering::SeqCst) {
                break SessionOutcome::Stopped;
            }
            let unit_start = Instant::now();
            if unit_start >= deadline {
                break SessionOutcome::Completed;
            }

            self.trigger.fire();
            match transport.send_unit().await {
                Ok(unit) => {
                    sent += 1;
                    debug!("unit {} sent ({} bytes)", unit.index, unit.len);
                }
                Err(TransportError::BufferExhausted { requested }) => {
                    dropped += 1;
                    warn!("No buffer for {} byte unit, dropped", requested);
                }
                Err(e) => {
                    error!("Send failed, aborting session: {}", e);
                    break SessionOutcome::Error(e.to_string());
                }
            }

            let next = (unit_start + interval).min(deadline);
            while !self.stop.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now >= next {
                    break;
                }
                tokio::time::sleep((next - now).min(slice)).await;
            }
        };

        Ok(SessionReport {
            started_at,
            elapsed_ms: started.elapsed().as_millis() as u64,
            sent,
            dropped,
            outcome,
        })
    }

    /// Release the transport for good
    pub async fn shutdown(&self) {
        self.request_stop();
        self.transport.lock().await.close().await;
    }

    /// Serve start/stop commands until the channel closes, then stop any
    /// running session and return its report. Each start runs on its own
    /// task so a stop can reach it.
    pub async fn serve(self: Arc<Self>, mut commands: mpsc::Receiver<SessionCommand>) -> Option<SessionReport> {
        while let Some(command) = commands.recv().await {
            match command {
                SessionCommand::Start => {
                    if let Err(e) = self.start() {
                        warn!("Start ignored: {}", e);
                    }
                }
                SessionCommand::Stop => self.request_stop(),
            }
        }
        debug!("Session command channel closed");
        self.finish().await
    }
}
