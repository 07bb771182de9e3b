//! Timing trigger
//!
//! A trigger drives an output high on `fire()` and clears it after a fixed
//! pulse width. The external timing instrument measures the interval between
//! the TX pulse on one board and the RX pulse on the other.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default pulse width
pub const DEFAULT_PULSE_WIDTH: Duration = Duration::from_millis(50);

/// Which side of the measurement a trigger marks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerRole {
    Send,
    Receive,
}

impl std::fmt::Display for TriggerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerRole::Send => write!(f, "tx"),
            TriggerRole::Receive => write!(f, "rx"),
        }
    }
}

/// A physical (or logged) signal line.
pub trait PulseOutput: Send + Sync {
    fn set_level(&self, high: bool) -> std::io::Result<()>;
}

/// Output that only logs level changes.
#[derive(Debug, Default)]
pub struct LogPulse {
    label: String,
}

impl LogPulse {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl PulseOutput for LogPulse {
    fn set_level(&self, high: bool) -> std::io::Result<()> {
        debug!("pulse {} -> {}", self.label, if high { "high" } else { "low" });
        Ok(())
    }
}

/// LED or GPIO exposed through a sysfs brightness/value file.
#[derive(Debug)]
pub struct SysfsLed {
    path: PathBuf,
}

impl SysfsLed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PulseOutput for SysfsLed {
    fn set_level(&self, high: bool) -> std::io::Result<()> {
        fs::write(&self.path, if high { b"1" } else { b"0" })
    }
}

/// Fire-and-auto-clear trigger. Re-firing while a pulse is active restarts
/// the clear timer instead of queuing a second pulse.
pub struct TimingTrigger {
    role: TriggerRole,
    output: Arc<dyn PulseOutput>,
    width: Duration,
    runtime: Handle,
    clear_task: Mutex<Option<JoinHandle<()>>>,
    fires: AtomicU64,
}

impl TimingTrigger {
    pub fn new(role: TriggerRole, output: Arc<dyn PulseOutput>, width: Duration, runtime: Handle) -> Self {
        Self {
            role,
            output,
            width,
            runtime,
            clear_task: Mutex::new(None),
            fires: AtomicU64::new(0),
        }
    }

    /// Build a trigger on the current tokio runtime.
    ///
    /// Panics when called outside a runtime, like `tokio::spawn`.
    pub fn current(role: TriggerRole, output: Arc<dyn PulseOutput>, width: Duration) -> Self {
        Self::new(role, output, width, Handle::current())
    }

    /// Assert the output and (re)arm the clear timer. Never blocks.
    pub fn fire(&self) {
        if let Err(e) = self.output.set_level(true) {
            warn!("{} trigger: failed to raise output: {}", self.role, e);
        }
        self.fires.fetch_add(1, Ordering::Relaxed);

        let output = Arc::clone(&self.output);
        let width = self.width;
        let role = self.role;

        let mut slot = self.clear_task.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(self.runtime.spawn(async move {
            tokio::time::sleep(width).await;
            if let Err(e) = output.set_level(false) {
                warn!("{} trigger: failed to clear output: {}", role, e);
            }
        }));
    }

    pub fn role(&self) -> TriggerRole {
        self.role
    }

    pub fn pulse_width(&self) -> Duration {
        self.width
    }

    /// Number of times `fire()` was called
    pub fn fire_count(&self) -> u64 {
        self.fires.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for TimingTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingTrigger")
            .field("role", &self.role)
            .field("width", &self.width)
            .field("fires", &self.fire_count())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records every level change
    #[derive(Default)]
    pub(crate) struct RecordingPulse {
        pub levels: Mutex<Vec<bool>>,
    }

    impl PulseOutput for RecordingPulse {
        fn set_level(&self, high: bool) -> std::io::Result<()> {
            self.levels.lock().push(high);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_auto_clears() {
        let out = Arc::new(RecordingPulse::default());
        let trigger = TimingTrigger::current(TriggerRole::Send, out.clone(), Duration::from_millis(50));

        trigger.fire();
        assert_eq!(*out.levels.lock(), vec![true]);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*out.levels.lock(), vec![true, false]);
        assert_eq!(trigger.fire_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refire_restarts_timer() {
        let out = Arc::new(RecordingPulse::default());
        let trigger = TimingTrigger::current(TriggerRole::Receive, out.clone(), Duration::from_millis(50));

        trigger.fire();
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.fire();

        // 60ms after the first fire the restarted pulse is still high
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*out.levels.lock(), vec![true, true]);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*out.levels.lock(), vec![true, true, false]);
        assert_eq!(trigger.fire_count(), 2);
    }

    #[test]
    fn test_sysfs_led_writes_levels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brightness");
        let led = SysfsLed::new(&path);

        led.set_level(true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1");
        led.set_level(false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0");
    }
}
