//! Named cross-task signals
//!
//! Every wait/notify pair between the event pump, the registry and the
//! measurement loops goes through a [`Signal`] owned by one [`Signals`]
//! context. Components receive the context by `Arc` instead of reaching for
//! process-wide statics.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::trace;

/// A semaphore with an upper bound on pending permits.
///
/// With a limit of one it behaves as a latched one-shot event: any number of
/// `give()` calls before a `take()` collapse into a single pending permit.
#[derive(Debug)]
pub struct Signal {
    name: &'static str,
    sem: Semaphore,
    limit: usize,
    give_lock: Mutex<()>,
}

impl Signal {
    /// One-shot signal (at most one pending permit)
    pub fn binary(name: &'static str) -> Self {
        Self::counting(name, 1)
    }

    /// Counting signal with at most `limit` pending permits
    pub fn counting(name: &'static str, limit: usize) -> Self {
        Self {
            name,
            sem: Semaphore::new(0),
            limit: limit.max(1),
            give_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Release one permit unless the limit is already reached.
    pub fn give(&self) {
        let _guard = self.give_lock.lock();
        if self.sem.available_permits() < self.limit {
            self.sem.add_permits(1);
            trace!("signal {} given", self.name);
        }
    }

    /// Wait forever for a permit and consume it.
    pub async fn take(&self) {
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }

    /// Wait up to `timeout` for a permit. Returns `true` if one was consumed.
    pub async fn take_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.take()).await.is_ok()
    }

    /// Consume a permit if one is pending.
    pub fn try_take(&self) -> bool {
        match self.sem.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Drop any pending permits.
    pub fn reset(&self) {
        while self.try_take() {}
    }

    /// Number of pending permits
    pub fn pending(&self) -> usize {
        self.sem.available_permits()
    }
}

/// The named signals shared by connectivity, registry and session code.
#[derive(Debug)]
pub struct Signals {
    /// Wireless interface reported operational
    pub iface_up: Signal,
    /// Link readiness reached at the level the transport requires
    pub link_ready: Signal,
    /// The current association attempt failed
    pub attempt_failed: Signal,
    /// First peer joined the access point
    pub peer_ready: Signal,
}

impl Signals {
    pub fn new() -> Self {
        Self {
            iface_up: Signal::binary("iface_up"),
            link_ready: Signal::binary("link_ready"),
            attempt_failed: Signal::binary("attempt_failed"),
            peer_ready: Signal::binary("peer_ready"),
        }
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_signal_collapses_gives() {
        let sig = Signal::binary("test");
        sig.give();
        sig.give();
        sig.give();
        assert_eq!(sig.pending(), 1);
        assert!(sig.try_take());
        assert!(!sig.try_take());
    }

    #[test]
    fn test_counting_signal_limit() {
        let sig = Signal::counting("count", 3);
        for _ in 0..5 {
            sig.give();
        }
        assert_eq!(sig.pending(), 3);
        sig.reset();
        assert_eq!(sig.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_timeout_expires() {
        let sig = Signal::binary("never");
        assert!(!sig.take_timeout(Duration::from_millis(500)).await);
        sig.give();
        assert!(sig.take_timeout(Duration::from_millis(500)).await);
    }
}
