//! Connection state, retry budget and readiness levels

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Retry budget exhausted; no further automatic attempts
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What "ready" means for the transport in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadinessLevel {
    /// Association alone is enough (raw frames need no addressing)
    #[default]
    LinkOnly,
    /// Association plus a bound network address
    AddressBound,
}

/// Bounded count of failed association attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    attempts: u32,
    max: u32,
    attempt_timeout: Duration,
}

impl RetryBudget {
    pub const DEFAULT_MAX: u32 = 3;

    pub fn new(max: u32, attempt_timeout: Duration) -> Self {
        Self {
            attempts: 0,
            max: max.max(1),
            attempt_timeout,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max
    }

    /// Count one failure. Returns `true` if that used up the budget.
    pub fn record_failure(&mut self) -> bool {
        self.attempts = self.attempts.saturating_add(1).min(self.max);
        self.is_exhausted()
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX, Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhaustion() {
        let mut budget = RetryBudget::new(3, Duration::from_secs(1));
        assert!(!budget.record_failure());
        assert!(!budget.record_failure());
        assert!(budget.record_failure());
        assert!(budget.is_exhausted());

        // Saturates at the maximum
        assert!(budget.record_failure());
        assert_eq!(budget.attempts(), 3);

        budget.reset();
        assert_eq!(budget.attempts(), 0);
        assert!(!budget.is_exhausted());
    }

    #[test]
    fn test_zero_max_clamped() {
        let budget = RetryBudget::new(0, Duration::from_secs(1));
        assert_eq!(budget.max(), 1);
    }
}
