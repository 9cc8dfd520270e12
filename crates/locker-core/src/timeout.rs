//! Deadline helpers for the blocking acquire loop.

use std::time::Duration;

use tokio::time::Instant;

/// Represents how long an acquire may keep retrying.
///
/// - `Some(duration)` - Give up once this much time has passed
/// - `None` - Retry indefinitely
pub type Timeout = Option<Duration>;

/// Absolute point in time after which a blocking acquire gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub const NEVER: Self = Self { at: None };

    /// Starts a deadline `timeout` from now.
    pub fn after(timeout: Timeout) -> Self {
        Self {
            at: timeout.map(|d| Instant::now() + d),
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.at.is_none()
    }

    pub fn has_elapsed(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before the deadline, `None` when infinite.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Caps a sleep so the loop wakes up no later than the deadline.
    pub fn clamp(&self, sleep: Duration) -> Duration {
        match self.remaining() {
            Some(left) => sleep.min(left),
            None => sleep,
        }
    }
}

impl From<Timeout> for Deadline {
    fn from(timeout: Timeout) -> Self {
        Self::after(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let deadline = Deadline::after(Some(Duration::from_secs(1)));
        assert!(!deadline.has_elapsed());
        assert_eq!(deadline.clamp(Duration::from_secs(5)), Duration::from_secs(1));

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(deadline.has_elapsed());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_never_deadline() {
        let deadline = Deadline::from(None);
        assert!(deadline.is_infinite());
        assert!(!deadline.has_elapsed());
        assert_eq!(deadline.clamp(Duration::from_millis(5)), Duration::from_millis(5));
    }
}
