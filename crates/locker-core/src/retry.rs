//! The blocking acquire loop shared by every strategy.

use std::future::Future;

use tracing::debug;

use crate::error::LockResult;
use crate::options::AcquireOptions;
use crate::timeout::Deadline;

/// Decides whether another acquisition attempt should be made.
///
/// Non-blocking loops never retry. Blocking loops sleep for the spin
/// interval (cut short by the deadline) and retry until the deadline passes.
#[derive(Debug)]
pub struct RetryLoop {
    options: AcquireOptions,
    deadline: Deadline,
    attempts: u32,
}

impl RetryLoop {
    pub fn new(options: &AcquireOptions) -> Self {
        let deadline = if options.blocking {
            Deadline::after(options.block_timeout)
        } else {
            Deadline::NEVER
        };
        Self {
            options: *options,
            deadline,
            attempts: 1,
        }
    }

    /// Number of attempts made so far, counting the first.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Waits before the next attempt; returns false when the loop should give up.
    pub async fn next_attempt(&mut self) -> bool {
        if !self.options.blocking || self.deadline.has_elapsed() {
            debug!(attempts = self.attempts, "lock not obtained");
            return false;
        }
        tokio::time::sleep(self.deadline.clamp(self.options.spin_interval)).await;
        self.attempts += 1;
        true
    }
}

/// Runs `attempt` until it yields a held lock or the loop gives up.
pub async fn acquire_with_retry<T, F, Fut>(
    options: &AcquireOptions,
    mut attempt: F,
) -> LockResult<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LockResult<Option<T>>>,
{
    let mut retry = RetryLoop::new(options);
    loop {
        if let Some(held) = attempt().await? {
            debug!(attempts = retry.attempts(), "lock acquired");
            return Ok(Some(held));
        }
        if !retry.next_attempt().await {
            return Ok(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_non_blocking_tries_once() {
        let calls = AtomicU32::new(0);
        let result: Option<()> = acquire_with_retry(&AcquireOptions::non_blocking(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(None) }
        })
        .await
        .unwrap();
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_retries_until_success() {
        let calls = AtomicU32::new(0);
        let options = AcquireOptions::blocking(None, Duration::from_millis(500));
        let start = Instant::now();
        let result = acquire_with_retry(&options, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok((n == 3).then_some(n)) }
        })
        .await
        .unwrap();
        assert_eq!(result, Some(3));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_gives_up_at_deadline() {
        let options =
            AcquireOptions::blocking(Some(Duration::from_secs(1)), Duration::from_millis(300));
        let start = Instant::now();
        let result: Option<()> = acquire_with_retry(&options, || async { Ok(None) })
            .await
            .unwrap();
        assert!(result.is_none());
        // three full spins, a clamped one, then the last attempt at the deadline
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_stop_the_loop() {
        let options = AcquireOptions::blocking(None, Duration::from_millis(10));
        let result: LockResult<Option<()>> = acquire_with_retry(&options, || async {
            Err(crate::LockError::Configuration("boom".to_string()))
        })
        .await;
        assert!(result.is_err());
    }
}
