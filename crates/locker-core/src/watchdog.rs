//! Background liveness checks for held locks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{Instrument, debug, info_span, warn};

use crate::error::LostReason;
use crate::key::LockKey;
use crate::traits::AcquisitionStrategy;

/// Sender half of a lock's loss signal.
pub(crate) type LostSender = watch::Sender<Option<LostReason>>;

/// Receiver half of a lock's loss signal; holds `Some(reason)` once lost.
pub type LostToken = watch::Receiver<Option<LostReason>>;

/// Resolves once a loss is signalled; pends forever otherwise.
pub(crate) async fn wait_for_loss(lost: &mut LostToken) -> LostReason {
    let reason = match lost.wait_for(Option::is_some).await {
        Ok(reason) => reason.clone(),
        Err(_) => None,
    };
    match reason {
        Some(reason) => reason,
        None => std::future::pending().await,
    }
}

/// Periodically checks that a lock is still held and signals its loss.
///
/// Every check runs while holding the `locked` mutex, and stopping takes the
/// same mutex first. Once [`Watchdog::stop`] returns no loss can be
/// signalled any more.
pub(crate) struct Watchdog {
    locked: Arc<Mutex<bool>>,
    stop_sender: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl Watchdog {
    pub(crate) fn spawn<S: AcquisitionStrategy>(
        strategy: Arc<S>,
        held: Arc<S::Held>,
        key: &LockKey,
        stop_timeout: Duration,
        lost_sender: LostSender,
    ) -> Self {
        let locked = Arc::new(Mutex::new(true));
        let (stop_sender, mut stop_receiver) = oneshot::channel::<()>();
        let every = strategy.watchdog_interval();
        let span = info_span!("watchdog", lock.key = %key, strategy = strategy.kind().as_str());

        let state = locked.clone();
        let task = tokio::spawn(
            async move {
                let mut ticker = interval_at(Instant::now() + every, every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = &mut stop_receiver => break,
                        _ = ticker.tick() => {}
                    }

                    let mut locked = state.lock().await;
                    if !*locked {
                        break;
                    }

                    let reason = match strategy.check(&held).await {
                        Ok(None) => {
                            debug!("lock still held");
                            continue;
                        }
                        Ok(Some(reason)) => reason,
                        Err(e) => LostReason::CheckFailed(e.to_string()),
                    };

                    *locked = false;
                    warn!(%reason, "lock lost");
                    lost_sender.send_replace(Some(reason));
                    break;
                }
            }
            .instrument(span),
        );

        Self {
            locked,
            stop_sender: Some(stop_sender),
            task: Some(task),
            stop_timeout,
        }
    }

    /// Stops the watchdog, waiting for an in-flight check to finish.
    ///
    /// Bounded by the stop timeout; a watchdog that does not stop in time is
    /// aborted. Never fails.
    pub(crate) async fn stop(mut self) {
        let stopped = match timeout(self.stop_timeout, self.locked.lock()).await {
            Ok(mut locked) => {
                *locked = false;
                true
            }
            Err(_) => false,
        };

        if let Some(stop_sender) = self.stop_sender.take() {
            let _ = stop_sender.send(());
        }

        let Some(mut task) = self.task.take() else {
            return;
        };
        if stopped && timeout(self.stop_timeout, &mut task).await.is_ok() {
            return;
        }

        warn!("watchdog did not stop in time, aborting it");
        task.abort();
        let _ = task.await;
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LockError, LockResult};
    use crate::holder::HolderId;
    use crate::options::StrategyKind;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Strategy whose checks fail once `valid` is cleared.
    struct Flaky {
        valid: AtomicBool,
        checks: AtomicU32,
        check_delay: Duration,
        error: bool,
    }

    impl Flaky {
        fn new() -> Self {
            Self {
                valid: AtomicBool::new(true),
                checks: AtomicU32::new(0),
                check_delay: Duration::ZERO,
                error: false,
            }
        }
    }

    impl AcquisitionStrategy for Flaky {
        type Held = ();

        fn kind(&self) -> StrategyKind {
            StrategyKind::SessionScoped
        }

        fn watchdog_interval(&self) -> Duration {
            Duration::from_millis(100)
        }

        async fn try_acquire(&self, _key: &LockKey, _holder: &HolderId) -> LockResult<Option<()>> {
            Ok(Some(()))
        }

        async fn is_still_held(&self, _held: &()) -> LockResult<bool> {
            Ok(self.valid.load(Ordering::SeqCst))
        }

        async fn check(&self, _held: &()) -> LockResult<Option<LostReason>> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.check_delay).await;
            if self.error {
                return Err(LockError::Configuration("check exploded".to_string()));
            }
            Ok((!self.valid.load(Ordering::SeqCst)).then_some(LostReason::Stolen))
        }

        async fn release(&self, _held: &()) -> LockResult<bool> {
            Ok(true)
        }
    }

    fn spawn(strategy: Arc<Flaky>) -> (Watchdog, LostToken) {
        let (sender, receiver) = watch::channel(None);
        let key = LockKey::new("watched").unwrap();
        let watchdog = Watchdog::spawn(strategy, Arc::new(()), &key, Duration::from_secs(1), sender);
        (watchdog, receiver)
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_loss_once() {
        let strategy = Arc::new(Flaky::new());
        let (_watchdog, mut lost) = spawn(strategy.clone());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(lost.borrow().is_none());
        assert_eq!(strategy.checks.load(Ordering::SeqCst), 2);

        strategy.valid.store(false, Ordering::SeqCst);
        lost.changed().await.unwrap();
        assert_eq!(*lost.borrow_and_update(), Some(LostReason::Stolen));

        // the task exits after signalling, so no further checks happen
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(strategy.checks.load(Ordering::SeqCst), 3);
        assert!(!lost.has_changed().unwrap_or(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_error_counts_as_loss() {
        let mut flaky = Flaky::new();
        flaky.error = true;
        let (_watchdog, mut lost) = spawn(Arc::new(flaky));

        let reason = lost.wait_for(Option::is_some).await.unwrap().clone();
        assert!(matches!(reason, Some(LostReason::CheckFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_check() {
        let mut flaky = Flaky::new();
        flaky.check_delay = Duration::from_millis(300);
        let strategy = Arc::new(flaky);
        let (watchdog, lost) = spawn(strategy.clone());

        // first check starts at 100ms and is still running at 150ms
        tokio::time::sleep(Duration::from_millis(150)).await;
        strategy.valid.store(false, Ordering::SeqCst);
        let start = Instant::now();
        watchdog.stop().await;

        // stop waited for the check, which then saw the lock as lost
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(strategy.checks.load(Ordering::SeqCst), 1);
        assert_eq!(*lost.borrow(), Some(LostReason::Stolen));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_signal_after_stop() {
        let strategy = Arc::new(Flaky::new());
        let (watchdog, lost) = spawn(strategy.clone());

        watchdog.stop().await;
        strategy.valid.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(strategy.checks.load(Ordering::SeqCst), 0);
        assert!(lost.borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_check_is_aborted() {
        let mut flaky = Flaky::new();
        flaky.check_delay = Duration::from_secs(3600);
        let strategy = Arc::new(flaky);
        let (watchdog, lost) = spawn(strategy.clone());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let start = Instant::now();
        watchdog.stop().await;

        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(lost.borrow().is_none());
    }
}
