//! Handle to a held lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{instrument, warn};

use crate::error::{LockResult, LostReason};
use crate::holder::HolderId;
use crate::key::LockKey;
use crate::traits::AcquisitionStrategy;
use crate::watchdog::{LostSender, LostToken, Watchdog, wait_for_loss};

/// Handle for a held lock.
///
/// While the handle exists its watchdog (if enabled) keeps checking, or
/// renewing, the lock in the background. Call [`LockHandle::release`] to stop
/// the watchdog and give the lock back. Dropping the handle aborts the
/// watchdog and schedules a best-effort release on the current runtime.
///
/// # Example
///
/// ```rust,ignore
/// if let Some(handle) = runner.acquire("nightly-report").await? {
///     tokio::select! {
///         reason = handle.lost() => eprintln!("lock lost: {reason}"),
///         _ = build_report() => {}
///     }
///     handle.release().await?;
/// }
/// ```
pub struct LockHandle<S: AcquisitionStrategy> {
    strategy: Arc<S>,
    key: LockKey,
    holder: HolderId,
    /// `None` once released.
    held: Option<Arc<S::Held>>,
    sequence: Option<i64>,
    lost_receiver: LostToken,
    /// Kept open when no watchdog owns it, so the token never closes.
    idle_sender: Option<LostSender>,
    watchdog: Option<Watchdog>,
}

impl<S: AcquisitionStrategy> LockHandle<S> {
    pub(crate) fn new(
        strategy: Arc<S>,
        key: LockKey,
        holder: HolderId,
        held: S::Held,
        watchdog_stop_timeout: Option<Duration>,
    ) -> Self {
        let held = Arc::new(held);
        let sequence = strategy.sequence(&held);
        let (lost_sender, lost_receiver) = watch::channel(None);

        let (watchdog, idle_sender) = match watchdog_stop_timeout {
            Some(stop_timeout) => {
                let watchdog = Watchdog::spawn(
                    strategy.clone(),
                    held.clone(),
                    &key,
                    stop_timeout,
                    lost_sender,
                );
                (Some(watchdog), None)
            }
            None => (None, Some(lost_sender)),
        };

        Self {
            strategy,
            key,
            holder,
            held: Some(held),
            sequence,
            lost_receiver,
            idle_sender,
            watchdog,
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    /// Lease sequence captured at acquisition.
    pub fn sequence(&self) -> Option<i64> {
        self.sequence
    }

    /// Receiver that turns `Some(reason)` when the watchdog detects the lock
    /// was lost. Never changes when the watchdog is disabled.
    pub fn lost_token(&self) -> &LostToken {
        &self.lost_receiver
    }

    /// Resolves with the reason once the watchdog reports the lock lost.
    /// Never resolves while the lock stays valid or without a watchdog.
    pub async fn lost(&self) -> LostReason {
        wait_for_loss(&mut self.lost_receiver.clone()).await
    }

    /// Why the lock was lost, if the watchdog has noticed.
    pub fn lost_reason(&self) -> Option<LostReason> {
        self.lost_receiver.borrow().clone()
    }

    /// Strategy-specific state, e.g. the transaction holding a row lock.
    pub fn held(&self) -> Option<&Arc<S::Held>> {
        self.held.as_ref()
    }

    /// Stops the watchdog, then releases the lock.
    ///
    /// Returns false if the backend reports the lock was no longer ours.
    #[instrument(skip(self), fields(lock.key = %self.key, strategy = self.strategy.kind().as_str()))]
    pub async fn release(mut self) -> LockResult<bool> {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop().await;
        }
        self.idle_sender.take();
        let Some(held) = self.held.take() else {
            return Ok(false);
        };
        self.strategy.release(&held).await
    }
}

impl<S: AcquisitionStrategy> Drop for LockHandle<S> {
    fn drop(&mut self) {
        // Watchdog::drop aborts the task
        self.watchdog.take();

        let Some(held) = self.held.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(lock.key = %self.key, "lock handle dropped outside a runtime, lock not released");
            return;
        };
        let strategy = self.strategy.clone();
        let key = self.key.clone();
        runtime.spawn(async move {
            if let Err(e) = strategy.release(&held).await {
                warn!(lock.key = %key, error = %e, "release of dropped lock handle failed");
            }
        });
    }
}
