//! The acquisition strategy contract.

use std::future::Future;
use std::time::Duration;

use crate::error::{LockResult, LostReason};
use crate::holder::HolderId;
use crate::key::LockKey;
use crate::options::{AcquireOptions, StrategyKind};
use crate::retry::acquire_with_retry;

// ============================================================================
// Acquisition Strategy Trait
// ============================================================================

/// How a lock is represented in the backend, taken, checked and given back.
///
/// A strategy is stateless with respect to individual acquisitions: every
/// successful acquire yields a [`Self::Held`] value carrying whatever the
/// lock lives in (a session, a transaction, a lease record). The runner
/// shares that value between the caller's work and the watchdog, so any
/// connection inside it must sit behind a mutex.
///
/// # Example
///
/// ```rust,ignore
/// let holder = HolderId::generate();
/// if let Some(held) = strategy.try_acquire(&key, &holder).await? {
///     do_work().await;
///     strategy.release(&held).await?;
/// }
/// ```
pub trait AcquisitionStrategy: Send + Sync + 'static {
    /// State of one successful acquisition.
    type Held: Send + Sync + 'static;

    fn kind(&self) -> StrategyKind;

    /// Cadence of the watchdog's [`check`](Self::check).
    fn watchdog_interval(&self) -> Duration;

    /// A single, non-waiting acquisition attempt.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(held))` - Lock acquired
    /// * `Ok(None)` - Lock is held by someone else
    /// * `Err(...)` - The backend failed
    fn try_acquire(
        &self,
        key: &LockKey,
        holder: &HolderId,
    ) -> impl Future<Output = LockResult<Option<Self::Held>>> + Send;

    /// Acquires honouring `options`: one attempt when non-blocking, otherwise
    /// retries every spin interval until acquired or the timeout passes.
    fn acquire(
        &self,
        key: &LockKey,
        holder: &HolderId,
        options: &AcquireOptions,
    ) -> impl Future<Output = LockResult<Option<Self::Held>>> + Send {
        acquire_with_retry(options, move || self.try_acquire(key, holder))
    }

    /// Asks the backend whether this acquisition still owns the lock.
    fn is_still_held(&self, held: &Self::Held) -> impl Future<Output = LockResult<bool>> + Send;

    /// Extends the lock's validity. Only leases expire, so by default a no-op.
    fn renew(&self, _held: &Self::Held) -> impl Future<Output = LockResult<bool>> + Send {
        async { Ok(true) }
    }

    /// One watchdog poll: `Ok(None)` while the lock is valid, otherwise why it
    /// was lost.
    ///
    /// A strategy whose liveness lives in a connection maps a failed query to
    /// [`LostReason::ConnectionLost`]; one that only talks to shared records
    /// returns the error, which the watchdog reports as
    /// [`LostReason::CheckFailed`].
    fn check(
        &self,
        held: &Self::Held,
    ) -> impl Future<Output = LockResult<Option<LostReason>>> + Send;

    /// Gives the lock back. Returns false if it was no longer held.
    fn release(&self, held: &Self::Held) -> impl Future<Output = LockResult<bool>> + Send;

    /// How many times the key had been locked when `held` was acquired.
    fn sequence(&self, _held: &Self::Held) -> Option<i64> {
        None
    }
}
