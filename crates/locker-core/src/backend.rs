//! Storage capabilities the strategies are built on.
//!
//! A backend implements one trait per locking primitive it offers. Strategies
//! take the backend by value (usually a cheap handle around a pool), so no
//! process-wide state is involved.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::LockResult;
use crate::holder::HolderId;
use crate::key::AdvisoryKey;
use crate::record::LockRecord;
use crate::timeout::Timeout;

/// Per-key [`LockRecord`] slots.
pub trait RecordBackend: Send + Sync + 'static {
    /// Creates the record for `key` if missing.
    ///
    /// Concurrent first-time callers must all succeed, leaving exactly one
    /// record behind.
    fn ensure_record_exists(&self, key: &str) -> impl Future<Output = LockResult<()>> + Send;

    fn fetch_record(&self, key: &str)
    -> impl Future<Output = LockResult<Option<LockRecord>>> + Send;
}

/// TTL-stamped records updated with conditional writes.
pub trait LeaseBackend: RecordBackend {
    /// Claims `key` for `holder` when it is unclaimed, stale, or already held
    /// by `holder`, stamping `expires_at = now + ttl`.
    ///
    /// Returns the record after the claim, or `None` if someone else holds it.
    fn execute_atomic_claim(
        &self,
        key: &str,
        holder: &HolderId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> impl Future<Output = LockResult<Option<LockRecord>>> + Send;

    /// Pushes `expires_at` to `now + ttl` if `holder` still owns the record.
    fn execute_renew(
        &self,
        key: &str,
        holder: &HolderId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> impl Future<Output = LockResult<bool>> + Send;

    /// Clears the holder if it is `holder`; returns false otherwise.
    fn execute_release(
        &self,
        key: &str,
        holder: &HolderId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = LockResult<bool>> + Send;

    fn query_is_held_by_me(
        &self,
        key: &str,
        holder: &HolderId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = LockResult<bool>> + Send;
}

/// How a row lock waits for a concurrent owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowWait {
    /// Fail immediately if the row is locked.
    NoWait,
    /// Wait inside the backend, optionally bounded.
    Wait(Timeout),
}

/// Row locks held for the lifetime of an open transaction.
pub trait RowLockBackend: RecordBackend {
    /// An open transaction holding a row lock.
    type Transaction: Send + 'static;

    /// Opens a transaction and locks the record row for `key`.
    ///
    /// Returns `None` when the row is locked elsewhere (immediately for
    /// [`RowWait::NoWait`], after the wait otherwise).
    fn lock_row(
        &self,
        key: &str,
        wait: RowWait,
    ) -> impl Future<Output = LockResult<Option<Self::Transaction>>> + Send;

    /// Whether the transaction and its connection are still usable.
    fn transaction_alive(
        &self,
        tx: &mut Self::Transaction,
    ) -> impl Future<Output = LockResult<bool>> + Send;

    /// Rolls back, dropping the row lock. Returns false if it was already gone.
    fn end_transaction(&self, tx: Self::Transaction)
    -> impl Future<Output = LockResult<bool>> + Send;
}

/// Native advisory locks bound to a backend session.
pub trait AdvisoryBackend: Send + Sync + 'static {
    /// A dedicated connection; locks live as long as it does.
    type Session: Send + 'static;

    fn open_session(&self) -> impl Future<Output = LockResult<Self::Session>> + Send;

    fn try_native_lock(
        &self,
        session: &mut Self::Session,
        key: AdvisoryKey,
    ) -> impl Future<Output = LockResult<bool>> + Send;

    fn release_native_lock(
        &self,
        session: &mut Self::Session,
        key: AdvisoryKey,
    ) -> impl Future<Output = LockResult<bool>> + Send;

    fn is_native_lock_held_by_session(
        &self,
        session: &mut Self::Session,
        key: AdvisoryKey,
    ) -> impl Future<Output = LockResult<bool>> + Send;

    /// Hands the session back. `reusable` is false when its lock state is unknown.
    fn close_session(
        &self,
        session: Self::Session,
        reusable: bool,
    ) -> impl Future<Output = ()> + Send;
}

/// A backend offering every primitive, usable with any [`crate::StrategyKind`].
pub trait StorageBackend: LeaseBackend + RowLockBackend + AdvisoryBackend + Clone {}

impl<T> StorageBackend for T where T: LeaseBackend + RowLockBackend + AdvisoryBackend + Clone {}
