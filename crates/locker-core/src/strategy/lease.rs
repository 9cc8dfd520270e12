//! TTL-stamped lease records renewed by the watchdog.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument};

use crate::backend::LeaseBackend;
use crate::error::{LockResult, LostReason};
use crate::holder::HolderId;
use crate::key::LockKey;
use crate::options::{AcquireOptions, StrategyKind, validate_lease};
use crate::retry::acquire_with_retry;
use crate::traits::AcquisitionStrategy;

/// A claimed lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseHeld {
    key: String,
    holder: HolderId,
    sequence: i64,
}

impl LeaseHeld {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }
}

/// Lock owned by the holder named in the key's record until `expires_at`.
///
/// A claim succeeds when the record is unclaimed, stale, or already ours.
/// The watchdog pushes `expires_at` forward every `renew_every`; a renewal
/// that matches no row means somebody else took the record.
pub struct RenewableLeaseLock<B: LeaseBackend> {
    backend: B,
    renew_every: Duration,
    lock_for: Duration,
}

impl<B: LeaseBackend> RenewableLeaseLock<B> {
    /// Fails if `renew_every` is not strictly shorter than `lock_for`.
    pub fn new(backend: B, renew_every: Duration, lock_for: Duration) -> LockResult<Self> {
        validate_lease(renew_every, lock_for)?;
        Ok(Self {
            backend,
            renew_every,
            lock_for,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn renew_every(&self) -> Duration {
        self.renew_every
    }

    pub fn lock_for(&self) -> Duration {
        self.lock_for
    }

    async fn claim(&self, key: &LockKey, holder: &HolderId) -> LockResult<Option<LeaseHeld>> {
        let record = self
            .backend
            .execute_atomic_claim(key.as_str(), holder, Utc::now(), self.lock_for)
            .await?;
        Ok(record.map(|record| LeaseHeld {
            key: record.key,
            holder: holder.clone(),
            sequence: record.sequence,
        }))
    }
}

impl<B: LeaseBackend> AcquisitionStrategy for RenewableLeaseLock<B> {
    type Held = LeaseHeld;

    fn kind(&self) -> StrategyKind {
        StrategyKind::Lease
    }

    fn watchdog_interval(&self) -> Duration {
        self.renew_every
    }

    async fn try_acquire(&self, key: &LockKey, holder: &HolderId) -> LockResult<Option<LeaseHeld>> {
        self.backend.ensure_record_exists(key.as_str()).await?;
        self.claim(key, holder).await
    }

    #[instrument(skip_all, fields(lock.key = %key, strategy = "lease", holder = %holder))]
    async fn acquire(
        &self,
        key: &LockKey,
        holder: &HolderId,
        options: &AcquireOptions,
    ) -> LockResult<Option<LeaseHeld>> {
        self.backend.ensure_record_exists(key.as_str()).await?;
        let held = acquire_with_retry(options, || self.claim(key, holder)).await?;
        if let Some(held) = &held {
            debug!(sequence = held.sequence, "lease claimed");
        }
        Ok(held)
    }

    async fn is_still_held(&self, held: &LeaseHeld) -> LockResult<bool> {
        self.backend
            .query_is_held_by_me(&held.key, &held.holder, Utc::now())
            .await
    }

    async fn renew(&self, held: &LeaseHeld) -> LockResult<bool> {
        self.backend
            .execute_renew(&held.key, &held.holder, Utc::now(), self.lock_for)
            .await
    }

    async fn check(&self, held: &LeaseHeld) -> LockResult<Option<LostReason>> {
        if self.renew(held).await? {
            Ok(None)
        } else {
            Ok(Some(LostReason::Stolen))
        }
    }

    #[instrument(skip_all, fields(lock.key = %held.key, strategy = "lease"))]
    async fn release(&self, held: &LeaseHeld) -> LockResult<bool> {
        self.backend
            .execute_release(&held.key, &held.holder, Utc::now())
            .await
    }

    fn sequence(&self, held: &LeaseHeld) -> Option<i64> {
        Some(held.sequence)
    }
}
