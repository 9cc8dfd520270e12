//! The three acquisition strategies and the configuration-selected union.

mod lease;
mod session;
mod transactional;

use std::time::Duration;

pub use lease::{LeaseHeld, RenewableLeaseLock};
pub use session::{SessionHeld, SessionScopedLock};
pub use transactional::{RowHeld, TransactionalRowLock};

use crate::backend::{AdvisoryBackend, RowLockBackend, StorageBackend};
use crate::error::{LockError, LockResult, LostReason};
use crate::holder::HolderId;
use crate::key::LockKey;
use crate::options::{AcquireOptions, LockOptions, StrategyKind};
use crate::traits::AcquisitionStrategy;

/// Strategy picked at runtime from [`LockOptions::strategy`].
pub enum Strategy<B: StorageBackend> {
    Session(SessionScopedLock<B>),
    Transactional(TransactionalRowLock<B>),
    Lease(RenewableLeaseLock<B>),
}

/// Held state of whichever strategy acquired the lock.
pub enum HeldLock<B: StorageBackend> {
    Session(SessionHeld<<B as AdvisoryBackend>::Session>),
    Transactional(RowHeld<<B as RowLockBackend>::Transaction>),
    Lease(LeaseHeld),
}

impl<B: StorageBackend> HeldLock<B> {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Session(_) => StrategyKind::SessionScoped,
            Self::Transactional(_) => StrategyKind::Transactional,
            Self::Lease(_) => StrategyKind::Lease,
        }
    }

    pub fn as_session(&self) -> Option<&SessionHeld<<B as AdvisoryBackend>::Session>> {
        match self {
            Self::Session(held) => Some(held),
            _ => None,
        }
    }

    pub fn as_transactional(&self) -> Option<&RowHeld<<B as RowLockBackend>::Transaction>> {
        match self {
            Self::Transactional(held) => Some(held),
            _ => None,
        }
    }

    pub fn as_lease(&self) -> Option<&LeaseHeld> {
        match self {
            Self::Lease(held) => Some(held),
            _ => None,
        }
    }
}

impl<B: StorageBackend> Strategy<B> {
    /// Builds the strategy named by `options.strategy`.
    pub fn from_options(backend: B, options: &LockOptions) -> LockResult<Self> {
        options.validate()?;
        Ok(match options.strategy {
            StrategyKind::SessionScoped => Self::Session(SessionScopedLock::new(
                backend,
                options.lockspace,
                options.check_every,
            )?),
            StrategyKind::Transactional => {
                Self::Transactional(TransactionalRowLock::new(backend, options.check_every)?)
            }
            StrategyKind::Lease => Self::Lease(RenewableLeaseLock::new(
                backend,
                options.renew_every,
                options.lock_for,
            )?),
        })
    }

    pub fn backend(&self) -> &B {
        match self {
            Self::Session(s) => s.backend(),
            Self::Transactional(s) => s.backend(),
            Self::Lease(s) => s.backend(),
        }
    }
}

fn mismatched(expected: StrategyKind, held: StrategyKind) -> LockError {
    LockError::configuration(format!(
        "{} strategy handed a {} lock",
        expected.as_str(),
        held.as_str()
    ))
}

impl<B: StorageBackend> AcquisitionStrategy for Strategy<B> {
    type Held = HeldLock<B>;

    fn kind(&self) -> StrategyKind {
        match self {
            Self::Session(s) => s.kind(),
            Self::Transactional(s) => s.kind(),
            Self::Lease(s) => s.kind(),
        }
    }

    fn watchdog_interval(&self) -> Duration {
        match self {
            Self::Session(s) => s.watchdog_interval(),
            Self::Transactional(s) => s.watchdog_interval(),
            Self::Lease(s) => s.watchdog_interval(),
        }
    }

    async fn try_acquire(&self, key: &LockKey, holder: &HolderId) -> LockResult<Option<HeldLock<B>>> {
        Ok(match self {
            Self::Session(s) => s.try_acquire(key, holder).await?.map(HeldLock::Session),
            Self::Transactional(s) => s
                .try_acquire(key, holder)
                .await?
                .map(HeldLock::Transactional),
            Self::Lease(s) => s.try_acquire(key, holder).await?.map(HeldLock::Lease),
        })
    }

    async fn acquire(
        &self,
        key: &LockKey,
        holder: &HolderId,
        options: &AcquireOptions,
    ) -> LockResult<Option<HeldLock<B>>> {
        Ok(match self {
            Self::Session(s) => s.acquire(key, holder, options).await?.map(HeldLock::Session),
            Self::Transactional(s) => s
                .acquire(key, holder, options)
                .await?
                .map(HeldLock::Transactional),
            Self::Lease(s) => s.acquire(key, holder, options).await?.map(HeldLock::Lease),
        })
    }

    async fn is_still_held(&self, held: &HeldLock<B>) -> LockResult<bool> {
        match (self, held) {
            (Self::Session(s), HeldLock::Session(h)) => s.is_still_held(h).await,
            (Self::Transactional(s), HeldLock::Transactional(h)) => s.is_still_held(h).await,
            (Self::Lease(s), HeldLock::Lease(h)) => s.is_still_held(h).await,
            _ => Err(mismatched(self.kind(), held.kind())),
        }
    }

    async fn renew(&self, held: &HeldLock<B>) -> LockResult<bool> {
        match (self, held) {
            (Self::Session(s), HeldLock::Session(h)) => s.renew(h).await,
            (Self::Transactional(s), HeldLock::Transactional(h)) => s.renew(h).await,
            (Self::Lease(s), HeldLock::Lease(h)) => s.renew(h).await,
            _ => Err(mismatched(self.kind(), held.kind())),
        }
    }

    async fn check(&self, held: &HeldLock<B>) -> LockResult<Option<LostReason>> {
        match (self, held) {
            (Self::Session(s), HeldLock::Session(h)) => s.check(h).await,
            (Self::Transactional(s), HeldLock::Transactional(h)) => s.check(h).await,
            (Self::Lease(s), HeldLock::Lease(h)) => s.check(h).await,
            _ => Err(mismatched(self.kind(), held.kind())),
        }
    }

    async fn release(&self, held: &HeldLock<B>) -> LockResult<bool> {
        match (self, held) {
            (Self::Session(s), HeldLock::Session(h)) => s.release(h).await,
            (Self::Transactional(s), HeldLock::Transactional(h)) => s.release(h).await,
            (Self::Lease(s), HeldLock::Lease(h)) => s.release(h).await,
            _ => Err(mismatched(self.kind(), held.kind())),
        }
    }

    fn sequence(&self, held: &HeldLock<B>) -> Option<i64> {
        match (self, held) {
            (Self::Lease(s), HeldLock::Lease(h)) => s.sequence(h),
            _ => None,
        }
    }
}
