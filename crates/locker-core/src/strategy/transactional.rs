//! Row locks held for the lifetime of one open transaction.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::backend::{RowLockBackend, RowWait};
use crate::error::{LockResult, LostReason};
use crate::holder::HolderId;
use crate::key::LockKey;
use crate::options::{AcquireOptions, StrategyKind, validate_interval};
use crate::traits::AcquisitionStrategy;

/// A locked row and the transaction holding it.
pub struct RowHeld<T> {
    key: String,
    tx: Mutex<Option<T>>,
}

impl<T> RowHeld<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The open transaction. Work that wants to run statements inside the
    /// locked transaction locks this; the watchdog does the same for its
    /// liveness query, so the two never share the connection concurrently.
    pub fn transaction(&self) -> &Mutex<Option<T>> {
        &self.tx
    }
}

/// Lock owned by whoever holds `SELECT ... FOR UPDATE` on the key's record.
///
/// Waiting is delegated to the backend: non-blocking acquires use `NOWAIT`,
/// blocking ones wait natively, bounded by the block timeout if one is set.
/// Ending the transaction, or losing its connection, releases the row.
pub struct TransactionalRowLock<B: RowLockBackend> {
    backend: B,
    check_every: Duration,
}

impl<B: RowLockBackend> TransactionalRowLock<B> {
    pub fn new(backend: B, check_every: Duration) -> LockResult<Self> {
        validate_interval("check_every", check_every)?;
        Ok(Self {
            backend,
            check_every,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn lock(&self, key: &LockKey, wait: RowWait) -> LockResult<Option<RowHeld<B::Transaction>>> {
        self.backend.ensure_record_exists(key.as_str()).await?;
        let tx = self.backend.lock_row(key.as_str(), wait).await?;
        Ok(tx.map(|tx| RowHeld {
            key: key.as_str().to_string(),
            tx: Mutex::new(Some(tx)),
        }))
    }
}

impl<B: RowLockBackend> AcquisitionStrategy for TransactionalRowLock<B> {
    type Held = RowHeld<B::Transaction>;

    fn kind(&self) -> StrategyKind {
        StrategyKind::Transactional
    }

    fn watchdog_interval(&self) -> Duration {
        self.check_every
    }

    async fn try_acquire(&self, key: &LockKey, _holder: &HolderId) -> LockResult<Option<Self::Held>> {
        self.lock(key, RowWait::NoWait).await
    }

    #[instrument(skip_all, fields(lock.key = %key, strategy = "transactional", blocking = options.blocking))]
    async fn acquire(
        &self,
        key: &LockKey,
        _holder: &HolderId,
        options: &AcquireOptions,
    ) -> LockResult<Option<Self::Held>> {
        let wait = if options.blocking {
            RowWait::Wait(options.block_timeout)
        } else {
            RowWait::NoWait
        };
        let held = self.lock(key, wait).await?;
        debug!(acquired = held.is_some(), "row lock attempt finished");
        Ok(held)
    }

    async fn is_still_held(&self, held: &Self::Held) -> LockResult<bool> {
        let mut tx = held.tx.lock().await;
        match tx.as_mut() {
            Some(tx) => self.backend.transaction_alive(tx).await,
            None => Ok(false),
        }
    }

    async fn check(&self, held: &Self::Held) -> LockResult<Option<LostReason>> {
        match self.is_still_held(held).await {
            Ok(true) => Ok(None),
            Ok(false) => Ok(Some(LostReason::ConnectionLost)),
            Err(e) => {
                debug!(error = %e, "transaction check failed");
                Ok(Some(LostReason::ConnectionLost))
            }
        }
    }

    #[instrument(skip_all, fields(lock.key = %held.key, strategy = "transactional"))]
    async fn release(&self, held: &Self::Held) -> LockResult<bool> {
        let Some(tx) = held.tx.lock().await.take() else {
            return Ok(false);
        };
        self.backend.end_transaction(tx).await
    }
}
