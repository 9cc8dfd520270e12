//! Runs caller work under a lock.

use std::future::Future;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;

use futures::FutureExt;
use tracing::{Span, debug, field, instrument, warn};

use crate::backend::StorageBackend;
use crate::error::{LockError, LockResult, LostReason};
use crate::handle::LockHandle;
use crate::holder::HolderId;
use crate::key::{IntoLockKey, LockKey};
use crate::options::{AcquireOptions, LockOptions};
use crate::strategy::Strategy;
use crate::traits::AcquisitionStrategy;
use crate::watchdog::{LostToken, wait_for_loss};

/// What the caller's work gets to see of the lock it runs under.
pub struct LockContext<H> {
    key: LockKey,
    holder: HolderId,
    sequence: Option<i64>,
    lost: LostToken,
    held: Arc<H>,
}

impl<H> LockContext<H> {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    /// Lease sequence captured at acquisition: "the Nth time this key was locked".
    pub fn sequence(&self) -> Option<i64> {
        self.sequence
    }

    /// True once the watchdog has reported the lock lost.
    pub fn is_lost(&self) -> bool {
        self.lost.borrow().is_some()
    }

    pub fn lost_token(&self) -> &LostToken {
        &self.lost
    }

    /// Resolves with the reason once the lock is reported lost. Never
    /// resolves while the lock stays valid.
    pub async fn lost(&self) -> LostReason {
        wait_for_loss(&mut self.lost.clone()).await
    }

    /// Strategy-specific state shared with the watchdog.
    pub fn held(&self) -> &Arc<H> {
        &self.held
    }
}

/// Acquires locks through a strategy and runs work while they are held.
///
/// # Example
///
/// ```rust,ignore
/// let runner = LockRunner::from_backend(backend, LockOptions::default())?;
/// let ran = runner
///     .run("nightly-report", |ctx| async move {
///         build_report(ctx.sequence()).await
///     })
///     .await?;
/// if ran.is_none() {
///     println!("another process is building the report");
/// }
/// ```
pub struct LockRunner<S: AcquisitionStrategy> {
    strategy: Arc<S>,
    options: LockOptions,
}

impl<B: StorageBackend> LockRunner<Strategy<B>> {
    /// Builds the strategy selected by `options.strategy` on top of `backend`.
    pub fn from_backend(backend: B, options: LockOptions) -> LockResult<Self> {
        let strategy = Strategy::from_options(backend, &options)?;
        Self::new(strategy, options)
    }
}

impl<S: AcquisitionStrategy> LockRunner<S> {
    /// Creates a runner. Strategy-specific settings in `options` (lease
    /// window, lockspace) are ignored; the strategy already carries its own.
    pub fn new(strategy: S, options: LockOptions) -> LockResult<Self> {
        options.validate()?;
        Ok(Self {
            strategy: Arc::new(strategy),
            options,
        })
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Acquisition options derived from the runner's configuration.
    pub fn acquire_options(&self) -> AcquireOptions {
        AcquireOptions {
            blocking: self.options.blocking,
            block_timeout: self.options.block_timeout,
            spin_interval: self
                .options
                .spin_interval
                .unwrap_or_else(|| self.strategy.kind().default_spin_interval()),
        }
    }

    /// Acquires `key` with the configured blocking behaviour.
    pub async fn acquire(&self, key: impl IntoLockKey) -> LockResult<Option<LockHandle<S>>> {
        let options = self.acquire_options();
        self.acquire_with(key, &options).await
    }

    /// Acquires `key` with explicit blocking behaviour.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(handle))` - Lock acquired; the watchdog is running
    /// * `Ok(None)` - Lock is held elsewhere (or the block timeout passed)
    /// * `Err(...)` - Invalid key or backend failure
    #[instrument(
        skip_all,
        fields(lock.key = field::Empty, strategy = self.strategy.kind().as_str(), acquired = field::Empty)
    )]
    pub async fn acquire_with(
        &self,
        key: impl IntoLockKey,
        options: &AcquireOptions,
    ) -> LockResult<Option<LockHandle<S>>> {
        let key = key.into_lock_key()?;
        Span::current().record("lock.key", field::display(&key));

        let holder = HolderId::generate();
        let held = self.strategy.acquire(&key, &holder, options).await?;
        Span::current().record("acquired", held.is_some());

        Ok(held.map(|held| {
            let stop_timeout = self
                .options
                .watchdog
                .then_some(self.options.watchdog_stop_timeout);
            LockHandle::new(self.strategy.clone(), key, holder, held, stop_timeout)
        }))
    }

    /// Runs `work` while holding `key`.
    ///
    /// Returns `Ok(None)` without calling `work` if the lock was not obtained.
    /// If the watchdog reports the lock lost, `work` is dropped at its next
    /// suspension point and [`LockError::LockLost`] is returned. The watchdog
    /// is stopped and the lock released on every path, including a panic in
    /// `work`, before anything is propagated.
    pub async fn run<F, Fut, T>(&self, key: impl IntoLockKey, work: F) -> LockResult<Option<T>>
    where
        F: FnOnce(LockContext<S::Held>) -> Fut,
        Fut: Future<Output = T>,
    {
        let options = self.acquire_options();
        self.run_with(key, &options, work).await
    }

    /// [`run`](Self::run) with explicit blocking behaviour.
    pub async fn run_with<F, Fut, T>(
        &self,
        key: impl IntoLockKey,
        options: &AcquireOptions,
        work: F,
    ) -> LockResult<Option<T>>
    where
        F: FnOnce(LockContext<S::Held>) -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(handle) = self.acquire_with(key, options).await? else {
            return Ok(None);
        };
        let Some(held) = handle.held().cloned() else {
            return Ok(None);
        };

        let key = handle.key().clone();
        let mut lost = handle.lost_token().clone();
        let context = LockContext {
            key: key.clone(),
            holder: handle.holder().clone(),
            sequence: handle.sequence(),
            lost: lost.clone(),
            held,
        };

        let work = AssertUnwindSafe(async move { work(context).await }).catch_unwind();
        let outcome = tokio::select! {
            biased;
            reason = wait_for_loss(&mut lost) => Err(reason),
            result = work => Ok(result),
        };

        let released = handle.release().await;

        match outcome {
            Err(reason) => {
                if let Err(e) = released {
                    warn!(lock.key = %key, error = %e, "release after lock loss failed");
                }
                Err(LockError::LockLost {
                    key: key.to_string(),
                    reason,
                })
            }
            Ok(Err(panic)) => {
                if let Err(e) = released {
                    warn!(lock.key = %key, error = %e, "release after panic failed");
                }
                resume_unwind(panic)
            }
            Ok(Ok(value)) => {
                if !released? {
                    warn!(lock.key = %key, "lock was no longer held at release");
                }
                debug!(lock.key = %key, "work finished under lock");
                Ok(Some(value))
            }
        }
    }
}
