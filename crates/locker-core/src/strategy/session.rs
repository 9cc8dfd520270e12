//! Native advisory locks bound to one dedicated session.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::backend::AdvisoryBackend;
use crate::error::{LockResult, LostReason};
use crate::holder::HolderId;
use crate::key::{AdvisoryKey, LockKey, Lockspace};
use crate::options::{AcquireOptions, StrategyKind, validate_interval};
use crate::retry::RetryLoop;
use crate::traits::AcquisitionStrategy;

/// A held advisory lock and the session it lives in.
///
/// The session is `None` once released or after a failed check gave it up.
pub struct SessionHeld<S> {
    key: AdvisoryKey,
    session: Mutex<Option<S>>,
}

impl<S> SessionHeld<S> {
    pub fn advisory_key(&self) -> AdvisoryKey {
        self.key
    }

    /// The session holding the lock. Lock it to run statements on the
    /// session without racing the watchdog.
    pub fn session(&self) -> &Mutex<Option<S>> {
        &self.session
    }
}

/// Lock owned by a backend session for as long as that session stays open.
///
/// The session is taken from the backend when acquiring and handed back when
/// releasing; if the session dies the backend drops the lock with it, which
/// the watchdog reports as [`LostReason::ConnectionLost`].
pub struct SessionScopedLock<B: AdvisoryBackend> {
    backend: B,
    lockspace: Lockspace,
    check_every: Duration,
}

impl<B: AdvisoryBackend> SessionScopedLock<B> {
    pub fn new(backend: B, lockspace: Lockspace, check_every: Duration) -> LockResult<Self> {
        validate_interval("check_every", check_every)?;
        Ok(Self {
            backend,
            lockspace,
            check_every,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn lockspace(&self) -> Lockspace {
        self.lockspace
    }

    fn held(key: AdvisoryKey, session: B::Session) -> SessionHeld<B::Session> {
        SessionHeld {
            key,
            session: Mutex::new(Some(session)),
        }
    }
}

impl<B: AdvisoryBackend> AcquisitionStrategy for SessionScopedLock<B> {
    type Held = SessionHeld<B::Session>;

    fn kind(&self) -> StrategyKind {
        StrategyKind::SessionScoped
    }

    fn watchdog_interval(&self) -> Duration {
        self.check_every
    }

    async fn try_acquire(&self, key: &LockKey, holder: &HolderId) -> LockResult<Option<Self::Held>> {
        self.acquire(key, holder, &AcquireOptions::non_blocking()).await
    }

    /// Keeps one session for the whole blocking loop instead of opening one
    /// per attempt.
    #[instrument(skip_all, fields(lock.key = %key, strategy = "session"))]
    async fn acquire(
        &self,
        key: &LockKey,
        _holder: &HolderId,
        options: &AcquireOptions,
    ) -> LockResult<Option<Self::Held>> {
        let advisory = key.advisory_key(self.lockspace);
        let mut session = self.backend.open_session().await?;
        let mut retry = RetryLoop::new(options);

        loop {
            match self.backend.try_native_lock(&mut session, advisory).await {
                Ok(true) => {
                    debug!(advisory_key = %advisory, attempts = retry.attempts(), "advisory lock acquired");
                    return Ok(Some(Self::held(advisory, session)));
                }
                Ok(false) => {}
                Err(e) => {
                    self.backend.close_session(session, false).await;
                    return Err(e);
                }
            }
            if !retry.next_attempt().await {
                self.backend.close_session(session, true).await;
                return Ok(None);
            }
        }
    }

    async fn is_still_held(&self, held: &Self::Held) -> LockResult<bool> {
        let mut session = held.session.lock().await;
        match session.as_mut() {
            Some(session) => {
                self.backend
                    .is_native_lock_held_by_session(session, held.key)
                    .await
            }
            None => Ok(false),
        }
    }

    async fn check(&self, held: &Self::Held) -> LockResult<Option<LostReason>> {
        let mut session = held.session.lock().await;
        let Some(conn) = session.as_mut() else {
            return Ok(Some(LostReason::ConnectionLost));
        };
        match self
            .backend
            .is_native_lock_held_by_session(conn, held.key)
            .await
        {
            Ok(true) => Ok(None),
            Ok(false) => Ok(Some(LostReason::Stolen)),
            Err(e) => {
                debug!(error = %e, "session check failed");
                Ok(Some(LostReason::ConnectionLost))
            }
        }
    }

    #[instrument(skip_all, fields(advisory_key = %held.key, strategy = "session"))]
    async fn release(&self, held: &Self::Held) -> LockResult<bool> {
        let Some(mut session) = held.session.lock().await.take() else {
            return Ok(false);
        };
        match self.backend.release_native_lock(&mut session, held.key).await {
            Ok(released) => {
                self.backend.close_session(session, true).await;
                Ok(released)
            }
            Err(e) => {
                self.backend.close_session(session, false).await;
                Err(e)
            }
        }
    }
}
