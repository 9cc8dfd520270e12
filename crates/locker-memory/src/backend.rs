//! In-process implementation of every storage capability.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use locker_core::backend::{AdvisoryBackend, LeaseBackend, RecordBackend, RowLockBackend, RowWait};
use locker_core::error::{LockError, LockResult};
use locker_core::holder::HolderId;
use locker_core::key::AdvisoryKey;
use locker_core::record::{LockRecord, lease_expiry};
use locker_core::timeout::Deadline;
use tracing::debug;

/// Poll cadence of a waiting row lock.
const ROW_LOCK_POLL: Duration = Duration::from_millis(5);

#[derive(Debug)]
struct AdvisoryOwner {
    session: u64,
    depth: u32,
}

#[derive(Debug)]
struct State {
    records: HashMap<String, LockRecord>,
    advisory: HashMap<AdvisoryKey, AdvisoryOwner>,
    dead_sessions: HashSet<u64>,
    row_locks: HashMap<String, u64>,
    aborted: HashSet<u64>,
    next_id: u64,
    available: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            advisory: HashMap::new(),
            dead_sessions: HashSet::new(),
            row_locks: HashMap::new(),
            aborted: HashSet::new(),
            next_id: 0,
            available: true,
        }
    }
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_available(&self) -> LockResult<()> {
        if self.available {
            Ok(())
        } else {
            Err(unavailable("memory backend is offline"))
        }
    }

    fn ensure_live(&self, session: &MemorySession) -> LockResult<()> {
        self.ensure_available()?;
        if self.dead_sessions.contains(&session.id) {
            return Err(unavailable("session terminated"));
        }
        Ok(())
    }

    fn drop_session_locks(&mut self, session: u64) {
        self.advisory.retain(|_, owner| owner.session != session);
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unavailable(msg: &str) -> LockError {
    LockError::BackendUnavailable(Box::new(io::Error::new(
        io::ErrorKind::ConnectionAborted,
        msg.to_string(),
    )))
}

/// Shared in-process store.
///
/// Cloning is cheap and every clone sees the same locks, so clones stand in
/// for separate processes talking to one database.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

/// A session of the in-process store. Dropping it frees its advisory locks.
#[derive(Debug)]
pub struct MemorySession {
    id: u64,
    state: Arc<Mutex<State>>,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        state.drop_session_locks(self.id);
        state.dead_sessions.remove(&self.id);
    }
}

/// An open transaction holding a row lock. Dropping it rolls back.
#[derive(Debug)]
pub struct MemoryTransaction {
    id: u64,
    key: String,
    state: Arc<Mutex<State>>,
}

impl MemoryTransaction {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        if state.row_locks.get(&self.key) == Some(&self.id) {
            state.row_locks.remove(&self.key);
        }
        state.aborted.remove(&self.id);
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }

    /// Current record for `key`, if it was ever created.
    pub fn record(&self, key: &str) -> Option<LockRecord> {
        self.state().records.get(key).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.state().records.len()
    }

    /// Overwrites the record's holder, as another process taking the lease would.
    pub fn steal(&self, key: &str, holder: &str) -> bool {
        let mut state = self.state();
        let Some(record) = state.records.get_mut(key) else {
            return false;
        };
        debug!(lock.key = key, holder, "stealing lease");
        record.holder = Some(holder.to_string());
        true
    }

    /// Terminates the session holding `key`; its advisory locks vanish and
    /// every later call on it fails.
    pub fn kill_session(&self, key: AdvisoryKey) -> bool {
        let mut state = self.state();
        let Some(session) = state.advisory.get(&key).map(|owner| owner.session) else {
            return false;
        };
        debug!(advisory_key = %key, session, "killing session");
        state.drop_session_locks(session);
        state.dead_sessions.insert(session);
        true
    }

    /// Aborts the transaction holding the row lock on `key`.
    pub fn abort_transaction(&self, key: &str) -> bool {
        let mut state = self.state();
        let Some(tx) = state.row_locks.remove(key) else {
            return false;
        };
        debug!(lock.key = key, tx, "aborting transaction");
        state.aborted.insert(tx);
        true
    }

    /// Takes the whole store offline (or back online). Every call fails with
    /// [`LockError::BackendUnavailable`] while offline.
    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    pub fn is_advisory_locked(&self, key: AdvisoryKey) -> bool {
        self.state().advisory.contains_key(&key)
    }

    pub fn is_row_locked(&self, key: &str) -> bool {
        self.state().row_locks.contains_key(key)
    }
}

impl RecordBackend for MemoryBackend {
    async fn ensure_record_exists(&self, key: &str) -> LockResult<()> {
        let mut state = self.state();
        state.ensure_available()?;
        state
            .records
            .entry(key.to_string())
            .or_insert_with(|| LockRecord::new(key));
        Ok(())
    }

    async fn fetch_record(&self, key: &str) -> LockResult<Option<LockRecord>> {
        let state = self.state();
        state.ensure_available()?;
        Ok(state.records.get(key).cloned())
    }
}

impl LeaseBackend for MemoryBackend {
    async fn execute_atomic_claim(
        &self,
        key: &str,
        holder: &HolderId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> LockResult<Option<LockRecord>> {
        let mut state = self.state();
        state.ensure_available()?;
        let Some(record) = state.records.get_mut(key) else {
            return Ok(None);
        };
        if !record.is_claimable_by(holder.as_str(), now) {
            return Ok(None);
        }
        record.claim(holder.as_str(), now, lease_expiry(now, ttl));
        Ok(Some(record.clone()))
    }

    async fn execute_renew(
        &self,
        key: &str,
        holder: &HolderId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> LockResult<bool> {
        let mut state = self.state();
        state.ensure_available()?;
        match state.records.get_mut(key) {
            Some(record) if record.holder.as_deref() == Some(holder.as_str()) => {
                record.expires_at = Some(lease_expiry(now, ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn execute_release(
        &self,
        key: &str,
        holder: &HolderId,
        now: DateTime<Utc>,
    ) -> LockResult<bool> {
        let mut state = self.state();
        state.ensure_available()?;
        match state.records.get_mut(key) {
            Some(record) if record.holder.as_deref() == Some(holder.as_str()) => {
                record.release(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn query_is_held_by_me(
        &self,
        key: &str,
        holder: &HolderId,
        now: DateTime<Utc>,
    ) -> LockResult<bool> {
        let state = self.state();
        state.ensure_available()?;
        Ok(state
            .records
            .get(key)
            .is_some_and(|record| record.is_held_by(holder.as_str(), now)))
    }
}

impl RowLockBackend for MemoryBackend {
    type Transaction = MemoryTransaction;

    async fn lock_row(&self, key: &str, wait: RowWait) -> LockResult<Option<MemoryTransaction>> {
        let deadline = match wait {
            RowWait::NoWait => Deadline::NEVER,
            RowWait::Wait(timeout) => Deadline::after(timeout),
        };

        loop {
            {
                let mut state = self.state();
                state.ensure_available()?;
                if !state.records.contains_key(key) {
                    return Err(LockError::Backend(Box::new(io::Error::other(format!(
                        "no lock record for key '{key}'"
                    )))));
                }
                if !state.row_locks.contains_key(key) {
                    let id = state.next_id();
                    state.row_locks.insert(key.to_string(), id);
                    return Ok(Some(MemoryTransaction {
                        id,
                        key: key.to_string(),
                        state: self.state.clone(),
                    }));
                }
            }

            if wait == RowWait::NoWait || deadline.has_elapsed() {
                return Ok(None);
            }
            tokio::time::sleep(deadline.clamp(ROW_LOCK_POLL)).await;
        }
    }

    async fn transaction_alive(&self, tx: &mut MemoryTransaction) -> LockResult<bool> {
        let state = self.state();
        state.ensure_available()?;
        Ok(!state.aborted.contains(&tx.id) && state.row_locks.get(&tx.key) == Some(&tx.id))
    }

    async fn end_transaction(&self, tx: MemoryTransaction) -> LockResult<bool> {
        let alive = {
            let state = self.state();
            !state.aborted.contains(&tx.id) && state.row_locks.get(&tx.key) == Some(&tx.id)
        };
        drop(tx);
        Ok(alive)
    }
}

impl AdvisoryBackend for MemoryBackend {
    type Session = MemorySession;

    async fn open_session(&self) -> LockResult<MemorySession> {
        let mut state = self.state();
        state.ensure_available()?;
        Ok(MemorySession {
            id: state.next_id(),
            state: self.state.clone(),
        })
    }

    async fn try_native_lock(&self, session: &mut MemorySession, key: AdvisoryKey) -> LockResult<bool> {
        let mut state = self.state();
        state.ensure_live(session)?;
        match state.advisory.get_mut(&key) {
            None => {
                state.advisory.insert(
                    key,
                    AdvisoryOwner {
                        session: session.id,
                        depth: 1,
                    },
                );
                Ok(true)
            }
            Some(owner) if owner.session == session.id => {
                owner.depth += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    async fn release_native_lock(&self, session: &mut MemorySession, key: AdvisoryKey) -> LockResult<bool> {
        let mut state = self.state();
        state.ensure_live(session)?;
        match state.advisory.get_mut(&key) {
            Some(owner) if owner.session == session.id => {
                owner.depth -= 1;
                if owner.depth == 0 {
                    state.advisory.remove(&key);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_native_lock_held_by_session(
        &self,
        session: &mut MemorySession,
        key: AdvisoryKey,
    ) -> LockResult<bool> {
        let state = self.state();
        state.ensure_live(session)?;
        Ok(state
            .advisory
            .get(&key)
            .is_some_and(|owner| owner.session == session.id))
    }

    async fn close_session(&self, session: MemorySession, reusable: bool) {
        debug!(session = session.id, reusable, "closing session");
        drop(session);
    }
}
