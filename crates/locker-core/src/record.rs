//! Persisted per-key lock slot used by the row and lease strategies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row per key. Created on first use and reused by every later acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub key: String,

    /// Holder identifier of the current owner, if any.
    pub holder: Option<String>,

    pub acquired_at: Option<DateTime<Utc>>,

    /// Lease expiry. Unset for strategies that do not lease.
    pub expires_at: Option<DateTime<Utc>>,

    /// Number of unlocked-to-locked transitions seen by this key.
    pub sequence: i64,
}

impl LockRecord {
    /// A fresh, unlocked slot.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            holder: None,
            acquired_at: None,
            expires_at: None,
            sequence: 0,
        }
    }

    /// True when `holder` owns the slot and its lease has not expired at `now`.
    pub fn is_held_by(&self, holder: &str, now: DateTime<Utc>) -> bool {
        self.holder.as_deref() == Some(holder) && !self.is_stale(now)
    }

    /// True when the lease has lapsed (or was never stamped).
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at < now)
    }

    /// Whether a claim by `holder` at `now` may take the slot.
    pub fn is_claimable_by(&self, holder: &str, now: DateTime<Utc>) -> bool {
        self.holder.is_none() || self.holder.as_deref() == Some(holder) || self.is_stale(now)
    }

    /// Applies a successful claim. The sequence only moves on a new acquisition.
    pub fn claim(&mut self, holder: &str, now: DateTime<Utc>, expires_at: DateTime<Utc>) {
        if !self.is_held_by(holder, now) {
            self.sequence += 1;
            self.acquired_at = Some(now);
        }
        self.holder = Some(holder.to_string());
        self.expires_at = Some(expires_at);
    }

    /// Clears the holder and marks the slot stale as of `now`.
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.holder = None;
        self.expires_at = Some(now);
    }
}

/// `now + ttl`, saturating at the latest representable instant.
pub fn lease_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
