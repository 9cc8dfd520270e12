//! SQL text for the lock table and the advisory-lock functions.
//!
//! Expected table layout (creating it is left to the application's
//! migrations):
//!
//! ```sql
//! CREATE TABLE locks (
//!     key         text        NOT NULL UNIQUE,
//!     holder      text        NULL,
//!     acquired_at timestamptz NULL,
//!     expires_at  timestamptz NULL,
//!     sequence    bigint      NOT NULL DEFAULT 0
//! );
//! ```

use locker_core::error::{LockError, LockResult};
use locker_core::key::AdvisoryKey;

pub const DEFAULT_TABLE: &str = "locks";

/// Validates a possibly schema-qualified table name and quotes each part.
pub(crate) fn quote_table(name: &str) -> LockResult<String> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(LockError::Configuration(format!(
            "table name '{name}' has too many parts"
        )));
    }
    let mut quoted = Vec::with_capacity(parts.len());
    for part in parts {
        let valid = !part.is_empty()
            && part.len() <= 63
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !part.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            return Err(LockError::Configuration(format!(
                "invalid table name '{name}'"
            )));
        }
        quoted.push(format!("\"{part}\""));
    }
    Ok(quoted.join("."))
}

/// Statements against one lock table, rendered once.
#[derive(Debug)]
pub(crate) struct Queries {
    pub ensure: String,
    pub fetch: String,
    pub claim: String,
    pub renew: String,
    pub release: String,
    pub is_held: String,
    pub lock_row: String,
    pub lock_row_nowait: String,
}

const COLUMNS: &str = "key, holder, acquired_at, expires_at, sequence";

impl Queries {
    pub(crate) fn new(table: &str) -> LockResult<Self> {
        let t = quote_table(table)?;
        Ok(Self {
            ensure: format!("INSERT INTO {t} (key) VALUES ($1) ON CONFLICT (key) DO NOTHING"),
            fetch: format!("SELECT {COLUMNS} FROM {t} WHERE key = $1"),
            // $1 key, $2 holder, $3 now, $4 expires_at. SET sees the old row,
            // so a live lease reclaimed by its holder keeps its sequence.
            claim: format!(
                "UPDATE {t} SET \
                 sequence = CASE WHEN holder = $2 AND expires_at >= $3 THEN sequence ELSE sequence + 1 END, \
                 acquired_at = CASE WHEN holder = $2 AND expires_at >= $3 THEN acquired_at ELSE $3 END, \
                 holder = $2, \
                 expires_at = $4 \
                 WHERE key = $1 AND (holder IS NULL OR holder = $2 OR expires_at IS NULL OR expires_at < $3) \
                 RETURNING {COLUMNS}"
            ),
            renew: format!("UPDATE {t} SET expires_at = $3 WHERE key = $1 AND holder = $2"),
            release: format!(
                "UPDATE {t} SET holder = NULL, expires_at = $3 WHERE key = $1 AND holder = $2"
            ),
            is_held: format!(
                "SELECT EXISTS (SELECT 1 FROM {t} WHERE key = $1 AND holder = $2 AND expires_at >= $3)"
            ),
            lock_row: format!("SELECT key FROM {t} WHERE key = $1 FOR UPDATE"),
            lock_row_nowait: format!("SELECT key FROM {t} WHERE key = $1 FOR UPDATE NOWAIT"),
        })
    }
}

pub(crate) fn try_advisory_lock(key: AdvisoryKey) -> &'static str {
    match key {
        AdvisoryKey::Single(_) => "SELECT pg_try_advisory_lock($1::bigint)",
        AdvisoryKey::Pair(_, _) => "SELECT pg_try_advisory_lock($1::int4, $2::int4)",
    }
}

pub(crate) fn advisory_unlock(key: AdvisoryKey) -> &'static str {
    match key {
        AdvisoryKey::Single(_) => "SELECT pg_advisory_unlock($1::bigint)",
        AdvisoryKey::Pair(_, _) => "SELECT pg_advisory_unlock($1::int4, $2::int4)",
    }
}

/// Whether this backend session holds the advisory lock. Single keys are
/// listed in `pg_locks` split into (classid, objid) with `objsubid = 1`,
/// pairs with `objsubid = 2`.
pub(crate) const ADVISORY_HELD: &str = "SELECT EXISTS ( \
     SELECT 1 FROM pg_locks \
     WHERE locktype = 'advisory' AND granted AND pid = pg_backend_pid() \
     AND classid = $1::int4::oid AND objid = $2::int4::oid AND objsubid = $3::int2)";

pub(crate) fn objsubid(key: AdvisoryKey) -> i16 {
    if key.has_single_key() { 1 } else { 2 }
}

/// `SET LOCAL` value for a bounded row-lock wait; zero would mean "forever".
pub(crate) fn lock_timeout(timeout: std::time::Duration) -> String {
    let millis = timeout.as_millis().clamp(1, i32::MAX as u128);
    format!("SET LOCAL lock_timeout = {millis}")
}
