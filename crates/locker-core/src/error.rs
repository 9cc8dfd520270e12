//! Error types for lock operations.

use std::fmt;

use thiserror::Error;

/// Why a held lock stopped being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LostReason {
    /// The record or native lock is now owned by someone else.
    Stolen,
    /// The session or transaction carrying the lock went away.
    ConnectionLost,
    /// The liveness check itself failed.
    CheckFailed(String),
}

impl fmt::Display for LostReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stolen => f.write_str("lock was stolen"),
            Self::ConnectionLost => f.write_str("backend connection lost"),
            Self::CheckFailed(msg) => write!(f, "liveness check failed: {msg}"),
        }
    }
}

/// Errors that can occur during lock operations.
///
/// Failing to obtain a lock is not an error: acquisition returns `Ok(None)`.
#[derive(Error, Debug)]
pub enum LockError {
    /// Invalid key or options. Only raised while constructing.
    #[error("invalid lock configuration: {0}")]
    Configuration(String),

    /// The lock was lost while work was running under it.
    #[error("lock '{key}' was lost: {reason}")]
    LockLost { key: String, reason: LostReason },

    /// The backend could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The backend rejected an operation.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LockError {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Returns true if this is a [`LockError::LockLost`].
    pub fn is_lock_lost(&self) -> bool {
        matches!(self, Self::LockLost { .. })
    }
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;
