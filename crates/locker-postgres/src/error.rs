//! Mapping of sqlx errors onto lock errors.

use locker_core::error::LockError;

/// SQLSTATE raised by `NOWAIT` and by an expired `lock_timeout`.
pub(crate) const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Transport-level failure: the database could not be reached.
pub(crate) fn unavailable(e: sqlx::Error) -> LockError {
    LockError::BackendUnavailable(Box::new(e))
}

/// Splits connection problems from statements the server rejected.
pub(crate) fn backend(e: sqlx::Error) -> LockError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => unavailable(e),
        e => LockError::Backend(Box::new(e)),
    }
}

pub(crate) fn has_code(e: &sqlx::Error, code: &str) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|c| c == code)
}
