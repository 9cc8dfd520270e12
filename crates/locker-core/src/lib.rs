//! Core traits and types for named cross-process locks.
//!
//! A [`LockRunner`] acquires a [`LockKey`] through an [`AcquisitionStrategy`],
//! starts a watchdog that keeps checking (or renewing) the lock, runs the
//! caller's work, and releases the lock on every exit path. Storage is
//! abstracted by the capability traits in [`backend`].

pub mod backend;
pub mod error;
pub mod handle;
pub mod holder;
pub mod key;
pub mod options;
pub mod prelude;
pub mod record;
pub mod retry;
pub mod runner;
pub mod strategy;
pub mod timeout;
pub mod traits;
pub mod watchdog;

pub use error::{LockError, LockResult, LostReason};
pub use prelude::*;
