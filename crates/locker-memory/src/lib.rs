//! In-process storage backend for locker.
//!
//! [`MemoryBackend`] implements every storage capability the lock strategies
//! need, keeping state in a shared map instead of a database. Clones share
//! state, so two clones behave like two processes talking to one store.
//!
//! It also exposes fault injection for exercising loss detection:
//!
//! - [`MemoryBackend::steal`] overwrites a lease record's holder
//! - [`MemoryBackend::kill_session`] terminates the session holding an advisory lock
//! - [`MemoryBackend::abort_transaction`] aborts the transaction holding a row lock
//! - [`MemoryBackend::set_available`] takes the whole store offline
//!
//! # Example
//!
//! ```rust,ignore
//! use locker_core::prelude::*;
//! use locker_memory::MemoryBackend;
//!
//! let backend = MemoryBackend::new();
//! let runner = LockRunner::from_backend(backend, LockOptions::default())?;
//! runner.run("job", |_ctx| async { do_work().await }).await?;
//! ```

mod backend;

pub use backend::{MemoryBackend, MemorySession, MemoryTransaction};
