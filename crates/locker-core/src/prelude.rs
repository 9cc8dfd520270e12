//! Convenience prelude for lock types.

pub use crate::backend::{
    AdvisoryBackend, LeaseBackend, RecordBackend, RowLockBackend, RowWait, StorageBackend,
};
pub use crate::error::{LockError, LockResult, LostReason};
pub use crate::handle::LockHandle;
pub use crate::holder::HolderId;
pub use crate::key::{AdvisoryKey, IntoLockKey, LockKey, Lockspace};
pub use crate::options::{
    AcquireOptions, LockOptions, LockOptionsBuilder, MAX_LOCK_FOR, StrategyKind,
};
pub use crate::record::LockRecord;
pub use crate::runner::{LockContext, LockRunner};
pub use crate::strategy::{
    HeldLock, LeaseHeld, RenewableLeaseLock, RowHeld, SessionHeld, SessionScopedLock, Strategy,
    TransactionalRowLock,
};
pub use crate::timeout::Timeout;
pub use crate::traits::AcquisitionStrategy;
pub use crate::watchdog::LostToken;
