//! Lock keys and their mapping onto integer advisory-lock identifiers.

use std::fmt;

use crate::error::{LockError, LockResult};

/// Name of a lockable resource.
///
/// A key is an opaque, non-empty string. It may additionally carry an
/// explicit 64-bit advisory id, in which case backends that only understand
/// integer identifiers use that id instead of hashing the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    name: String,
    explicit_id: Option<i64>,
}

impl LockKey {
    /// Creates a key from a resource name.
    pub fn new(name: impl Into<String>) -> LockResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(LockError::configuration("lock key cannot be empty"));
        }
        Ok(Self {
            name,
            explicit_id: None,
        })
    }

    /// Creates a key addressed by an explicit advisory id.
    pub fn explicit(id: i64) -> Self {
        Self {
            name: id.to_string(),
            explicit_id: Some(id),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn explicit_id(&self) -> Option<i64> {
        self.explicit_id
    }

    /// Maps this key to an advisory identifier inside `lockspace`.
    pub fn advisory_key(&self, lockspace: Lockspace) -> AdvisoryKey {
        match self.explicit_id {
            Some(id) => AdvisoryKey::Single(id),
            None => AdvisoryKey::Pair(lockspace.get(), crc32_signed(&self.name)),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl TryFrom<&str> for LockKey {
    type Error = LockError;

    fn try_from(name: &str) -> LockResult<Self> {
        Self::new(name)
    }
}

impl TryFrom<String> for LockKey {
    type Error = LockError;

    fn try_from(name: String) -> LockResult<Self> {
        Self::new(name)
    }
}

/// Anything a runner accepts as a key.
pub trait IntoLockKey {
    fn into_lock_key(self) -> LockResult<LockKey>;
}

impl IntoLockKey for LockKey {
    fn into_lock_key(self) -> LockResult<LockKey> {
        Ok(self)
    }
}

impl IntoLockKey for &LockKey {
    fn into_lock_key(self) -> LockResult<LockKey> {
        Ok(self.clone())
    }
}

impl IntoLockKey for &str {
    fn into_lock_key(self) -> LockResult<LockKey> {
        LockKey::new(self)
    }
}

impl IntoLockKey for String {
    fn into_lock_key(self) -> LockResult<LockKey> {
        LockKey::new(self)
    }
}

impl IntoLockKey for &String {
    fn into_lock_key(self) -> LockResult<LockKey> {
        LockKey::new(self.as_str())
    }
}

/// Partition of the advisory id space used for hashed keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lockspace(i32);

impl Lockspace {
    pub const DEFAULT: Self = Self(1);

    /// Validates a lockspace; anything outside the signed 32-bit range is rejected.
    pub fn new(value: i64) -> LockResult<Self> {
        i32::try_from(value).map(Self).map_err(|_| {
            LockError::configuration(format!(
                "lockspace must be an integer between {} and {}, got {value}",
                i32::MIN,
                i32::MAX
            ))
        })
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl Default for Lockspace {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Integer identifier understood by native advisory-lock backends.
///
/// A single 64-bit id and a pair of 32-bit ids are separate id spaces and
/// never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvisoryKey {
    /// Single 64-bit id.
    Single(i64),
    /// `(lockspace, hash)` pair.
    Pair(i32, i32),
}

impl AdvisoryKey {
    /// Returns true if this is a single key.
    pub fn has_single_key(&self) -> bool {
        matches!(self, Self::Single(_))
    }

    /// The id as two 32-bit words; a single id is split into (upper, lower).
    pub fn keys(&self) -> (i32, i32) {
        match self {
            Self::Single(k) => ((*k >> 32) as i32, (*k & 0xFFFF_FFFF) as i32),
            Self::Pair(k1, k2) => (*k1, *k2),
        }
    }
}

impl fmt::Display for AdvisoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(k) => write!(f, "{k}"),
            Self::Pair(k1, k2) => write!(f, "{k1}, {k2}"),
        }
    }
}

/// CRC32 of `name`, folded into the signed 32-bit range.
///
/// Values above `i32::MAX` wrap by subtracting 2^32. Collisions are possible.
pub fn crc32_signed(name: &str) -> i32 {
    const OVERFLOW_ADJUSTMENT: i64 = 1 << 32;

    let crc = i64::from(crc32fast::hash(name.as_bytes()));
    if crc > i64::from(i32::MAX) {
        (crc - OVERFLOW_ADJUSTMENT) as i32
    } else {
        crc as i32
    }
}
