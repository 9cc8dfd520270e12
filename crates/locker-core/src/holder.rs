//! Holder identifiers.

use std::fmt;
use std::process;

use uuid::Uuid;

/// Identifies one acquisition attempt.
///
/// Format: `host:{hostname} pid:{pid} guid:{32 hex chars}`. Two attempts in
/// the same process never share an identifier, so a record that shows the
/// key as locked can still be told apart from "locked by me".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HolderId(String);

impl HolderId {
    /// Generates a fresh identifier for this host and process.
    pub fn generate() -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self(format!(
            "host:{host} pid:{} guid:{}",
            process::id(),
            Uuid::new_v4().simple()
        ))
    }

    /// Wraps an existing identifier, e.g. one read back from a record.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
