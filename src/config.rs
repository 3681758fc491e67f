//! Journal tuning knobs.

use serde::{Deserialize, Serialize};

/// Durability and hygiene options for a single journal instance.
///
/// `fsync` covers both content files and ordinal pointer updates. Turning it
/// off is only appropriate for tests and throwaway stores; a crash can then
/// lose acknowledged writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalOptions {
    /// Sync file and directory contents after every durable write.
    pub fsync: bool,
}

impl Default for JournalOptions {
    fn default() -> Self {
        Self { fsync: true }
    }
}

impl JournalOptions {
    /// Options for tests: skip fsync to keep suites fast.
    pub fn no_fsync() -> Self {
        Self { fsync: false }
    }
}
