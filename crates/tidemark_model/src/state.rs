//! Identifiers, timestamps, and sync bookkeeping states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Synchronization state of a locally stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Local copy matches the last state confirmed with the server.
    Synced,
    /// Local copy has edits the server has not acknowledged yet.
    Pending,
    /// A push collided with a newer server version; needs explicit resolution.
    Conflict,
    /// Unrecoverable duplicate-resolution failure; excluded from automatic push.
    Error,
}

impl SyncState {
    /// Returns true if the record is eligible for automatic push.
    pub fn is_pushable(&self) -> bool {
        matches!(self, SyncState::Pending)
    }

    /// Returns true if the record must be resolved before it can sync again.
    pub fn needs_resolution(&self) -> bool {
        matches!(self, SyncState::Conflict)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Synced => "synced",
            SyncState::Pending => "pending",
            SyncState::Conflict => "conflict",
            SyncState::Error => "error",
        };
        f.write_str(name)
    }
}

/// The two record families kept in the replica.
///
/// Dispatch on the family is always explicit; a record never has to be
/// sniffed for family-specific keys to find out what it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFamily {
    /// A standalone entity (the referenced family).
    Entity,
    /// A curation; may reference one entity by logical id.
    Curation,
}

impl RecordFamily {
    /// Returns the family name as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordFamily::Entity => "entity",
            RecordFamily::Curation => "curation",
        }
    }
}

impl fmt::Display for RecordFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local primary key of a stored row.
///
/// Distinct from the business `logical_id`: the row key never leaves the
/// local store and is preserved across payload overwrites, so references
/// held by the embedding application stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowKey(Uuid);

impl RowKey {
    /// Generates a fresh row key.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RowKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A unix-millisecond timestamp.
///
/// Used for pull watermarks and `last_synced_at` bookkeeping. Ordering is
/// the natural ordering of the underlying milliseconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        Self(millis)
    }

    /// Builds a timestamp from unix milliseconds.
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix milliseconds.
    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_state_predicates() {
        assert!(SyncState::Pending.is_pushable());
        assert!(!SyncState::Synced.is_pushable());
        assert!(!SyncState::Conflict.is_pushable());
        assert!(!SyncState::Error.is_pushable());

        assert!(SyncState::Conflict.needs_resolution());
        assert!(!SyncState::Pending.needs_resolution());
    }

    #[test]
    fn family_names() {
        assert_eq!(RecordFamily::Entity.as_str(), "entity");
        assert_eq!(RecordFamily::Curation.as_str(), "curation");
        assert_eq!(RecordFamily::Curation.to_string(), "curation");
    }

    #[test]
    fn row_keys_are_unique() {
        assert_ne!(RowKey::new(), RowKey::new());
    }

    #[test]
    fn timestamp_ordering() {
        let earlier = Timestamp::from_millis(1_000);
        let later = Timestamp::from_millis(2_000);
        assert!(earlier < later);
        assert_eq!(later.as_millis(), 2_000);
    }

    #[test]
    fn timestamp_now_is_positive() {
        assert!(Timestamp::now().as_millis() > 0);
    }

    #[test]
    fn sync_state_serde_codes() {
        let json = serde_json::to_string(&SyncState::Conflict).unwrap();
        assert_eq!(json, "\"conflict\"");
        let back: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SyncState::Conflict);
    }
}
