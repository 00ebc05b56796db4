//! Conflict cases and resolution strategies.

use crate::payload::Payload;
use crate::state::RecordFamily;
use serde::{Deserialize, Serialize};

/// Strategy for resolving a flagged conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Force-push the local payload with no version check, then adopt the
    /// server's returned version.
    Local,
    /// Discard the local payload; adopt the remote payload and version
    /// verbatim, preserving the local row key.
    Remote,
    /// Field-level union with local precedence, pushed using the remote's
    /// version as the optimistic-lock token.
    Merge,
}

/// A recorded collision between local and remote copies of one record.
///
/// Produced when a push hits a version mismatch, or when a pull reveals
/// that the server moved past a locally conflicted record. Holds both
/// sides so resolution never needs to trust whichever copy happens to be
/// in the store at resolution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ConflictCase<P: Payload> {
    /// Family of the conflicted record.
    pub family: RecordFamily,
    /// Business key of the conflicted record.
    pub logical_id: String,
    /// Local version at the time the conflict was detected.
    pub local_version: u64,
    /// Local payload at the time the conflict was detected.
    pub local_snapshot: P,
    /// Server version at the time the conflict was detected (or last
    /// refreshed).
    pub remote_version: u64,
    /// Server payload, when it could be fetched. Refreshed lazily if
    /// absent at resolution time.
    pub remote_snapshot: Option<P>,
}

impl<P: Payload> ConflictCase<P> {
    /// Creates a conflict case for a record of this payload's family.
    pub fn new(
        logical_id: impl Into<String>,
        local_version: u64,
        local_snapshot: P,
        remote_version: u64,
        remote_snapshot: Option<P>,
    ) -> Self {
        Self {
            family: P::FAMILY,
            logical_id: logical_id.into(),
            local_version,
            local_snapshot,
            remote_version,
            remote_snapshot,
        }
    }
}
