//! Local replica records and remote wire shapes.

use crate::payload::Payload;
use crate::state::{RowKey, SyncState, Timestamp};
use serde::{Deserialize, Serialize};

/// A locally stored replica record.
///
/// The payload is the business data; everything else is sync bookkeeping.
/// `version` is set by the remote store and never decreases locally; a
/// local edit that the server has not acknowledged does not touch it, it
/// only flips `sync_state` to [`SyncState::Pending`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SyncRecord<P: Payload> {
    /// Local primary key; preserved across payload overwrites.
    pub row_key: RowKey,
    /// Stable business key, immutable once assigned.
    pub logical_id: String,
    /// Opaque remote identifier; absent until the first successful push.
    pub server_ref: Option<String>,
    /// Last server-confirmed version counter.
    pub version: u64,
    /// Family-specific business data.
    pub payload: P,
    /// Current sync bookkeeping state.
    pub sync_state: SyncState,
    /// Payload exactly as last confirmed with the server. Used only for
    /// diffing, never transmitted.
    pub last_synced_snapshot: Option<P>,
    /// When the record last reached `synced`.
    pub last_synced_at: Option<Timestamp>,
}

impl<P: Payload> SyncRecord<P> {
    /// Creates a record from a local user action: never pushed, no server
    /// identity yet, pending from birth.
    pub fn local_draft(logical_id: impl Into<String>, payload: P) -> Self {
        Self {
            row_key: RowKey::new(),
            logical_id: logical_id.into(),
            server_ref: None,
            version: 0,
            payload,
            sync_state: SyncState::Pending,
            last_synced_snapshot: None,
            last_synced_at: None,
        }
    }

    /// Materializes a record from a pulled remote copy.
    ///
    /// Returns `None` for tombstones and for malformed records without a
    /// payload.
    pub fn from_remote(remote: &RemoteRecord<P>) -> Option<Self> {
        if remote.is_tombstone() {
            return None;
        }
        let payload = remote.payload.clone()?;
        Some(Self {
            row_key: RowKey::new(),
            logical_id: remote.logical_id.clone(),
            server_ref: Some(remote.server_ref.clone()),
            version: remote.version,
            payload: payload.clone(),
            sync_state: SyncState::Synced,
            last_synced_snapshot: Some(payload),
            last_synced_at: Some(Timestamp::now()),
        })
    }

    /// Records a successful sync: adopts the confirmed version, replaces
    /// the snapshot, and flips to `synced` in one step so the snapshot can
    /// never disagree with the state.
    pub fn mark_synced(&mut self, version: u64, snapshot: P, at: Timestamp) {
        self.version = version;
        self.last_synced_snapshot = Some(snapshot);
        self.last_synced_at = Some(at);
        self.sync_state = SyncState::Synced;
    }

    /// Flags a local edit: bookkeeping only, the version is untouched.
    pub fn mark_pending(&mut self) {
        self.sync_state = SyncState::Pending;
    }

    /// Returns true if this record has never been acknowledged by the
    /// server.
    pub fn is_unborn(&self) -> bool {
        self.server_ref.is_none()
    }
}

/// Lifecycle status of a remote record as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    /// The record is live.
    Active,
    /// The record was deleted server-side; the fetch payload carries the
    /// deletion as a tombstone rather than a separate delete call.
    Deleted,
}

/// A record as returned by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct RemoteRecord<P: Payload> {
    /// Stable business key.
    pub logical_id: String,
    /// Server-side identifier used for updates.
    pub server_ref: String,
    /// Server version counter.
    pub version: u64,
    /// Live or tombstoned.
    pub status: RemoteStatus,
    /// Server-side last-modified time; drives the pull watermark.
    pub updated_at: Timestamp,
    /// Business payload; absent on tombstones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<P>,
}

impl<P: Payload> RemoteRecord<P> {
    /// Returns true if the server reported this record as deleted.
    pub fn is_tombstone(&self) -> bool {
        self.status == RemoteStatus::Deleted
    }
}

/// One page of an incremental fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct RemotePage<P: Payload> {
    /// Records in this page, ordered by `updated_at`.
    pub items: Vec<RemoteRecord<P>>,
    /// Whether another page is available.
    pub has_more: bool,
}

impl<P: Payload> RemotePage<P> {
    /// An empty terminal page.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::EntityPayload;

    fn remote(version: u64, status: RemoteStatus) -> RemoteRecord<EntityPayload> {
        RemoteRecord {
            logical_id: "entity-1".into(),
            server_ref: "srv-1".into(),
            version,
            status,
            updated_at: Timestamp::from_millis(1_000),
            payload: match status {
                RemoteStatus::Active => Some(EntityPayload {
                    name: "somewhere".into(),
                    ..EntityPayload::default()
                }),
                RemoteStatus::Deleted => None,
            },
        }
    }

    #[test]
    fn local_draft_starts_pending_and_unborn() {
        let record = SyncRecord::local_draft("entity-1", EntityPayload::default());
        assert!(record.is_unborn());
        assert_eq!(record.version, 0);
        assert_eq!(record.sync_state, SyncState::Pending);
        assert!(record.last_synced_snapshot.is_none());
    }

    #[test]
    fn from_remote_snapshots_the_payload() {
        let record = SyncRecord::from_remote(&remote(5, RemoteStatus::Active)).unwrap();
        assert_eq!(record.version, 5);
        assert_eq!(record.sync_state, SyncState::Synced);
        assert_eq!(
            record.last_synced_snapshot.as_ref(),
            Some(&record.payload)
        );
        assert_eq!(record.server_ref.as_deref(), Some("srv-1"));
    }

    #[test]
    fn from_remote_rejects_tombstones() {
        assert!(SyncRecord::<EntityPayload>::from_remote(&remote(5, RemoteStatus::Deleted)).is_none());
    }

    #[test]
    fn mark_synced_updates_snapshot_and_state_together() {
        let mut record = SyncRecord::local_draft("entity-1", EntityPayload::default());
        let confirmed = EntityPayload {
            name: "confirmed".into(),
            ..EntityPayload::default()
        };

        record.mark_synced(3, confirmed.clone(), Timestamp::from_millis(42));
        assert_eq!(record.version, 3);
        assert_eq!(record.sync_state, SyncState::Synced);
        assert_eq!(record.last_synced_snapshot, Some(confirmed));
        assert_eq!(record.last_synced_at, Some(Timestamp::from_millis(42)));
    }

    #[test]
    fn mark_pending_keeps_version() {
        let mut record = SyncRecord::from_remote(&remote(7, RemoteStatus::Active)).unwrap();
        record.mark_pending();
        assert_eq!(record.version, 7);
        assert_eq!(record.sync_state, SyncState::Pending);
    }
}
