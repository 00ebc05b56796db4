//! Applying pulled remote records against the local replica.

use crate::conflict::ConflictStore;
use crate::error::SyncResult;
use crate::store::LocalStore;
use std::cmp::Ordering;
use tidemark_model::{Payload, RemoteRecord, SyncRecord, SyncState, Timestamp};

/// What happened when one remote record was reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No local counterpart existed; a local copy was created.
    Created,
    /// The remote copy was newer; the local payload was overwritten.
    Updated,
    /// The remote copy was tombstoned; the local copy was deleted.
    Deleted,
    /// Nothing to do: tombstone without a local counterpart, or a
    /// malformed remote record without a payload.
    Skipped,
    /// Versions matched; the copies are already consistent.
    AlreadyConsistent,
    /// The local copy has advanced past what the server last confirmed;
    /// it holds unpushed edits and was left untouched.
    LocalAhead,
    /// The local copy is conflicted; the stored case's remote side was
    /// refreshed instead of overwriting the local payload.
    ConflictRefreshed,
}

/// The version-comparison state machine at the heart of a pull.
///
/// Reconciling is referentially transparent over the version counters, so
/// reprocessing the same remote record twice is a no-op; that is what
/// makes at-least-once page delivery safe.
pub struct Reconciler<'a, P, S>
where
    P: Payload,
    S: LocalStore<P>,
{
    store: &'a S,
    conflicts: &'a ConflictStore<P>,
}

impl<'a, P, S> Reconciler<'a, P, S>
where
    P: Payload,
    S: LocalStore<P>,
{
    /// Creates a reconciler over one family's store.
    pub fn new(store: &'a S, conflicts: &'a ConflictStore<P>) -> Self {
        Self { store, conflicts }
    }

    /// Applies one pulled remote record.
    pub fn apply(&self, remote: &RemoteRecord<P>) -> SyncResult<ReconcileOutcome> {
        let local = self.store.get_by_logical_id(&remote.logical_id)?;

        if remote.is_tombstone() {
            return match local {
                None => Ok(ReconcileOutcome::Skipped),
                Some(record) => {
                    self.store.delete(record.row_key)?;
                    self.conflicts.remove(&remote.logical_id);
                    tracing::debug!(
                        family = %P::FAMILY,
                        logical_id = %remote.logical_id,
                        "tombstone applied"
                    );
                    Ok(ReconcileOutcome::Deleted)
                }
            };
        }

        let Some(mut record) = local else {
            let Some(created) = SyncRecord::from_remote(remote) else {
                tracing::warn!(
                    family = %P::FAMILY,
                    logical_id = %remote.logical_id,
                    "active remote record without payload; skipped"
                );
                return Ok(ReconcileOutcome::Skipped);
            };
            self.store.put(created)?;
            return Ok(ReconcileOutcome::Created);
        };

        match remote.version.cmp(&record.version) {
            Ordering::Greater => {
                if record.sync_state.needs_resolution() {
                    // Overwriting a conflicted record would silently drop
                    // the local side of the collision; keep it and let the
                    // case track the newer server state.
                    self.conflicts.refresh_remote(
                        &remote.logical_id,
                        remote.version,
                        remote.payload.clone(),
                    );
                    return Ok(ReconcileOutcome::ConflictRefreshed);
                }
                let Some(payload) = remote.payload.clone() else {
                    tracing::warn!(
                        family = %P::FAMILY,
                        logical_id = %remote.logical_id,
                        "active remote record without payload; skipped"
                    );
                    return Ok(ReconcileOutcome::Skipped);
                };
                record.payload = payload.clone();
                record.server_ref = Some(remote.server_ref.clone());
                record.mark_synced(remote.version, payload, Timestamp::now());
                self.store.update(&record)?;
                Ok(ReconcileOutcome::Updated)
            }
            Ordering::Equal => Ok(ReconcileOutcome::AlreadyConsistent),
            Ordering::Less => {
                // The local copy knows a newer confirmed version than this
                // (stale or out-of-order) remote copy; it holds unpushed
                // edits. Re-flag it for push, never overwrite.
                if record.sync_state == SyncState::Synced {
                    record.mark_pending();
                    self.store.update(&record)?;
                }
                Ok(ReconcileOutcome::LocalAhead)
            }
        }
    }
}
