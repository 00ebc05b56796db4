//! Conflicted records: bookkeeping and resolution.

use crate::error::{RemoteError, SyncError, SyncResult};
use crate::remote::RemoteApi;
use crate::store::{collapse_duplicate_rows, LocalStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tidemark_model::{ConflictCase, Patch, Payload, Resolution, SyncRecord, Timestamp};

/// Holds the conflict cases of one record family and performs their
/// resolution.
///
/// A record flagged `conflict` is excluded from automatic push until one
/// of the three strategies is applied to it. The case keeps both sides of
/// the collision so resolution can run even after the store rows have
/// moved on; a missing remote side is re-fetched lazily.
pub struct ConflictStore<P: Payload> {
    cases: RwLock<BTreeMap<String, ConflictCase<P>>>,
}

impl<P: Payload> ConflictStore<P> {
    /// Creates an empty conflict store.
    pub fn new() -> Self {
        Self {
            cases: RwLock::new(BTreeMap::new()),
        }
    }

    /// Records a detected conflict. A newer detection for the same record
    /// replaces the older case.
    pub fn record_case(&self, case: ConflictCase<P>) {
        tracing::info!(
            family = %case.family,
            logical_id = %case.logical_id,
            local_version = case.local_version,
            remote_version = case.remote_version,
            "conflict recorded"
        );
        self.cases.write().insert(case.logical_id.clone(), case);
    }

    /// Refreshes the remote side of an existing case, e.g. when a pull
    /// reveals the server moved past a conflicted record.
    pub fn refresh_remote(&self, logical_id: &str, version: u64, snapshot: Option<P>) {
        if let Some(case) = self.cases.write().get_mut(logical_id) {
            case.remote_version = version;
            if snapshot.is_some() {
                case.remote_snapshot = snapshot;
            }
        }
    }

    /// Returns the case for a record, if any.
    pub fn case(&self, logical_id: &str) -> Option<ConflictCase<P>> {
        self.cases.read().get(logical_id).cloned()
    }

    /// Drops the case for a record.
    pub fn remove(&self, logical_id: &str) {
        self.cases.write().remove(logical_id);
    }

    /// All cases, ordered by logical id.
    pub fn cases(&self) -> Vec<ConflictCase<P>> {
        self.cases.read().values().cloned().collect()
    }

    /// Number of open cases.
    pub fn len(&self) -> usize {
        self.cases.read().len()
    }

    /// Returns true when no conflicts are open.
    pub fn is_empty(&self) -> bool {
        self.cases.read().is_empty()
    }

    /// Resolves a conflicted record with the given strategy.
    ///
    /// Duplicate local rows for the logical id are collapsed first, so the
    /// resolution never acts on a stale duplicate. On success the record
    /// leaves the `conflict` state and the case is dropped; a resolution
    /// that races yet another server write leaves the case in place with a
    /// refreshed remote side and returns the error.
    pub fn resolve<R, S>(
        &self,
        remote: &R,
        store: &S,
        logical_id: &str,
        strategy: Resolution,
    ) -> SyncResult<SyncRecord<P>>
    where
        R: RemoteApi<P>,
        S: LocalStore<P>,
    {
        collapse_duplicate_rows(store)?;

        let record = store
            .get_by_logical_id(logical_id)?
            .filter(|r| r.sync_state.needs_resolution())
            .ok_or_else(|| SyncError::UnknownConflict {
                family: P::FAMILY,
                logical_id: logical_id.to_string(),
            })?;

        tracing::info!(
            family = %P::FAMILY,
            logical_id = %logical_id,
            strategy = ?strategy,
            "resolving conflict"
        );

        let resolved = match strategy {
            Resolution::Local => self.resolve_local(remote, record),
            Resolution::Remote => self.resolve_remote(remote, record),
            Resolution::Merge => self.resolve_merge(remote, record),
        }?;

        store.update(&resolved)?;
        self.remove(logical_id);
        Ok(resolved)
    }

    /// Force-pushes the local payload with no version check, then adopts
    /// the server's returned version.
    fn resolve_local<R>(&self, remote: &R, mut record: SyncRecord<P>) -> SyncResult<SyncRecord<P>>
    where
        R: RemoteApi<P>,
    {
        let draft = record.payload.diff_from(None);
        let response = match &record.server_ref {
            Some(server_ref) => match remote.update(server_ref, &draft, None) {
                Ok(response) => response,
                // Server purged the record; re-create it.
                Err(RemoteError::NotFound) => remote.create(&record.logical_id, &draft)?,
                Err(error) => return Err(error.into()),
            },
            None => remote.create(&record.logical_id, &draft)?,
        };

        record.server_ref = Some(response.server_ref.clone());
        let snapshot = response.payload.unwrap_or_else(|| record.payload.clone());
        record.mark_synced(response.version, snapshot, Timestamp::now());
        Ok(record)
    }

    /// Discards the local payload; adopts the remote payload and version
    /// verbatim, preserving the local row key.
    fn resolve_remote<R>(&self, remote: &R, mut record: SyncRecord<P>) -> SyncResult<SyncRecord<P>>
    where
        R: RemoteApi<P>,
    {
        let (version, payload, server_ref) = self.remote_side(remote, &record.logical_id)?;
        if let Some(server_ref) = server_ref {
            record.server_ref = Some(server_ref);
        }
        record.payload = payload.clone();
        record.mark_synced(version, payload, Timestamp::now());
        Ok(record)
    }

    /// Field-level union with local precedence, pushed with the remote's
    /// version as the lock token (the remote is the most recent confirmed
    /// state).
    fn resolve_merge<R>(&self, remote: &R, mut record: SyncRecord<P>) -> SyncResult<SyncRecord<P>>
    where
        R: RemoteApi<P>,
    {
        let (remote_version, remote_payload, fetched_ref) =
            self.remote_side(remote, &record.logical_id)?;
        let server_ref = record
            .server_ref
            .clone()
            .or(fetched_ref)
            .ok_or_else(|| SyncError::UnknownConflict {
                family: P::FAMILY,
                logical_id: record.logical_id.clone(),
            })?;

        let merged = record.payload.merged_onto(&remote_payload);
        let patch = merged.diff_from(Some(&remote_payload));

        if patch.is_empty() {
            // The union adds nothing over the server copy; adopt it.
            record.server_ref = Some(server_ref);
            record.payload = merged;
            record.mark_synced(remote_version, remote_payload, Timestamp::now());
            return Ok(record);
        }

        match remote.update(&server_ref, &patch, Some(remote_version)) {
            Ok(response) => {
                record.server_ref = Some(server_ref);
                let snapshot = response.payload.unwrap_or_else(|| merged.clone());
                record.payload = merged;
                record.mark_synced(response.version, snapshot, Timestamp::now());
                Ok(record)
            }
            Err(RemoteError::VersionConflict { server_version }) => {
                // The server moved again mid-resolution. Refresh the case
                // and leave the record conflicted for another attempt.
                let latest = remote.get(&record.logical_id).ok();
                self.refresh_remote(
                    &record.logical_id,
                    latest.as_ref().map_or(server_version, |r| r.version),
                    latest.and_then(|r| r.payload),
                );
                Err(RemoteError::VersionConflict { server_version }.into())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// The server's current side of a case: from the stored case when
    /// complete, otherwise fetched.
    fn remote_side<R>(
        &self,
        remote: &R,
        logical_id: &str,
    ) -> SyncResult<(u64, P, Option<String>)>
    where
        R: RemoteApi<P>,
    {
        if let Some(case) = self.case(logical_id) {
            if let Some(snapshot) = case.remote_snapshot {
                return Ok((case.remote_version, snapshot, None));
            }
        }
        let fetched = remote.get(logical_id)?;
        let payload = fetched.payload.ok_or(RemoteError::NotFound)?;
        Ok((fetched.version, payload, Some(fetched.server_ref)))
    }
}

impl<P: Payload> Default for ConflictStore<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemote;
    use crate::store::MemoryStore;
    use tidemark_model::{EntityPayload, SyncState};

    fn named(name: &str) -> EntityPayload {
        EntityPayload {
            name: name.into(),
            ..EntityPayload::default()
        }
    }

    /// Installs a conflicted record: server at version 6 with one payload,
    /// local at version 5 with another.
    fn conflicted_fixture() -> (
        MockRemote<EntityPayload>,
        MemoryStore<EntityPayload>,
        ConflictStore<EntityPayload>,
    ) {
        let remote = MockRemote::new();
        let server = remote.seed("entity-1", named("server copy"), 6);

        let store = MemoryStore::new();
        let mut record = SyncRecord::local_draft("entity-1", named("local copy"));
        record.server_ref = Some(server.server_ref.clone());
        record.version = 5;
        record.sync_state = SyncState::Conflict;
        store.put(record.clone()).unwrap();

        let conflicts = ConflictStore::new();
        conflicts.record_case(ConflictCase::new(
            "entity-1",
            5,
            record.payload,
            6,
            server.payload,
        ));

        (remote, store, conflicts)
    }

    #[test]
    fn list_and_remove_cases() {
        let conflicts: ConflictStore<EntityPayload> = ConflictStore::new();
        assert!(conflicts.is_empty());

        conflicts.record_case(ConflictCase::new("b", 1, named("b"), 2, None));
        conflicts.record_case(ConflictCase::new("a", 1, named("a"), 2, None));
        assert_eq!(conflicts.len(), 2);
        let ids: Vec<_> = conflicts.cases().iter().map(|c| c.logical_id.clone()).collect();
        assert_eq!(ids, ["a", "b"]);

        conflicts.remove("a");
        assert_eq!(conflicts.len(), 1);
    }

    #[test]
    fn accept_local_force_pushes_without_lock() {
        let (remote, store, conflicts) = conflicted_fixture();

        let resolved = conflicts
            .resolve(&remote, &store, "entity-1", Resolution::Local)
            .unwrap();

        assert_eq!(resolved.sync_state, SyncState::Synced);
        assert_eq!(resolved.version, 7);
        let server = remote.record("entity-1").unwrap();
        assert_eq!(server.payload.unwrap().name, "local copy");
        assert!(conflicts.is_empty());
    }

    #[test]
    fn accept_remote_adopts_server_copy_and_keeps_row_key() {
        let (remote, store, conflicts) = conflicted_fixture();
        let row_key = store
            .get_by_logical_id("entity-1")
            .unwrap()
            .unwrap()
            .row_key;

        let resolved = conflicts
            .resolve(&remote, &store, "entity-1", Resolution::Remote)
            .unwrap();

        assert_eq!(resolved.row_key, row_key);
        assert_eq!(resolved.payload.name, "server copy");
        assert_eq!(resolved.version, 6);
        assert_eq!(resolved.sync_state, SyncState::Synced);
        // No write went to the server.
        assert_eq!(remote.counts().update, 0);
        assert_eq!(remote.record("entity-1").unwrap().version, 6);
    }

    #[test]
    fn merge_pushes_union_with_remote_lock_token() {
        let (remote, store, conflicts) = conflicted_fixture();

        let resolved = conflicts
            .resolve(&remote, &store, "entity-1", Resolution::Merge)
            .unwrap();

        // Local precedence on the contested field.
        assert_eq!(resolved.payload.name, "local copy");
        assert_eq!(resolved.version, 7);
        assert_eq!(resolved.sync_state, SyncState::Synced);
        assert_eq!(remote.record("entity-1").unwrap().version, 7);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn merge_raced_by_another_write_stays_conflicted() {
        let (remote, store, conflicts) = conflicted_fixture();
        // The case says version 6, but the server has moved to 7.
        remote.edit_as_other_client("entity-1", &named("even newer").diff_from(None));

        let err = conflicts
            .resolve(&remote, &store, "entity-1", Resolution::Merge)
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Remote(RemoteError::VersionConflict { .. })
        ));

        let record = store.get_by_logical_id("entity-1").unwrap().unwrap();
        assert_eq!(record.sync_state, SyncState::Conflict);
        // The case was refreshed with the latest server side.
        let case = conflicts.case("entity-1").unwrap();
        assert_eq!(case.remote_version, 7);
    }

    #[test]
    fn resolve_collapses_duplicate_rows_first() {
        let (remote, store, conflicts) = conflicted_fixture();
        // A stale duplicate with no server identity.
        store
            .put(SyncRecord::local_draft("entity-1", named("stale dup")))
            .unwrap();
        assert_eq!(store.count().unwrap(), 2);

        conflicts
            .resolve(&remote, &store, "entity-1", Resolution::Remote)
            .unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn resolving_an_unknown_record_fails() {
        let remote: MockRemote<EntityPayload> = MockRemote::new();
        let store: MemoryStore<EntityPayload> = MemoryStore::new();
        let conflicts = ConflictStore::new();

        let err = conflicts
            .resolve(&remote, &store, "nope", Resolution::Local)
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownConflict { .. }));
    }

    #[test]
    fn missing_remote_side_is_fetched_lazily() {
        let (remote, store, conflicts) = conflicted_fixture();
        // Simulate a restart: the in-memory case lost its remote side.
        conflicts.record_case(ConflictCase::new(
            "entity-1",
            5,
            named("local copy"),
            6,
            None,
        ));

        let resolved = conflicts
            .resolve(&remote, &store, "entity-1", Resolution::Remote)
            .unwrap();
        assert_eq!(resolved.payload.name, "server copy");
        assert_eq!(remote.counts().get, 1);
    }
}
