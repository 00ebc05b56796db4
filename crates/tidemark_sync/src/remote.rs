//! Remote API abstraction and the scriptable mock used in tests.

use crate::error::{RemoteError, RemoteResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use tidemark_model::{Payload, RemotePage, RemoteRecord, RemoteStatus, Timestamp};

/// The remote authoritative store, one instance per record family.
///
/// This trait abstracts the transport, allowing different implementations
/// (HTTP client, mock for testing, etc.). Every call is a suspension point
/// of the engine: the local store is never touched while a call is in
/// flight.
pub trait RemoteApi<P: Payload>: Send + Sync {
    /// Incremental fetch: records updated strictly after `since`,
    /// paginated via `offset`, newest batch bounded by `limit`.
    fn list(&self, since: Option<Timestamp>, limit: u32, offset: u32)
        -> RemoteResult<RemotePage<P>>;

    /// Fetches one record by its logical id.
    fn get(&self, logical_id: &str) -> RemoteResult<RemoteRecord<P>>;

    /// Creates a record. The server assigns `server_ref` and the initial
    /// version. Fails with [`RemoteError::AlreadyExists`] if the logical
    /// id is taken.
    fn create(&self, logical_id: &str, draft: &P::Patch) -> RemoteResult<RemoteRecord<P>>;

    /// Updates a record by `server_ref`, sending only changed fields.
    ///
    /// `expected_version` is the optimistic-lock token; the server rejects
    /// the write with [`RemoteError::VersionConflict`] when it does not
    /// match. `None` skips the check (unconditional overwrite) and exists
    /// solely for accept-local conflict resolution.
    fn update(
        &self,
        server_ref: &str,
        patch: &P::Patch,
        expected_version: Option<u64>,
    ) -> RemoteResult<RemoteRecord<P>>;
}

/// Per-operation call counters of the mock remote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Number of `list` calls.
    pub list: u32,
    /// Number of `get` calls.
    pub get: u32,
    /// Number of `create` calls.
    pub create: u32,
    /// Number of `update` calls.
    pub update: u32,
}

struct MockState<P: Payload> {
    records: BTreeMap<String, RemoteRecord<P>>,
    clock: i64,
    next_ref: u64,
    list_failures: VecDeque<RemoteError>,
    get_failures: VecDeque<RemoteError>,
    create_failures: VecDeque<RemoteError>,
    update_failures: VecDeque<RemoteError>,
    counts: CallCounts,
}

/// An in-memory remote store double.
///
/// Behaves like a tiny version-counting server: seeded records, version
/// bumps on every write, tombstones delivered through `list`. Individual
/// calls can be scripted to fail, which is how transport faults and
/// lock conflicts are injected in tests. Clones share the underlying
/// server state, so a test can keep a handle to a remote owned by the
/// engine.
pub struct MockRemote<P: Payload> {
    state: std::sync::Arc<Mutex<MockState<P>>>,
}

impl<P: Payload> Clone for MockRemote<P> {
    fn clone(&self) -> Self {
        Self {
            state: std::sync::Arc::clone(&self.state),
        }
    }
}

impl<P: Payload> MockRemote<P> {
    /// Creates an empty mock remote.
    pub fn new() -> Self {
        Self {
            state: std::sync::Arc::new(Mutex::new(MockState {
                records: BTreeMap::new(),
                clock: 1_000_000,
                next_ref: 1,
                list_failures: VecDeque::new(),
                get_failures: VecDeque::new(),
                create_failures: VecDeque::new(),
                update_failures: VecDeque::new(),
                counts: CallCounts::default(),
            })),
        }
    }

    /// Seeds an active record and returns the stored copy.
    pub fn seed(&self, logical_id: &str, payload: P, version: u64) -> RemoteRecord<P> {
        let mut state = self.state.lock();
        let server_ref = format!("srv-{}", state.next_ref);
        state.next_ref += 1;
        state.clock += 1_000;
        let record = RemoteRecord {
            logical_id: logical_id.to_string(),
            server_ref,
            version,
            status: RemoteStatus::Active,
            updated_at: Timestamp::from_millis(state.clock),
            payload: Some(payload),
        };
        state.records.insert(logical_id.to_string(), record.clone());
        record
    }

    /// Tombstones an existing record (or seeds a bare tombstone).
    pub fn seed_tombstone(&self, logical_id: &str) {
        let mut state = self.state.lock();
        state.clock += 1_000;
        let updated_at = Timestamp::from_millis(state.clock);
        if !state.records.contains_key(logical_id) {
            let server_ref = format!("srv-{}", state.next_ref);
            state.next_ref += 1;
            state.records.insert(
                logical_id.to_string(),
                RemoteRecord {
                    logical_id: logical_id.to_string(),
                    server_ref,
                    version: 0,
                    status: RemoteStatus::Deleted,
                    updated_at,
                    payload: None,
                },
            );
        }
        if let Some(entry) = state.records.get_mut(logical_id) {
            entry.status = RemoteStatus::Deleted;
            entry.payload = None;
            entry.version += 1;
            entry.updated_at = updated_at;
        }
    }

    /// Applies an edit as if another client had pushed it: bumps the
    /// version and the modification time.
    pub fn edit_as_other_client(&self, logical_id: &str, patch: &P::Patch) {
        let mut state = self.state.lock();
        state.clock += 1_000;
        let updated_at = Timestamp::from_millis(state.clock);
        if let Some(record) = state.records.get_mut(logical_id) {
            if let Some(payload) = record.payload.as_mut() {
                payload.apply(patch);
            }
            record.version += 1;
            record.updated_at = updated_at;
        }
    }

    /// Returns the stored copy of a record.
    pub fn record(&self, logical_id: &str) -> Option<RemoteRecord<P>> {
        self.state.lock().records.get(logical_id).cloned()
    }

    /// Number of records held (tombstones included).
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns true if the mock holds no records.
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Returns the call counters.
    pub fn counts(&self) -> CallCounts {
        self.state.lock().counts
    }

    /// Scripts the next `list` call to fail.
    pub fn fail_next_list(&self, error: RemoteError) {
        self.state.lock().list_failures.push_back(error);
    }

    /// Scripts the next `get` call to fail.
    pub fn fail_next_get(&self, error: RemoteError) {
        self.state.lock().get_failures.push_back(error);
    }

    /// Scripts the next `create` call to fail.
    pub fn fail_next_create(&self, error: RemoteError) {
        self.state.lock().create_failures.push_back(error);
    }

    /// Scripts the next `update` call to fail.
    pub fn fail_next_update(&self, error: RemoteError) {
        self.state.lock().update_failures.push_back(error);
    }
}

impl<P: Payload> Default for MockRemote<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Payload + Default> RemoteApi<P> for MockRemote<P> {
    fn list(
        &self,
        since: Option<Timestamp>,
        limit: u32,
        offset: u32,
    ) -> RemoteResult<RemotePage<P>> {
        let mut state = self.state.lock();
        state.counts.list += 1;
        if let Some(error) = state.list_failures.pop_front() {
            return Err(error);
        }

        let mut matching: Vec<&RemoteRecord<P>> = state
            .records
            .values()
            .filter(|r| since.map_or(true, |cursor| r.updated_at > cursor))
            .collect();
        matching.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.logical_id.cmp(&b.logical_id))
        });

        let total = matching.len();
        let start = (offset as usize).min(total);
        let end = (start + limit as usize).min(total);
        let items = matching[start..end].iter().map(|r| (*r).clone()).collect();
        Ok(RemotePage {
            items,
            has_more: end < total,
        })
    }

    fn get(&self, logical_id: &str) -> RemoteResult<RemoteRecord<P>> {
        let mut state = self.state.lock();
        state.counts.get += 1;
        if let Some(error) = state.get_failures.pop_front() {
            return Err(error);
        }
        state
            .records
            .get(logical_id)
            .filter(|r| !r.is_tombstone())
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    fn create(&self, logical_id: &str, draft: &P::Patch) -> RemoteResult<RemoteRecord<P>> {
        let mut state = self.state.lock();
        state.counts.create += 1;
        if let Some(error) = state.create_failures.pop_front() {
            return Err(error);
        }
        if state
            .records
            .get(logical_id)
            .is_some_and(|r| !r.is_tombstone())
        {
            return Err(RemoteError::AlreadyExists);
        }

        let mut payload = P::default();
        payload.apply(draft);
        let server_ref = format!("srv-{}", state.next_ref);
        state.next_ref += 1;
        state.clock += 1_000;
        let record = RemoteRecord {
            logical_id: logical_id.to_string(),
            server_ref,
            version: 1,
            status: RemoteStatus::Active,
            updated_at: Timestamp::from_millis(state.clock),
            payload: Some(payload),
        };
        state.records.insert(logical_id.to_string(), record.clone());
        Ok(record)
    }

    fn update(
        &self,
        server_ref: &str,
        patch: &P::Patch,
        expected_version: Option<u64>,
    ) -> RemoteResult<RemoteRecord<P>> {
        let mut state = self.state.lock();
        state.counts.update += 1;
        if let Some(error) = state.update_failures.pop_front() {
            return Err(error);
        }
        state.clock += 1_000;
        let updated_at = Timestamp::from_millis(state.clock);

        let record = state
            .records
            .values_mut()
            .find(|r| r.server_ref == server_ref && !r.is_tombstone())
            .ok_or(RemoteError::NotFound)?;

        if let Some(expected) = expected_version {
            if expected != record.version {
                return Err(RemoteError::VersionConflict {
                    server_version: record.version,
                });
            }
        }

        if let Some(payload) = record.payload.as_mut() {
            payload.apply(patch);
        }
        record.version += 1;
        record.updated_at = updated_at;
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_model::EntityPayload;

    fn named(name: &str) -> EntityPayload {
        EntityPayload {
            name: name.into(),
            ..EntityPayload::default()
        }
    }

    #[test]
    fn list_pages_in_update_order() {
        let remote = MockRemote::new();
        remote.seed("a", named("a"), 1);
        remote.seed("b", named("b"), 1);
        remote.seed("c", named("c"), 1);

        let page = remote.list(None, 2, 0).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.items[0].logical_id, "a");

        let page = remote.list(None, 2, 2).unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(!page.has_more);
        assert_eq!(page.items[0].logical_id, "c");
    }

    #[test]
    fn list_filters_strictly_after_cursor() {
        let remote = MockRemote::new();
        let first = remote.seed("a", named("a"), 1);
        remote.seed("b", named("b"), 1);

        let page = remote.list(Some(first.updated_at), 10, 0).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].logical_id, "b");
    }

    #[test]
    fn create_rejects_taken_ids() {
        let remote: MockRemote<EntityPayload> = MockRemote::new();
        remote.seed("a", named("a"), 1);

        let draft = named("duplicate").diff_from(None);
        assert!(matches!(
            remote.create("a", &draft),
            Err(RemoteError::AlreadyExists)
        ));
    }

    #[test]
    fn update_enforces_the_lock_token() {
        let remote: MockRemote<EntityPayload> = MockRemote::new();
        let seeded = remote.seed("a", named("a"), 3);

        let patch = EntityPayload::default().diff_from(None);
        let err = remote
            .update(&seeded.server_ref, &patch, Some(2))
            .unwrap_err();
        assert!(matches!(
            err,
            RemoteError::VersionConflict { server_version: 3 }
        ));

        let updated = remote.update(&seeded.server_ref, &patch, Some(3)).unwrap();
        assert_eq!(updated.version, 4);

        // Unconditional overwrite skips the check entirely.
        let forced = remote.update(&seeded.server_ref, &patch, None).unwrap();
        assert_eq!(forced.version, 5);
    }

    #[test]
    fn scripted_failures_fire_once() {
        let remote: MockRemote<EntityPayload> = MockRemote::new();
        remote.fail_next_list(RemoteError::transport_retryable("flaky"));

        assert!(remote.list(None, 10, 0).is_err());
        assert!(remote.list(None, 10, 0).is_ok());
        assert_eq!(remote.counts().list, 2);
    }

    #[test]
    fn tombstones_show_up_in_list_but_not_get() {
        let remote = MockRemote::new();
        remote.seed("a", named("a"), 1);
        remote.seed_tombstone("a");

        let page = remote.list(None, 10, 0).unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.items[0].is_tombstone());

        assert!(matches!(remote.get("a"), Err(RemoteError::NotFound)));
    }
}
