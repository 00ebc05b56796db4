//! Local store abstraction and the in-memory implementation.

use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use std::cmp::Reverse;
use tidemark_model::{Payload, RowKey, SyncRecord, SyncState, Timestamp};

/// The local record store for one family, the engine's only shared
/// mutable resource.
///
/// Implementations must keep single-record writes atomic (two writes to
/// the same logical key never interleave) and must persist the pull
/// cursor alongside the records so a restart resumes incrementally.
pub trait LocalStore<P: Payload>: Send + Sync {
    /// Fetches a row by its primary key.
    fn get(&self, row_key: RowKey) -> StoreResult<Option<SyncRecord<P>>>;

    /// Fetches the canonical row for a logical id (see
    /// [`pick_canonical`] for how duplicates are ranked).
    fn get_by_logical_id(&self, logical_id: &str) -> StoreResult<Option<SyncRecord<P>>>;

    /// Fetches every row sharing a logical id. More than one row is a
    /// known corruption mode repaired by [`collapse_duplicate_rows`].
    fn all_by_logical_id(&self, logical_id: &str) -> StoreResult<Vec<SyncRecord<P>>>;

    /// Fetches every row.
    fn all(&self) -> StoreResult<Vec<SyncRecord<P>>>;

    /// Inserts or replaces a row, keyed by its primary key.
    fn put(&self, record: SyncRecord<P>) -> StoreResult<()>;

    /// Replaces an existing row; fails with [`StoreError::RowMissing`]
    /// when the primary key is unknown.
    fn update(&self, record: &SyncRecord<P>) -> StoreResult<()>;

    /// Indexed query by sync state.
    fn by_sync_state(&self, state: SyncState) -> StoreResult<Vec<SyncRecord<P>>>;

    /// Deletes a row by primary key. Deleting a missing row is a no-op.
    fn delete(&self, row_key: RowKey) -> StoreResult<()>;

    /// Deletes many rows; returns how many existed.
    fn bulk_delete(&self, row_keys: &[RowKey]) -> StoreResult<usize>;

    /// Number of rows held.
    fn count(&self) -> StoreResult<usize>;

    /// Loads the persisted pull watermark for this family.
    fn load_cursor(&self) -> StoreResult<Option<Timestamp>>;

    /// Persists the pull watermark for this family.
    fn save_cursor(&self, cursor: Timestamp) -> StoreResult<()>;
}

/// Ranks duplicate rows and returns the one to keep: rows with a
/// `server_ref` beat unborn ones, higher versions beat lower, and the row
/// key breaks remaining ties deterministically.
pub fn pick_canonical<P: Payload>(mut rows: Vec<SyncRecord<P>>) -> Option<SyncRecord<P>> {
    rows.sort_by_key(|r| (Reverse(r.server_ref.is_some()), Reverse(r.version), r.row_key));
    rows.into_iter().next()
}

/// Collapses duplicate rows sharing a logical id down to the canonical
/// one. Returns the number of rows removed.
///
/// This is the consistency repair that must run before conflict
/// resolution, so a resolution never acts on a stale duplicate.
pub fn collapse_duplicate_rows<P, S>(store: &S) -> StoreResult<usize>
where
    P: Payload,
    S: LocalStore<P>,
{
    use std::collections::BTreeMap;

    let mut by_logical_id: BTreeMap<String, Vec<SyncRecord<P>>> = BTreeMap::new();
    for record in store.all()? {
        by_logical_id
            .entry(record.logical_id.clone())
            .or_default()
            .push(record);
    }

    let mut doomed = Vec::new();
    for (logical_id, rows) in by_logical_id {
        if rows.len() < 2 {
            continue;
        }
        tracing::warn!(
            logical_id = %logical_id,
            rows = rows.len(),
            "collapsing duplicate local rows"
        );
        let keys: Vec<RowKey> = rows.iter().map(|r| r.row_key).collect();
        if let Some(keeper) = pick_canonical(rows) {
            doomed.extend(keys.into_iter().filter(|k| *k != keeper.row_key));
        }
    }

    store.bulk_delete(&doomed)
}

struct MemoryInner<P: Payload> {
    rows: RwLock<std::collections::BTreeMap<RowKey, SyncRecord<P>>>,
    cursor: RwLock<Option<Timestamp>>,
}

/// An in-memory [`LocalStore`], used in tests and as a reference for real
/// backends. Clones share the underlying rows and cursor, so a test can
/// keep a handle to a store owned by the engine.
pub struct MemoryStore<P: Payload> {
    inner: std::sync::Arc<MemoryInner<P>>,
}

impl<P: Payload> Clone for MemoryStore<P> {
    fn clone(&self) -> Self {
        Self {
            inner: std::sync::Arc::clone(&self.inner),
        }
    }
}

impl<P: Payload> MemoryStore<P> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(MemoryInner {
                rows: RwLock::new(std::collections::BTreeMap::new()),
                cursor: RwLock::new(None),
            }),
        }
    }
}

impl<P: Payload> Default for MemoryStore<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Payload> LocalStore<P> for MemoryStore<P> {
    fn get(&self, row_key: RowKey) -> StoreResult<Option<SyncRecord<P>>> {
        Ok(self.inner.rows.read().get(&row_key).cloned())
    }

    fn get_by_logical_id(&self, logical_id: &str) -> StoreResult<Option<SyncRecord<P>>> {
        Ok(pick_canonical(self.all_by_logical_id(logical_id)?))
    }

    fn all_by_logical_id(&self, logical_id: &str) -> StoreResult<Vec<SyncRecord<P>>> {
        Ok(self
            .inner
            .rows
            .read()
            .values()
            .filter(|r| r.logical_id == logical_id)
            .cloned()
            .collect())
    }

    fn all(&self) -> StoreResult<Vec<SyncRecord<P>>> {
        Ok(self.inner.rows.read().values().cloned().collect())
    }

    fn put(&self, record: SyncRecord<P>) -> StoreResult<()> {
        self.inner.rows.write().insert(record.row_key, record);
        Ok(())
    }

    fn update(&self, record: &SyncRecord<P>) -> StoreResult<()> {
        let mut rows = self.inner.rows.write();
        if !rows.contains_key(&record.row_key) {
            return Err(StoreError::RowMissing(record.row_key.to_string()));
        }
        rows.insert(record.row_key, record.clone());
        Ok(())
    }

    fn by_sync_state(&self, state: SyncState) -> StoreResult<Vec<SyncRecord<P>>> {
        Ok(self
            .inner
            .rows
            .read()
            .values()
            .filter(|r| r.sync_state == state)
            .cloned()
            .collect())
    }

    fn delete(&self, row_key: RowKey) -> StoreResult<()> {
        self.inner.rows.write().remove(&row_key);
        Ok(())
    }

    fn bulk_delete(&self, row_keys: &[RowKey]) -> StoreResult<usize> {
        let mut rows = self.inner.rows.write();
        let mut removed = 0;
        for key in row_keys {
            if rows.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn count(&self) -> StoreResult<usize> {
        Ok(self.inner.rows.read().len())
    }

    fn load_cursor(&self) -> StoreResult<Option<Timestamp>> {
        Ok(*self.inner.cursor.read())
    }

    fn save_cursor(&self, cursor: Timestamp) -> StoreResult<()> {
        *self.inner.cursor.write() = Some(cursor);
        Ok(())
    }
}
