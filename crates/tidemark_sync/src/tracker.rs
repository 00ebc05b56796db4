//! Change tracking: minimal diffs against the last-synced snapshot.

use tidemark_model::{Patch, Payload, SyncRecord};

/// Computes the fields of a record that still need to reach the server.
///
/// Pure function over the record's payload and its last-synced snapshot.
/// With no snapshot (first sync) this is the full writable payload; with a
/// snapshot it is only the fields whose deep equality against it fails.
/// Identity keys travel beside the patch in the remote call, so an empty
/// patch means the push can skip the network entirely and flip the record
/// back to synced.
pub fn diff<P: Payload>(record: &SyncRecord<P>) -> P::Patch {
    record.payload.diff_from(record.last_synced_snapshot.as_ref())
}

/// Returns true if the record carries changes the server has not seen.
pub fn has_unsynced_changes<P: Payload>(record: &SyncRecord<P>) -> bool {
    !diff(record).is_empty()
}
