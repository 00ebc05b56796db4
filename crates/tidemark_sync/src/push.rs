//! Pushing locally pending records to the remote store.

use crate::conflict::ConflictStore;
use crate::error::{RemoteError, SyncResult};
use crate::remote::RemoteApi;
use crate::store::LocalStore;
use crate::tracker;
use tidemark_model::{ConflictCase, Patch, Payload, SyncRecord, SyncState, Timestamp};

/// Hook that lets the orchestrator trim a patch before it is sent, e.g.
/// withholding a curation's linkage field while the referenced entity has
/// no server identity yet. Withheld fields keep the record pending so
/// they go out on a later cycle.
pub type PatchGuard<'g, P> =
    &'g (dyn Fn(&SyncRecord<P>, <P as Payload>::Patch) -> <P as Payload>::Patch + Send + Sync);

/// What happened when one pending record was pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The record was created server-side for the first time.
    Created,
    /// The record was updated under its optimistic-lock token.
    Updated,
    /// The diff was empty; the record flipped to synced with zero network
    /// calls.
    NoChanges,
    /// A prior partially-acknowledged create was discovered server-side;
    /// its identity was adopted and the pending diff applied.
    RecoveredDuplicate,
    /// The server rejected the lock token; the record moved to the
    /// conflict store.
    Conflicted,
    /// The record stays pending for the next cycle.
    Deferred {
        /// Why the push did not complete.
        reason: String,
    },
    /// Duplicate resolution failed unrecoverably; the record was marked
    /// `error` and is excluded from automatic push.
    Abandoned {
        /// Why resolution failed.
        reason: String,
    },
}

/// Per-family summary of one push pass.
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    /// Records created server-side.
    pub created: u64,
    /// Records updated server-side.
    pub updated: u64,
    /// Records whose empty diff skipped the network entirely.
    pub no_ops: u64,
    /// Duplicate creates recovered by adopting the existing server record.
    pub recovered: u64,
    /// Logical ids newly moved to the conflict store.
    pub conflicts: Vec<String>,
    /// Records left pending, with the reason.
    pub deferred: Vec<(String, String)>,
    /// Records that hit a hard per-record failure (store errors,
    /// abandoned duplicates).
    pub failed: Vec<(String, String)>,
}

impl PushReport {
    /// Total records that reached the server this pass.
    pub fn pushed(&self) -> u64 {
        self.created + self.updated + self.recovered
    }

    fn absorb(&mut self, logical_id: &str, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Created => self.created += 1,
            PushOutcome::Updated => self.updated += 1,
            PushOutcome::NoChanges => self.no_ops += 1,
            PushOutcome::RecoveredDuplicate => self.recovered += 1,
            PushOutcome::Conflicted => self.conflicts.push(logical_id.to_string()),
            PushOutcome::Deferred { reason } => {
                self.deferred.push((logical_id.to_string(), reason));
            }
            PushOutcome::Abandoned { reason } => {
                self.failed.push((logical_id.to_string(), reason));
            }
        }
    }
}

/// Pushes every record with `sync_state = pending`, one at a time.
///
/// Each record's failure is handled individually so one bad record cannot
/// block the rest of the batch; only a store-level failure to enumerate
/// the pending set aborts the family's push.
pub struct PushEngine<'a, P, R, S>
where
    P: Payload,
    R: RemoteApi<P>,
    S: LocalStore<P>,
{
    remote: &'a R,
    store: &'a S,
    conflicts: &'a ConflictStore<P>,
    patch_guard: Option<PatchGuard<'a, P>>,
}

impl<'a, P, R, S> PushEngine<'a, P, R, S>
where
    P: Payload,
    R: RemoteApi<P>,
    S: LocalStore<P>,
{
    /// Creates a push engine over one family.
    pub fn new(remote: &'a R, store: &'a S, conflicts: &'a ConflictStore<P>) -> Self {
        Self {
            remote,
            store,
            conflicts,
            patch_guard: None,
        }
    }

    /// Installs a patch guard (see [`PatchGuard`]).
    pub fn with_patch_guard(mut self, guard: PatchGuard<'a, P>) -> Self {
        self.patch_guard = Some(guard);
        self
    }

    /// Pushes all pending records of this family.
    pub fn push_pending(&self) -> SyncResult<PushReport> {
        let pending = self.store.by_sync_state(SyncState::Pending)?;
        let mut report = PushReport::default();

        for record in pending {
            let logical_id = record.logical_id.clone();
            match self.push_one(record) {
                Ok(outcome) => report.absorb(&logical_id, outcome),
                Err(error) => {
                    tracing::warn!(
                        family = %P::FAMILY,
                        logical_id = %logical_id,
                        error = %error,
                        "push failed for record"
                    );
                    report.failed.push((logical_id, error.to_string()));
                }
            }
        }

        Ok(report)
    }

    fn guarded(&self, record: &SyncRecord<P>, patch: P::Patch) -> P::Patch {
        match self.patch_guard {
            Some(guard) => guard(record, patch),
            None => patch,
        }
    }

    fn push_one(&self, mut record: SyncRecord<P>) -> SyncResult<PushOutcome> {
        let full_patch = tracker::diff(&record);
        let patch = self.guarded(&record, full_patch.clone());
        let withheld = patch != full_patch;

        match record.server_ref.clone() {
            None => self.push_create(record, patch, withheld),
            Some(server_ref) => {
                if full_patch.is_empty() {
                    // Nothing unsent at all; no network call needed.
                    let snapshot = record
                        .last_synced_snapshot
                        .clone()
                        .unwrap_or_else(|| record.payload.clone());
                    let version = record.version;
                    record.mark_synced(version, snapshot, Timestamp::now());
                    self.store.update(&record)?;
                    Ok(PushOutcome::NoChanges)
                } else if patch.is_empty() {
                    // Everything unsent is currently withheld by the guard.
                    Ok(PushOutcome::Deferred {
                        reason: "all changed fields withheld".into(),
                    })
                } else {
                    self.push_update(record, server_ref, patch, withheld)
                }
            }
        }
    }

    fn push_create(
        &self,
        record: SyncRecord<P>,
        patch: P::Patch,
        withheld: bool,
    ) -> SyncResult<PushOutcome> {
        match self.remote.create(&record.logical_id, &patch) {
            Ok(response) => {
                self.finish(record, response, withheld)?;
                Ok(PushOutcome::Created)
            }
            Err(RemoteError::AlreadyExists) => self.recover_duplicate(record, patch, withheld),
            Err(error) => self.defer(&record, error),
        }
    }

    fn push_update(
        &self,
        mut record: SyncRecord<P>,
        server_ref: String,
        patch: P::Patch,
        withheld: bool,
    ) -> SyncResult<PushOutcome> {
        match self.remote.update(&server_ref, &patch, Some(record.version)) {
            Ok(response) => {
                self.finish(record, response, withheld)?;
                Ok(PushOutcome::Updated)
            }
            Err(RemoteError::VersionConflict { server_version }) => {
                let latest = self.remote.get(&record.logical_id).ok();
                self.conflicts.record_case(ConflictCase::new(
                    record.logical_id.clone(),
                    record.version,
                    record.payload.clone(),
                    latest.as_ref().map_or(server_version, |r| r.version),
                    latest.and_then(|r| r.payload),
                ));
                record.sync_state = SyncState::Conflict;
                self.store.update(&record)?;
                Ok(PushOutcome::Conflicted)
            }
            Err(RemoteError::NotFound) => {
                // The server record was purged; fall back to a create with
                // the full payload.
                record.server_ref = None;
                let full = record.payload.diff_from(None);
                let guarded = self.guarded(&record, full.clone());
                let withheld = guarded != full;
                self.push_create(record, guarded, withheld)
            }
            Err(error) => self.defer(&record, error),
        }
    }

    /// Recovers from a server-side duplicate left by a prior
    /// partially-acknowledged create: adopt the existing record's
    /// identity, retry the pending diff once, and never create twice.
    fn recover_duplicate(
        &self,
        mut record: SyncRecord<P>,
        patch: P::Patch,
        withheld: bool,
    ) -> SyncResult<PushOutcome> {
        match self.remote.get(&record.logical_id) {
            Ok(existing) => {
                record.server_ref = Some(existing.server_ref.clone());
                match self
                    .remote
                    .update(&existing.server_ref, &patch, Some(existing.version))
                {
                    Ok(response) => {
                        self.finish(record, response, withheld)?;
                        Ok(PushOutcome::RecoveredDuplicate)
                    }
                    Err(retry_error) => {
                        // Keep the adopted identity so the next cycle
                        // retries as a plain update.
                        record.version = existing.version;
                        self.store.update(&record)?;
                        tracing::warn!(
                            family = %P::FAMILY,
                            logical_id = %record.logical_id,
                            error = %retry_error,
                            "duplicate recovered but retry failed; left pending"
                        );
                        Ok(PushOutcome::Deferred {
                            reason: retry_error.to_string(),
                        })
                    }
                }
            }
            Err(lookup_error) => {
                // The server claims the record exists but it cannot be
                // found; the only state the engine ever abandons in.
                record.sync_state = SyncState::Error;
                self.store.update(&record)?;
                tracing::error!(
                    family = %P::FAMILY,
                    logical_id = %record.logical_id,
                    error = %lookup_error,
                    "duplicate resolution failed; record marked error"
                );
                Ok(PushOutcome::Abandoned {
                    reason: lookup_error.to_string(),
                })
            }
        }
    }

    fn defer(&self, record: &SyncRecord<P>, error: RemoteError) -> SyncResult<PushOutcome> {
        match &error {
            RemoteError::Validation(message) => tracing::warn!(
                family = %P::FAMILY,
                logical_id = %record.logical_id,
                message = %message,
                "payload rejected by write schema; pending until the payload is fixed"
            ),
            other => tracing::warn!(
                family = %P::FAMILY,
                logical_id = %record.logical_id,
                error = %other,
                retryable = other.is_retryable(),
                "push failed; next cycle will retry"
            ),
        }
        Ok(PushOutcome::Deferred {
            reason: error.to_string(),
        })
    }

    fn finish(
        &self,
        mut record: SyncRecord<P>,
        response: tidemark_model::RemoteRecord<P>,
        withheld: bool,
    ) -> SyncResult<()> {
        record.server_ref = Some(response.server_ref.clone());
        let snapshot = response
            .payload
            .clone()
            .unwrap_or_else(|| record.payload.clone());
        record.mark_synced(response.version, snapshot, Timestamp::now());
        if withheld {
            // Withheld fields are still unsent; keep the record pending so
            // they go out on the next cycle.
            record.sync_state = SyncState::Pending;
        }
        self.store.update(&record)?;
        Ok(())
    }
}
