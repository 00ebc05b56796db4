//! Cycle sequencing, background scheduling, and the engine's public
//! surface.

use crate::config::SyncConfig;
use crate::conflict::ConflictStore;
use crate::cursor::PullCursor;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::events::{CycleKind, EventBus, SyncEvent};
use crate::fetch::BatchFetcher;
use crate::push::{PushEngine, PushReport};
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::remote::RemoteApi;
use crate::store::LocalStore;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidemark_model::{
    ConflictCase, CurationPayload, EntityPayload, Payload, RecordFamily, Resolution, SyncRecord,
    SyncState, Timestamp,
};

/// Summary of one pull pass over a family.
#[derive(Debug, Clone, Copy, Default)]
pub struct PullReport {
    /// Records reconciled against the local store.
    pub processed: u64,
    /// Local copies created.
    pub created: u64,
    /// Local copies overwritten by newer remote versions.
    pub updated: u64,
    /// Local copies removed by tombstones.
    pub deleted: u64,
    /// Records skipped by the relevance filter.
    pub skipped: u64,
    /// Whether the pull advanced the family's watermark.
    pub cursor_advanced: bool,
}

/// A curation whose entity link does not resolve locally.
///
/// Orphans are reported, never deleted: "unlinked" is a valid business
/// state and a dangling link may resolve on a later pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanRef {
    /// The curation holding the dangling link.
    pub curation_id: String,
    /// The entity logical id that does not resolve locally.
    pub entity_id: String,
}

/// Open conflict cases of both families.
#[derive(Debug, Clone, Default)]
pub struct ConflictReport {
    /// Conflicted entities.
    pub entities: Vec<ConflictCase<EntityPayload>>,
    /// Conflicted curations.
    pub curations: Vec<ConflictCase<CurationPayload>>,
}

/// Counts and errors of one finished cycle.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    /// Which kind of cycle ran.
    pub kind: CycleKind,
    /// Curations reconciled from the remote store.
    pub pulled_curations: u64,
    /// Entities reconciled from the remote store.
    pub pulled_entities: u64,
    /// Entities that reached the server.
    pub pushed_entities: u64,
    /// Curations that reached the server.
    pub pushed_curations: u64,
    /// Entities pruned as unreachable from any curation.
    pub pruned_entities: u64,
    /// Curations with dangling entity links after the cycle.
    pub orphans: u64,
    /// Records newly moved to the conflict store.
    pub conflicts: Vec<(RecordFamily, String)>,
    /// Failures caught during the cycle; one step's failure never blocks
    /// the others.
    pub step_errors: Vec<String>,
    /// Wall-clock duration of the cycle.
    pub duration: Duration,
}

impl CycleSummary {
    fn new(kind: CycleKind) -> Self {
        Self {
            kind,
            pulled_curations: 0,
            pulled_entities: 0,
            pushed_entities: 0,
            pushed_curations: 0,
            pruned_entities: 0,
            orphans: 0,
            conflicts: Vec::new(),
            step_errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Returns true when every step of the cycle succeeded.
    pub fn is_clean(&self) -> bool {
        self.step_errors.is_empty()
    }
}

/// Lifetime statistics of an orchestrator.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Cycle requests dropped because one was already in flight.
    pub cycles_dropped: u64,
    /// Records reconciled from pulls.
    pub records_pulled: u64,
    /// Records that reached the server.
    pub records_pushed: u64,
    /// Conflicts detected.
    pub conflicts_detected: u64,
    /// Entities pruned as unreachable.
    pub records_pruned: u64,
    /// When the last cycle finished.
    pub last_cycle_at: Option<Timestamp>,
    /// The last step error, if any.
    pub last_error: Option<String>,
}

/// Resets the single-flight flag even when a cycle unwinds early.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to the background scheduler thread. Stopping (or dropping) the
/// handle shuts the thread down.
pub struct ScheduleHandle {
    signal: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ScheduleHandle {
    /// Stops the scheduler and waits for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            let (lock, cvar) = &*self.signal;
            *lock.lock() = true;
            cvar.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drives full and quick sync cycles over both record families.
///
/// One orchestrator value owns its cursors, conflict cases, and
/// statistics; it is constructed once per process and shared by
/// reference. Cycles are single-flight: a cycle requested while one is in
/// flight is dropped, not queued; the next scheduled tick catches up.
///
/// A full cycle runs: pull curations → pull referenced entities → prune
/// unreachable entities → push entities → push curations. Curations are
/// pulled first because their links bound the entity pull; entities are
/// pushed first so a freshly created entity has a server identity before
/// the curation referencing it goes out.
pub struct SyncOrchestrator<ER, ES, CR, CS>
where
    ER: RemoteApi<EntityPayload>,
    ES: LocalStore<EntityPayload>,
    CR: RemoteApi<CurationPayload>,
    CS: LocalStore<CurationPayload>,
{
    config: SyncConfig,
    entity_remote: ER,
    entity_store: ES,
    curation_remote: CR,
    curation_store: CS,
    entity_conflicts: ConflictStore<EntityPayload>,
    curation_conflicts: ConflictStore<CurationPayload>,
    events: EventBus,
    stats: RwLock<SyncStats>,
    is_syncing: AtomicBool,
    online: AtomicBool,
    scheduler_running: AtomicBool,
    tick: Arc<(Mutex<bool>, Condvar)>,
}

impl<ER, ES, CR, CS> SyncOrchestrator<ER, ES, CR, CS>
where
    ER: RemoteApi<EntityPayload>,
    ES: LocalStore<EntityPayload>,
    CR: RemoteApi<CurationPayload>,
    CS: LocalStore<CurationPayload>,
{
    /// Creates an orchestrator over the two families' remotes and stores.
    pub fn new(
        config: SyncConfig,
        entity_remote: ER,
        entity_store: ES,
        curation_remote: CR,
        curation_store: CS,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            config,
            entity_remote,
            entity_store,
            curation_remote,
            curation_store,
            entity_conflicts: ConflictStore::new(),
            curation_conflicts: ConflictStore::new(),
            events,
            stats: RwLock::new(SyncStats::default()),
            is_syncing: AtomicBool::new(false),
            online: AtomicBool::new(true),
            scheduler_running: AtomicBool::new(false),
            tick: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// The entity store, e.g. for creating local drafts.
    pub fn entity_store(&self) -> &ES {
        &self.entity_store
    }

    /// The curation store, e.g. for creating local drafts.
    pub fn curation_store(&self) -> &CS {
        &self.curation_store
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Current lifetime statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a cycle is in flight.
    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    /// Returns true when the engine considers itself online.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Flips connectivity. Going online wakes the background scheduler
    /// for an immediate catch-up cycle; while offline, scheduled and
    /// manual cycles are suspended.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if online && !was {
            tracing::info!("connectivity restored; waking the scheduler");
            let (_, cvar) = &*self.tick;
            cvar.notify_all();
        } else if !online && was {
            tracing::info!("connectivity lost; sync suspended");
        }
    }

    /// Runs a full cycle: pull curations, pull referenced entities, prune
    /// unreachable entities, report orphans, push entities, push
    /// curations. Each step is caught individually; the summary carries
    /// whatever failed.
    pub fn full_cycle(&self) -> SyncResult<CycleSummary> {
        let _guard = self.begin_cycle()?;
        self.events.emit(SyncEvent::CycleStarted {
            kind: CycleKind::Full,
        });
        let started = Instant::now();
        let mut summary = CycleSummary::new(CycleKind::Full);

        match self.pull_family(
            RecordFamily::Curation,
            &self.curation_remote,
            &self.curation_store,
            &self.curation_conflicts,
            None,
        ) {
            Ok(report) => summary.pulled_curations = report.processed,
            Err(error) => self.note_step_error(&mut summary, "pull curations", &error),
        }

        let referenced = match self.referenced_entity_ids() {
            Ok(ids) => ids,
            Err(error) => {
                self.note_step_error(&mut summary, "collect entity links", &error);
                BTreeSet::new()
            }
        };

        match self.pull_entities(&referenced) {
            Ok(report) => summary.pulled_entities = report.processed,
            Err(error) => self.note_step_error(&mut summary, "pull entities", &error),
        }

        match self.prune_entities(&referenced) {
            Ok(pruned) => summary.pruned_entities = pruned,
            Err(error) => self.note_step_error(&mut summary, "prune entities", &error),
        }

        match self.orphans() {
            Ok(orphans) => {
                summary.orphans = orphans.len() as u64;
                for orphan in &orphans {
                    tracing::warn!(
                        curation = %orphan.curation_id,
                        entity = %orphan.entity_id,
                        "curation references an entity that does not resolve locally"
                    );
                }
            }
            Err(error) => self.note_step_error(&mut summary, "orphan report", &error),
        }

        match self.push_entities() {
            Ok(report) => self.absorb_push(&mut summary, RecordFamily::Entity, report),
            Err(error) => self.note_step_error(&mut summary, "push entities", &error),
        }

        match self.push_curations() {
            Ok(report) => self.absorb_push(&mut summary, RecordFamily::Curation, report),
            Err(error) => self.note_step_error(&mut summary, "push curations", &error),
        }

        summary.duration = started.elapsed();
        self.finish_cycle(&summary);
        Ok(summary)
    }

    /// Runs a push-only cycle, used for frequent background flushing of
    /// local edits.
    pub fn quick_cycle(&self) -> SyncResult<CycleSummary> {
        let _guard = self.begin_cycle()?;
        self.events.emit(SyncEvent::CycleStarted {
            kind: CycleKind::Quick,
        });
        let started = Instant::now();
        let mut summary = CycleSummary::new(CycleKind::Quick);

        match self.push_entities() {
            Ok(report) => self.absorb_push(&mut summary, RecordFamily::Entity, report),
            Err(error) => self.note_step_error(&mut summary, "push entities", &error),
        }
        match self.push_curations() {
            Ok(report) => self.absorb_push(&mut summary, RecordFamily::Curation, report),
            Err(error) => self.note_step_error(&mut summary, "push curations", &error),
        }

        summary.duration = started.elapsed();
        self.finish_cycle(&summary);
        Ok(summary)
    }

    /// Lists the open conflicts of both families.
    pub fn conflicts(&self) -> ConflictReport {
        ConflictReport {
            entities: self.entity_conflicts.cases(),
            curations: self.curation_conflicts.cases(),
        }
    }

    /// Resolves one conflicted record with the given strategy.
    pub fn resolve(
        &self,
        family: RecordFamily,
        logical_id: &str,
        strategy: Resolution,
    ) -> SyncResult<()> {
        match family {
            RecordFamily::Entity => self
                .entity_conflicts
                .resolve(&self.entity_remote, &self.entity_store, logical_id, strategy)
                .map(|_| ()),
            RecordFamily::Curation => self
                .curation_conflicts
                .resolve(
                    &self.curation_remote,
                    &self.curation_store,
                    logical_id,
                    strategy,
                )
                .map(|_| ()),
        }
    }

    /// Curations whose entity link does not resolve locally.
    pub fn orphans(&self) -> SyncResult<Vec<OrphanRef>> {
        let mut orphans = Vec::new();
        for curation in self.curation_store.all()? {
            if let Some(entity_id) = &curation.payload.entity_ref {
                if self.entity_store.get_by_logical_id(entity_id)?.is_none() {
                    orphans.push(OrphanRef {
                        curation_id: curation.logical_id.clone(),
                        entity_id: entity_id.clone(),
                    });
                }
            }
        }
        Ok(orphans)
    }

    fn begin_cycle(&self) -> SyncResult<CycleGuard<'_>> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.stats.write().cycles_dropped += 1;
            return Err(SyncError::CycleInFlight);
        }
        Ok(CycleGuard(&self.is_syncing))
    }

    fn finish_cycle(&self, summary: &CycleSummary) {
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.records_pulled += summary.pulled_curations + summary.pulled_entities;
            stats.records_pushed += summary.pushed_entities + summary.pushed_curations;
            stats.conflicts_detected += summary.conflicts.len() as u64;
            stats.records_pruned += summary.pruned_entities;
            stats.last_cycle_at = Some(Timestamp::now());
            stats.last_error = summary.step_errors.last().cloned();
        }

        tracing::info!(
            kind = ?summary.kind,
            pulled = summary.pulled_curations + summary.pulled_entities,
            pushed = summary.pushed_entities + summary.pushed_curations,
            conflicts = summary.conflicts.len(),
            errors = summary.step_errors.len(),
            "sync cycle finished"
        );

        if summary.is_clean() {
            self.events.emit(SyncEvent::CycleCompleted {
                summary: summary.clone(),
            });
        } else {
            self.events.emit(SyncEvent::CycleFailed {
                message: summary.step_errors.join("; "),
            });
        }
    }

    fn note_step_error(&self, summary: &mut CycleSummary, step: &str, error: &SyncError) {
        tracing::warn!(step = step, error = %error, "cycle step failed");
        summary.step_errors.push(format!("{step}: {error}"));
    }

    fn absorb_push(&self, summary: &mut CycleSummary, family: RecordFamily, report: PushReport) {
        match family {
            RecordFamily::Entity => summary.pushed_entities = report.pushed(),
            RecordFamily::Curation => summary.pushed_curations = report.pushed(),
        }
        for logical_id in &report.conflicts {
            summary.conflicts.push((family, logical_id.clone()));
            self.events.emit(SyncEvent::ConflictDetected {
                family,
                logical_id: logical_id.clone(),
            });
        }
        for (logical_id, reason) in &report.failed {
            summary
                .step_errors
                .push(format!("push {family} {logical_id}: {reason}"));
        }
    }

    /// Incremental pull of one family, optionally bounded to a relevance
    /// set.
    ///
    /// The watermark advances only when at least one record was
    /// processed (or deliberately skipped as irrelevant) and no record
    /// failed: a failed record must stay inside the watermark so the
    /// next cycle retries it.
    fn pull_family<P, R, S>(
        &self,
        family: RecordFamily,
        remote: &R,
        store: &S,
        conflicts: &ConflictStore<P>,
        filter: Option<&BTreeSet<String>>,
    ) -> SyncResult<PullReport>
    where
        P: Payload,
        R: RemoteApi<P>,
        S: LocalStore<P>,
    {
        let mut cursor = PullCursor::load(family, store)?;
        let reconciler = Reconciler::new(store, conflicts);
        let mut report = PullReport::default();
        let mut high_water: Option<Timestamp> = None;
        let mut record_failed = false;

        for page in BatchFetcher::new(remote, cursor.current(), &self.config) {
            for remote_record in page? {
                if filter.is_some_and(|allowed| !allowed.contains(&remote_record.logical_id)) {
                    report.skipped += 1;
                    high_water = high_water.max(Some(remote_record.updated_at));
                    continue;
                }
                match reconciler.apply(&remote_record) {
                    Ok(outcome) => {
                        report.processed += 1;
                        match outcome {
                            ReconcileOutcome::Created => report.created += 1,
                            ReconcileOutcome::Updated => report.updated += 1,
                            ReconcileOutcome::Deleted => report.deleted += 1,
                            _ => {}
                        }
                        high_water = high_water.max(Some(remote_record.updated_at));
                    }
                    Err(error) => {
                        record_failed = true;
                        tracing::warn!(
                            family = %family,
                            logical_id = %remote_record.logical_id,
                            error = %error,
                            "reconcile failed for record"
                        );
                    }
                }
            }
        }

        if !record_failed && report.processed + report.skipped > 0 {
            if let Some(to) = high_water {
                cursor.advance(store, to)?;
                report.cursor_advanced = true;
            }
        }

        Ok(report)
    }

    /// Pulls entities bounded to the set referenced by local curations:
    /// the incremental list pass covers records inside the watermark, and
    /// referenced ids still absent afterwards (older than the watermark,
    /// newly linked) are fetched individually.
    fn pull_entities(&self, referenced: &BTreeSet<String>) -> SyncResult<PullReport> {
        let mut report = self.pull_family(
            RecordFamily::Entity,
            &self.entity_remote,
            &self.entity_store,
            &self.entity_conflicts,
            Some(referenced),
        )?;

        let reconciler = Reconciler::new(&self.entity_store, &self.entity_conflicts);
        for logical_id in referenced {
            if self.entity_store.get_by_logical_id(logical_id)?.is_some() {
                continue;
            }
            match self.entity_remote.get(logical_id) {
                Ok(remote_record) => match reconciler.apply(&remote_record) {
                    Ok(ReconcileOutcome::Created) => {
                        report.processed += 1;
                        report.created += 1;
                    }
                    Ok(_) => report.processed += 1,
                    Err(error) => tracing::warn!(
                        logical_id = %logical_id,
                        error = %error,
                        "reconcile failed for referenced entity"
                    ),
                },
                Err(RemoteError::NotFound) => {
                    // Dangling link; the orphan report will surface it.
                    tracing::debug!(
                        logical_id = %logical_id,
                        "referenced entity does not exist on the server"
                    );
                }
                Err(error) => tracing::warn!(
                    logical_id = %logical_id,
                    error = %error,
                    "failed to fetch referenced entity"
                ),
            }
        }

        Ok(report)
    }

    /// Entities not referenced by any curation and not holding local work
    /// are stale data no longer reachable; they are pruned. The
    /// referencing family is the source of truth for relevance.
    fn prune_entities(&self, referenced: &BTreeSet<String>) -> SyncResult<u64> {
        let mut doomed = Vec::new();
        for record in self.entity_store.all()? {
            if referenced.contains(&record.logical_id) {
                continue;
            }
            if matches!(
                record.sync_state,
                SyncState::Pending | SyncState::Conflict
            ) {
                continue;
            }
            doomed.push(record.row_key);
        }
        let pruned = self.entity_store.bulk_delete(&doomed)? as u64;
        if pruned > 0 {
            tracing::info!(pruned, "pruned entities unreachable from any curation");
        }
        Ok(pruned)
    }

    fn referenced_entity_ids(&self) -> SyncResult<BTreeSet<String>> {
        Ok(self
            .curation_store
            .all()?
            .into_iter()
            .filter_map(|record| record.payload.entity_ref)
            .collect())
    }

    fn push_entities(&self) -> SyncResult<PushReport> {
        PushEngine::new(&self.entity_remote, &self.entity_store, &self.entity_conflicts)
            .push_pending()
    }

    fn push_curations(&self) -> SyncResult<PushReport> {
        // A curation whose referenced entity has no server identity yet is
        // pushed without the linkage field rather than blocked; the link
        // goes out on a later cycle.
        let guard = |record: &SyncRecord<CurationPayload>,
                     mut patch: <CurationPayload as Payload>::Patch| {
            if let Some(Some(entity_id)) = patch.entity_ref.clone() {
                let linkable = self
                    .entity_store
                    .get_by_logical_id(&entity_id)
                    .ok()
                    .flatten()
                    .is_some_and(|entity| entity.server_ref.is_some());
                if !linkable {
                    tracing::debug!(
                        curation = %record.logical_id,
                        entity = %entity_id,
                        "withholding linkage until the entity has a server identity"
                    );
                    patch.entity_ref = None;
                }
            }
            patch
        };

        PushEngine::new(
            &self.curation_remote,
            &self.curation_store,
            &self.curation_conflicts,
        )
        .with_patch_guard(&guard)
        .push_pending()
    }
}

impl<ER, ES, CR, CS> SyncOrchestrator<ER, ES, CR, CS>
where
    ER: RemoteApi<EntityPayload> + 'static,
    ES: LocalStore<EntityPayload> + 'static,
    CR: RemoteApi<CurationPayload> + 'static,
    CS: LocalStore<CurationPayload> + 'static,
{
    /// Starts the periodic background scheduler.
    ///
    /// Takes an `Arc` clone of the orchestrator. The scheduler runs a
    /// full cycle every `sync_interval`, skipping ticks while offline;
    /// `set_online(true)` wakes it immediately. The returned handle stops
    /// the thread when stopped or dropped. Only one scheduler may run at
    /// a time.
    pub fn start_background(self: Arc<Self>) -> SyncResult<ScheduleHandle> {
        if self
            .scheduler_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::SchedulerRunning);
        }

        {
            let (lock, _) = &*self.tick;
            *lock.lock() = false;
        }

        let orchestrator = self;
        let signal = Arc::clone(&orchestrator.tick);
        let handle_signal = Arc::clone(&orchestrator.tick);
        let interval = orchestrator.config.sync_interval;

        let thread = std::thread::spawn(move || {
            loop {
                {
                    let (lock, cvar) = &*signal;
                    let mut stop = lock.lock();
                    if *stop {
                        break;
                    }
                    let _ = cvar.wait_for(&mut stop, interval);
                    if *stop {
                        break;
                    }
                }
                if !orchestrator.is_online() {
                    tracing::debug!("offline; scheduled sync skipped");
                    continue;
                }
                match orchestrator.full_cycle() {
                    Ok(_) => {}
                    Err(SyncError::CycleInFlight) => {
                        tracing::debug!("cycle already in flight; tick dropped");
                    }
                    Err(SyncError::Offline) => {}
                    Err(error) => {
                        tracing::warn!(error = %error, "scheduled sync failed");
                    }
                }
            }
            orchestrator.scheduler_running.store(false, Ordering::SeqCst);
        });

        Ok(ScheduleHandle {
            signal: handle_signal,
            thread: Some(thread),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemote;
    use crate::store::MemoryStore;

    type TestOrchestrator = SyncOrchestrator<
        MockRemote<EntityPayload>,
        MemoryStore<EntityPayload>,
        MockRemote<CurationPayload>,
        MemoryStore<CurationPayload>,
    >;

    fn orchestrator() -> TestOrchestrator {
        SyncOrchestrator::new(
            SyncConfig::new().with_page_delay(Duration::ZERO),
            MockRemote::new(),
            MemoryStore::new(),
            MockRemote::new(),
            MemoryStore::new(),
        )
    }

    fn curation_linking(entity_id: Option<&str>) -> CurationPayload {
        CurationPayload {
            title: "list".into(),
            body: String::new(),
            entity_ref: entity_id.map(str::to_string),
            tags: Default::default(),
        }
    }

    #[test]
    fn offline_cycles_are_refused() {
        let orchestrator = orchestrator();
        orchestrator.set_online(false);

        assert!(matches!(orchestrator.full_cycle(), Err(SyncError::Offline)));
        assert!(matches!(orchestrator.quick_cycle(), Err(SyncError::Offline)));
    }

    #[test]
    fn reentrant_cycles_are_dropped() {
        let orchestrator = orchestrator();
        // Simulate an in-flight cycle.
        orchestrator.is_syncing.store(true, Ordering::SeqCst);

        assert!(matches!(
            orchestrator.full_cycle(),
            Err(SyncError::CycleInFlight)
        ));
        assert_eq!(orchestrator.stats().cycles_dropped, 1);

        orchestrator.is_syncing.store(false, Ordering::SeqCst);
        assert!(orchestrator.full_cycle().is_ok());
    }

    #[test]
    fn referenced_ids_come_from_curation_links() {
        let orchestrator = orchestrator();
        orchestrator
            .curation_store()
            .put(SyncRecord::local_draft(
                "curation-1",
                curation_linking(Some("entity-1")),
            ))
            .unwrap();
        orchestrator
            .curation_store()
            .put(SyncRecord::local_draft("curation-2", curation_linking(None)))
            .unwrap();

        let ids = orchestrator.referenced_entity_ids().unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), ["entity-1"]);
    }

    #[test]
    fn orphan_report_finds_dangling_links() {
        let orchestrator = orchestrator();
        orchestrator
            .curation_store()
            .put(SyncRecord::local_draft(
                "curation-1",
                curation_linking(Some("entity-missing")),
            ))
            .unwrap();
        orchestrator
            .curation_store()
            .put(SyncRecord::local_draft("curation-2", curation_linking(None)))
            .unwrap();

        let orphans = orchestrator.orphans().unwrap();
        assert_eq!(
            orphans,
            [OrphanRef {
                curation_id: "curation-1".into(),
                entity_id: "entity-missing".into(),
            }]
        );
    }

    #[test]
    fn scheduler_refuses_a_second_instance() {
        let orchestrator = Arc::new(orchestrator());
        let handle = Arc::clone(&orchestrator).start_background().unwrap();
        assert!(matches!(
            Arc::clone(&orchestrator).start_background(),
            Err(SyncError::SchedulerRunning)
        ));
        handle.stop();
    }
}
