//! # Tidemark Sync Engine
//!
//! Keeps a local, offline-capable replica of two record families
//! (entities and curations) consistent with a remote authoritative store,
//! across unreliable connectivity, concurrent edits from multiple
//! clients, and partial failures.
//!
//! This crate provides:
//! - Incremental pull with per-family watermarks and paged fetching
//! - Partial-field push with optimistic-concurrency conflict detection
//! - Conflict resolution (accept-local / accept-remote / merge)
//! - Duplicate-creation recovery and referential pruning
//! - A cycle orchestrator with background scheduling and lifecycle events
//!
//! ## Architecture
//!
//! The engine implements a **pull-then-push** model per cycle:
//! 1. Pull curations (the referencing family; its links bound the rest)
//! 2. Pull the entities those curations reference
//! 3. Prune local entities unreachable from any curation
//! 4. Push entities, then curations
//!
//! The remote store's only concurrency control is the per-record version
//! counter: the engine never takes a remote lock, it detects and reports
//! collisions after the fact.
//!
//! ## Key Invariants
//!
//! - A record's version never decreases locally; local edits only flip it
//!   to `pending`
//! - Conflicted records are excluded from automatic push until resolved
//! - A pull watermark advances only on cycles that processed at least one
//!   record
//! - Reconciling the same remote record twice is a no-op
//! - Cycles are single-flight; one in-flight cycle drops later requests

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod cursor;
mod error;
mod events;
mod fetch;
mod orchestrator;
mod push;
mod reconcile;
mod remote;
mod store;
pub mod tracker;

pub use config::SyncConfig;
pub use conflict::ConflictStore;
pub use cursor::PullCursor;
pub use error::{RemoteError, RemoteResult, StoreError, StoreResult, SyncError, SyncResult};
pub use events::{CycleKind, EventBus, SyncEvent};
pub use fetch::BatchFetcher;
pub use orchestrator::{
    ConflictReport, CycleSummary, OrphanRef, PullReport, ScheduleHandle, SyncOrchestrator,
    SyncStats,
};
pub use push::{PatchGuard, PushEngine, PushOutcome, PushReport};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use remote::{CallCounts, MockRemote, RemoteApi};
pub use store::{collapse_duplicate_rows, pick_canonical, LocalStore, MemoryStore};
