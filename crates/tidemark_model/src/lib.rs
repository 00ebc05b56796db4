//! # Tidemark Model
//!
//! Record model shared by the Tidemark sync engine and its callers.
//!
//! This crate provides:
//! - The two record families (entities and curations) and their payloads
//! - Typed patches and the diff/apply/merge algebra over them
//! - Local replica records with sync bookkeeping
//! - Remote wire shapes (records, pages, tombstones)
//! - Conflict cases and resolution strategies
//!
//! ## Key Invariants
//!
//! - A record's `version` is only ever set from server-confirmed values
//! - Patches carry only fields accepted by the remote write schema
//! - The last-synced snapshot is updated atomically with the flip to
//!   `synced`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod payload;
mod record;
mod state;

pub use conflict::{ConflictCase, Resolution};
pub use payload::{CurationPatch, CurationPayload, EntityPatch, EntityPayload, Patch, Payload};
pub use record::{RemotePage, RemoteRecord, RemoteStatus, SyncRecord};
pub use state::{RecordFamily, RowKey, SyncState, Timestamp};
