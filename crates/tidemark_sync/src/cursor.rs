//! Per-family pull watermarks.

use crate::error::SyncResult;
use crate::store::LocalStore;
use tidemark_model::{Payload, RecordFamily, Timestamp};

/// The incremental-fetch watermark for one record family.
///
/// Loaded from the family's store at the start of a cycle and persisted
/// through it, so a process restart resumes from where the last successful
/// pull left off instead of re-fetching the whole remote dataset.
///
/// The cursor only ever advances on a cycle that processed at least one
/// record; advancing on an empty batch could mask records created between
/// request issuance and response.
#[derive(Debug, Clone, Copy)]
pub struct PullCursor {
    family: RecordFamily,
    current: Option<Timestamp>,
}

impl PullCursor {
    /// Loads the persisted watermark for a family.
    pub fn load<P, S>(family: RecordFamily, store: &S) -> SyncResult<Self>
    where
        P: Payload,
        S: LocalStore<P>,
    {
        let current = store.load_cursor()?;
        Ok(Self { family, current })
    }

    /// The family this cursor belongs to.
    pub fn family(&self) -> RecordFamily {
        self.family
    }

    /// The current watermark; `None` means "never pulled, fetch
    /// everything".
    pub fn current(&self) -> Option<Timestamp> {
        self.current
    }

    /// Advances the watermark and persists it. Regressions are ignored:
    /// the watermark is monotonic.
    pub fn advance<P, S>(&mut self, store: &S, to: Timestamp) -> SyncResult<()>
    where
        P: Payload,
        S: LocalStore<P>,
    {
        if self.current.is_some_and(|at| to <= at) {
            return Ok(());
        }
        store.save_cursor(to)?;
        self.current = Some(to);
        tracing::debug!(family = %self.family, cursor = %to, "pull cursor advanced");
        Ok(())
    }
}
