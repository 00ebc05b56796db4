//! Error types for the sync engine.

use thiserror::Error;
use tidemark_model::RecordFamily;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for remote API calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result type for local store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by the remote store.
///
/// Every variant the engine's state machine branches on is distinguishable
/// here; anything else is a transport error with a retryability flag.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Network or transport failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the next cycle may retry the operation.
        retryable: bool,
    },

    /// Optimistic-lock rejection: the stored version moved past the
    /// version the writer knew.
    #[error("version conflict: server is at version {server_version}")]
    VersionConflict {
        /// The server's current version counter.
        server_version: u64,
    },

    /// The addressed record does not exist on the server.
    #[error("record not found")]
    NotFound,

    /// A record with this logical id already exists server-side.
    #[error("record already exists")]
    AlreadyExists,

    /// The payload was rejected by the server's write schema.
    #[error("payload rejected: {0}")]
    Validation(String),
}

impl RemoteError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later cycle may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transport { retryable: true, .. })
    }
}

/// Errors reported by the local store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The addressed row does not exist.
    #[error("row not found: {0}")]
    RowMissing(String),

    /// The store backend failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Remote API error.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A sync cycle is already in flight; the request was dropped, not
    /// queued.
    #[error("sync cycle already in flight")]
    CycleInFlight,

    /// The engine is offline; cycles are suspended until reconnection.
    #[error("engine is offline")]
    Offline,

    /// The background scheduler was started twice.
    #[error("background scheduler already running")]
    SchedulerRunning,

    /// No conflict is recorded for the addressed record.
    #[error("no conflict recorded for {family} record {logical_id}")]
    UnknownConflict {
        /// Family of the addressed record.
        family: RecordFamily,
        /// Business key of the addressed record.
        logical_id: String,
    },
}

impl SyncError {
    /// Returns true if a later cycle may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_retryable(),
            SyncError::CycleInFlight => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(RemoteError::transport_retryable("connection reset").is_retryable());
        assert!(!RemoteError::transport_fatal("tls handshake failed").is_retryable());
        assert!(!RemoteError::VersionConflict { server_version: 6 }.is_retryable());
        assert!(!RemoteError::NotFound.is_retryable());
        assert!(!RemoteError::Validation("bad field".into()).is_retryable());
    }

    #[test]
    fn sync_error_retryability_follows_remote() {
        let err = SyncError::from(RemoteError::transport_retryable("timeout"));
        assert!(err.is_retryable());

        let err = SyncError::from(StoreError::Backend("disk full".into()));
        assert!(!err.is_retryable());

        assert!(SyncError::CycleInFlight.is_retryable());
        assert!(!SyncError::Offline.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = RemoteError::VersionConflict { server_version: 6 };
        assert!(err.to_string().contains('6'));

        let err = SyncError::UnknownConflict {
            family: RecordFamily::Curation,
            logical_id: "curation-1".into(),
        };
        assert!(err.to_string().contains("curation-1"));
    }
}
