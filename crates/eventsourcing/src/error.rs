//! Repository error types.

use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur while tracking, saving or loading aggregates.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A snapshot operation was requested but no snapshot store is configured.
    #[error("No snapshot store has been configured in the repository")]
    SnapshotStoreNotConfigured,

    /// The request was rejected before any collaborator was called.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error reported by the event log or snapshot store.
    #[error("Event store error: {0}")]
    Store(#[from] EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    /// Returns true if the event log rejected a save because another writer
    /// advanced the aggregate first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_conflict())
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;
