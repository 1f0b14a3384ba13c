use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors returned by event log and snapshot store collaborators.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// A concurrency conflict occurred when appending events.
    /// The expected version did not match the durable version.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// No snapshot exists for the aggregate.
    #[error("Snapshot not found for {aggregate_type} with id {aggregate_id}")]
    SnapshotNotFound {
        aggregate_id: AggregateId,
        aggregate_type: String,
    },

    /// The request was rejected before touching storage.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing storage failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl EventStoreError {
    /// Returns true for optimistic concurrency conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Returns true when a snapshot lookup found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SnapshotNotFound { .. })
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
