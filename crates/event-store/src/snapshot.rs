use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{AggregateId, EventStoreError, Result, Version};

/// A snapshot of an aggregate's state at a specific version.
///
/// Snapshots are used to optimize aggregate reconstruction by providing
/// a starting point, avoiding the need to replay all events from the beginning.
/// A snapshot is only valid for a version that is durable in the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate this snapshot belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g., "Person").
    pub aggregate_type: String,

    /// The version of the aggregate at the time of the snapshot.
    pub version: Version,

    /// When the snapshot was created.
    pub timestamp: DateTime<Utc>,

    /// The serialized aggregate state.
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Creates a new snapshot.
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        state: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            timestamp: Utc::now(),
            state,
        }
    }

    /// Creates a snapshot from a serializable state.
    pub fn from_state<T: Serialize>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        state: &T,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(Self::new(
            aggregate_id,
            aggregate_type,
            version,
            serde_json::to_value(state)?,
        ))
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn into_state<T: DeserializeOwned>(self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }
}

/// Durable store of the latest snapshot per aggregate.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Saves a snapshot, replacing any previous one for the same aggregate.
    ///
    /// Rejects snapshots without an aggregate identity.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Retrieves the latest snapshot for an aggregate.
    ///
    /// Fails with `SnapshotNotFound` if none exists.
    async fn get_snapshot(&self, aggregate_id: &AggregateId, aggregate_type: &str)
    -> Result<Snapshot>;
}

/// Validates a snapshot before it is stored.
pub fn validate_snapshot(snapshot: &Snapshot) -> Result<()> {
    if snapshot.aggregate_id.is_blank() {
        return Err(EventStoreError::Validation(
            "Snapshot aggregate id can't be blank".to_string(),
        ));
    }
    if snapshot.aggregate_type.trim().is_empty() {
        return Err(EventStoreError::Validation(
            "Snapshot aggregate type can't be blank".to_string(),
        ));
    }
    Ok(())
}
