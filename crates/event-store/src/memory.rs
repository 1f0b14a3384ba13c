use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version,
    snapshot::{SnapshotStore, validate_snapshot},
    store::{AppendOptions, EventStore, validate_events_for_append},
};

/// In-memory event log.
///
/// Cloning shares the underlying storage, so clones observe each other's
/// appends. Nothing survives the process.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    fn current_version(
        events: &[EventEnvelope],
        aggregate_id: &AggregateId,
        aggregate_type: &str,
    ) -> Option<Version> {
        events
            .iter()
            .filter(|e| e.belongs_to(aggregate_id, aggregate_type))
            .map(|e| e.version)
            .max()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let (aggregate_id, aggregate_type, first_version, last_version) =
            match (events.first(), events.last()) {
                (Some(first), Some(last)) => (
                    first.aggregate_id.clone(),
                    first.aggregate_type.clone(),
                    first.version,
                    last.version,
                ),
                _ => return Err(EventStoreError::Validation("empty batch".to_string())),
            };

        let mut store = self.events.write().await;

        let current_version = Self::current_version(&store, &aggregate_id, &aggregate_type)
            .unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current_version,
            });
        }

        // Unique (aggregate, version) constraint simulation
        if first_version <= current_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        if first_version != current_version.next() {
            return Err(EventStoreError::Validation(format!(
                "Version gap for aggregate {aggregate_id}: durable version is {current_version}, batch starts at {first_version}"
            )));
        }

        tracing::debug!(
            %aggregate_id,
            aggregate_type = %aggregate_type,
            count = events.len(),
            version = %last_version,
            "appended events"
        );
        store.extend(events);

        Ok(last_version)
    }

    async fn get_events(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
        after_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.belongs_to(aggregate_id, aggregate_type) && e.version > after_version)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn get_aggregate_version(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
    ) -> Result<Option<Version>> {
        let store = self.events.read().await;
        Ok(Self::current_version(&store, aggregate_id, aggregate_type))
    }
}

/// In-memory snapshot store holding the latest snapshot per aggregate.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<(String, AggregateId), Snapshot>>>,
}

impl InMemorySnapshotStore {
    /// Creates a new empty in-memory snapshot store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored snapshots.
    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        validate_snapshot(&snapshot)?;

        let key = (snapshot.aggregate_type.clone(), snapshot.aggregate_id.clone());
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(key, snapshot);
        Ok(())
    }

    async fn get_snapshot(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
    ) -> Result<Snapshot> {
        let snapshots = self.snapshots.read().await;
        snapshots
            .get(&(aggregate_type.to_string(), aggregate_id.clone()))
            .cloned()
            .ok_or_else(|| EventStoreError::SnapshotNotFound {
                aggregate_id: aggregate_id.clone(),
                aggregate_type: aggregate_type.to_string(),
            })
    }
}
