//! Repository orchestrating the event log, snapshot store and notification hub.
//!
//! The repository is responsible for:
//! 1. Appending an aggregate's buffered events atomically, with an
//!    optimistic version check
//! 2. Publishing each committed batch once, before the aggregate's confirmed
//!    version advances
//! 3. Rebuilding aggregates from the latest snapshot plus newer events
//! 4. Storing snapshots of aggregates without unsaved changes

use std::sync::Arc;

use common::AggregateId;
use event_store::{AppendOptions, EventStore, EventStoreError, Snapshot, SnapshotStore, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::{Aggregate, SnapshotCapable};
use crate::config::RepositoryConfig;
use crate::error::{RepositoryError, Result};
use crate::notification::{DeliveryReport, EventStream};

/// Result of a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Confirmed version of the aggregate after the save.
    pub version: Version,

    /// Number of events made durable by this save.
    pub events_committed: usize,

    /// Per-subscriber outcome of publishing the committed batch.
    pub delivery: DeliveryReport,

    /// True if a snapshot was stored right after the commit.
    pub snapshotted: bool,
}

impl SaveOutcome {
    fn unchanged(version: Version) -> Self {
        Self {
            version,
            events_committed: 0,
            delivery: DeliveryReport::default(),
            snapshotted: false,
        }
    }
}

/// Saves and loads event-sourced aggregates.
///
/// The repository holds no locks of its own. Conflicting writers are
/// detected by the event log's expected-version check, so callers must
/// serialize commands per aggregate instance and reload after a conflict.
pub struct Repository<S: EventStore> {
    event_store: S,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    stream: EventStream,
    config: RepositoryConfig,
}

impl<S: EventStore> Repository<S> {
    /// Creates a repository without a snapshot store.
    pub fn new(event_store: S) -> Self {
        Self {
            event_store,
            snapshot_store: None,
            stream: EventStream::new(),
            config: RepositoryConfig::default(),
        }
    }

    /// Enables snapshots backed by `store`.
    pub fn with_snapshot_store<T>(mut self, store: T) -> Self
    where
        T: SnapshotStore + 'static,
    {
        self.snapshot_store = Some(Arc::new(store));
        self
    }

    /// Publishes through an existing hub instead of a private one.
    pub fn with_event_stream(mut self, stream: EventStream) -> Self {
        self.stream = stream;
        self
    }

    /// Replaces the default configuration.
    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns a reference to the underlying event store.
    pub fn event_store(&self) -> &S {
        &self.event_store
    }

    /// Returns the hub committed batches are published through.
    pub fn event_stream(&self) -> &EventStream {
        &self.stream
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Returns true if a snapshot store is configured.
    pub fn has_snapshot_store(&self) -> bool {
        self.snapshot_store.is_some()
    }

    /// Durably commits the aggregate's buffered events.
    ///
    /// An empty buffer returns immediately without touching any
    /// collaborator. On a rejected append the aggregate is left exactly as it
    /// was. After a successful append the batch is published, then the
    /// confirmed version advances and the buffer is cleared.
    #[tracing::instrument(
        skip(self, aggregate),
        fields(aggregate_type = A::aggregate_type(), aggregate_id = %aggregate.id())
    )]
    pub async fn save<A: Aggregate>(&self, aggregate: &mut A) -> Result<SaveOutcome> {
        let expected = aggregate.version();
        if aggregate.changes().is_empty() {
            tracing::debug!(version = %expected, "no unsaved changes");
            return Ok(SaveOutcome::unchanged(expected));
        }

        let batch = aggregate.changes().to_vec();
        let version = match self
            .event_store
            .append(batch, AppendOptions::expect_version(expected))
            .await
        {
            Ok(version) => version,
            Err(err) => {
                if err.is_conflict() {
                    metrics::counter!("eventsourcing_save_conflicts").increment(1);
                    tracing::info!(error = %err, "save rejected by concurrent writer");
                }
                return Err(err.into());
            }
        };

        let delivery = self.stream.publish(aggregate.changes());
        let events_committed = aggregate.changes().len();
        aggregate.root_mut().confirm_commit();

        metrics::counter!("eventsourcing_events_committed").increment(events_committed as u64);
        tracing::debug!(%version, events_committed, "committed events");

        Ok(SaveOutcome {
            version,
            events_committed,
            delivery,
            snapshotted: false,
        })
    }

    /// Saves, then stores a snapshot if the commit crossed a multiple of the
    /// aggregate's snapshot interval.
    ///
    /// A failing snapshot write is logged and does not fail the save, since
    /// the events are already durable.
    pub async fn save_and_snapshot<A: SnapshotCapable>(
        &self,
        aggregate: &mut A,
    ) -> Result<SaveOutcome> {
        let previous = aggregate.version();
        let mut outcome = self.save(aggregate).await?;

        let interval = self.config.snapshot_interval_for::<A>();
        if self.has_snapshot_store()
            && outcome.events_committed > 0
            && snapshot_due(previous, outcome.version, interval)
        {
            match self.save_snapshot(&*aggregate).await {
                Ok(()) => outcome.snapshotted = true,
                Err(err) => {
                    tracing::warn!(error = %err, version = %outcome.version, "snapshot after save failed");
                }
            }
        }

        Ok(outcome)
    }

    /// Loads the aggregate identified by `id` into `aggregate`.
    ///
    /// Starts from the latest snapshot when a snapshot store is configured
    /// (a missing snapshot means zero state), then replays every newer
    /// event. The target is overwritten only if loading succeeds, and comes
    /// back with an empty change buffer. An aggregate without history loads
    /// at version 0.
    #[tracing::instrument(
        skip(self, id, aggregate),
        fields(aggregate_type = A::aggregate_type(), aggregate_id = %id)
    )]
    pub async fn get<A>(&self, id: &AggregateId, aggregate: &mut A) -> Result<()>
    where
        A: Aggregate + DeserializeOwned,
    {
        if id.is_blank() {
            return Err(RepositoryError::Validation(
                "aggregate id can't be blank".to_string(),
            ));
        }

        let aggregate_type = A::aggregate_type();
        let mut loaded: A = self.load_baseline(id, aggregate_type).await?;

        let events = self
            .event_store
            .get_events(id, aggregate_type, loaded.version())
            .await?;
        let replayed = events.len();
        loaded.build_from_history(events)?;

        let version = loaded.version();
        loaded.root_mut().restore(id.clone(), version);
        *aggregate = loaded;

        tracing::debug!(%version, replayed, "loaded aggregate");
        Ok(())
    }

    /// Stores a snapshot of the aggregate's confirmed state.
    ///
    /// Rejected while the aggregate has unsaved changes: the snapshot would
    /// describe a state the event log cannot reproduce.
    #[tracing::instrument(
        skip(self, aggregate),
        fields(aggregate_type = A::aggregate_type(), aggregate_id = %aggregate.id())
    )]
    pub async fn save_snapshot<A>(&self, aggregate: &A) -> Result<()>
    where
        A: Aggregate + Serialize,
    {
        let store = self
            .snapshot_store
            .as_ref()
            .ok_or(RepositoryError::SnapshotStoreNotConfigured)?;

        if aggregate.root().has_unsaved_changes() {
            return Err(RepositoryError::Validation(
                "can't save snapshot with unsaved events".to_string(),
            ));
        }

        let snapshot = Snapshot::from_state(
            aggregate.id().clone(),
            A::aggregate_type(),
            aggregate.version(),
            aggregate,
        )?;
        store.save_snapshot(snapshot).await?;

        metrics::counter!("eventsourcing_snapshots_saved").increment(1);
        tracing::debug!(version = %aggregate.version(), "saved snapshot");
        Ok(())
    }

    async fn load_baseline<A>(&self, id: &AggregateId, aggregate_type: &str) -> Result<A>
    where
        A: Aggregate + DeserializeOwned,
    {
        let Some(store) = &self.snapshot_store else {
            return Ok(A::default());
        };

        match store.get_snapshot(id, aggregate_type).await {
            Ok(snapshot) => {
                let version = snapshot.version;
                let mut aggregate: A = snapshot.into_state()?;
                aggregate.root_mut().restore(id.clone(), version);
                Ok(aggregate)
            }
            Err(EventStoreError::SnapshotNotFound { .. }) => Ok(A::default()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Returns true if moving from `previous` to `current` crossed a multiple of
/// `interval`.
fn snapshot_due(previous: Version, current: Version, interval: u64) -> bool {
    let interval = i64::try_from(interval).unwrap_or(i64::MAX).max(1);
    current > previous && current.as_i64() / interval != previous.as_i64() / interval
}
