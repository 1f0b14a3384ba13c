//! Aggregate contract: identity, versioning, change buffer and replay.

use std::collections::HashMap;

use common::AggregateId;
use event_store::{EventEnvelope, Version};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{RepositoryError, Result};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Every event kind this type knows how to decode.
    ///
    /// Recorded events of any other kind are skipped during replay.
    const EVENT_TYPES: &'static [&'static str];

    /// Returns the event kind.
    ///
    /// Stored alongside the payload and used for filtering.
    fn event_type(&self) -> &'static str;

    /// Returns true if `event_type` is one of [`Self::EVENT_TYPES`].
    fn is_known(event_type: &str) -> bool {
        Self::EVENT_TYPES.contains(&event_type)
    }
}

/// Bookkeeping shared by every aggregate: identity, confirmed version and
/// the buffer of events not yet persisted.
///
/// Embed it in an aggregate struct and expose it through
/// [`Aggregate::root`] / [`Aggregate::root_mut`]. The buffer is never
/// serialized, so snapshots only ever carry confirmed state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateRoot {
    #[serde(default)]
    id: AggregateId,

    #[serde(default)]
    version: Version,

    #[serde(skip)]
    changes: Vec<EventEnvelope>,
}

impl AggregateRoot {
    /// Returns the aggregate identity (blank until assigned).
    pub fn id(&self) -> &AggregateId {
        &self.id
    }

    /// Assigns the identity before the first change is tracked.
    ///
    /// Without an explicit identity, the first tracked change generates one.
    pub fn set_id(&mut self, id: impl Into<AggregateId>) -> Result<()> {
        let id = id.into();
        if id.is_blank() {
            return Err(RepositoryError::Validation(
                "aggregate id can't be blank".to_string(),
            ));
        }
        if !self.id.is_blank() {
            return Err(RepositoryError::Validation(format!(
                "aggregate id is already set to {}",
                self.id
            )));
        }
        self.id = id;
        Ok(())
    }

    /// Returns the highest version known to be durable.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the version including buffered, unsaved events.
    pub fn current_version(&self) -> Version {
        self.version.advance(self.changes.len())
    }

    /// Returns the events tracked since the last successful save.
    pub fn changes(&self) -> &[EventEnvelope] {
        &self.changes
    }

    /// Returns true if there are tracked events that have not been saved.
    pub fn has_unsaved_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Marks the buffered events as durable: the confirmed version moves to
    /// the last buffered event and the buffer is emptied.
    ///
    /// Only called after the event log accepted the batch.
    pub(crate) fn confirm_commit(&mut self) {
        if let Some(last) = self.changes.last() {
            self.version = last.version;
        }
        self.changes.clear();
    }

    /// Rebinds identity and confirmed version after loading.
    pub(crate) fn restore(&mut self, id: AggregateId, version: Version) {
        self.id = id;
        self.version = version;
    }

    fn record_replayed(&mut self, aggregate_id: AggregateId, version: Version) {
        if self.id.is_blank() {
            self.id = aggregate_id;
        }
        self.version = version;
    }
}

/// Trait for aggregates in an event-sourced system.
///
/// In event sourcing, aggregates:
/// - Are rebuilt by replaying events
/// - Record new events through [`Aggregate::track_change`]
/// - Apply events to update state (pure, deterministic)
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Returns the stable aggregate type tag.
    ///
    /// Stored with every event and snapshot, so it must not change once
    /// data has been written.
    fn aggregate_type() -> &'static str;

    /// Returns the embedded bookkeeping.
    fn root(&self) -> &AggregateRoot;

    /// Returns the embedded bookkeeping mutably.
    fn root_mut(&mut self) -> &mut AggregateRoot;

    /// Applies an event to the aggregate, updating its state.
    ///
    /// This method must be pure and deterministic:
    /// - Given the same state and event, it must always produce the same new state
    /// - It must not have side effects
    /// - It must not fail (events represent facts that have happened)
    fn apply(&mut self, event: &Self::Event);

    /// Returns the aggregate's identity.
    fn id(&self) -> &AggregateId {
        self.root().id()
    }

    /// Returns the confirmed version of the aggregate.
    fn version(&self) -> Version {
        self.root().version()
    }

    /// Returns the buffered events that have not been saved yet.
    fn changes(&self) -> &[EventEnvelope] {
        self.root().changes()
    }

    /// Records a new event and applies it immediately.
    fn track_change(&mut self, event: Self::Event) -> Result<()> {
        self.track_change_with_metadata(event, HashMap::new())
    }

    /// Records a new event carrying metadata and applies it immediately.
    ///
    /// The event gets the next sequential version after the confirmed and
    /// buffered ones. Kinds missing from [`DomainEvent::EVENT_TYPES`] are
    /// rejected, as replay skips them. On any failure nothing is changed.
    fn track_change_with_metadata(
        &mut self,
        event: Self::Event,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let event_type = event.event_type();
        if !<Self::Event as DomainEvent>::is_known(event_type) {
            return Err(RepositoryError::Validation(format!(
                "event kind {event_type} is not listed in EVENT_TYPES of {}",
                Self::aggregate_type()
            )));
        }
        let payload = serde_json::to_value(&event)?;

        let root = self.root_mut();
        if root.id.is_blank() {
            root.id = AggregateId::new();
        }
        let envelope = EventEnvelope::record(
            root.id.clone(),
            Self::aggregate_type(),
            root.current_version().next(),
            event_type,
            payload,
        )
        .with_metadata(metadata);

        self.apply(&event);
        self.root_mut().changes.push(envelope);
        Ok(())
    }

    /// Replays recorded events on top of the current state.
    ///
    /// Events must arrive in ascending version order. The version ends at the
    /// last event's version, or stays unchanged for an empty history. Kinds
    /// missing from [`DomainEvent::EVENT_TYPES`] are skipped but still
    /// advance the version. A known kind whose payload fails to decode is
    /// an error, and the aggregate is left partially rebuilt.
    fn build_from_history<I>(&mut self, events: I) -> Result<()>
    where
        I: IntoIterator<Item = EventEnvelope>,
    {
        for envelope in events {
            let EventEnvelope {
                event_type,
                aggregate_id,
                version,
                payload,
                ..
            } = envelope;

            if <Self::Event as DomainEvent>::is_known(&event_type) {
                let event: Self::Event = serde_json::from_value(payload)?;
                self.apply(&event);
            } else {
                tracing::debug!(
                    aggregate_type = Self::aggregate_type(),
                    %aggregate_id,
                    %version,
                    event_type = %event_type,
                    "skipping unknown event kind"
                );
            }

            self.root_mut().record_replayed(aggregate_id, version);
        }
        Ok(())
    }
}

/// Trait for aggregates that support snapshotting.
///
/// Snapshotting is an optimization to avoid replaying all events when loading
/// an aggregate. The aggregate state is periodically serialized and stored.
pub trait SnapshotCapable: Aggregate + Serialize + DeserializeOwned {
    /// Returns the snapshot interval (number of events between snapshots).
    ///
    /// A value of 100 means a snapshot is taken every 100 events.
    fn snapshot_interval() -> u64 {
        100
    }
}
