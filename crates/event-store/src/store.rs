use async_trait::async_trait;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Durable version the aggregate must be at for the append to succeed.
    ///
    /// Without it only version contiguity is enforced.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options expecting the aggregate to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the aggregate to not exist (new aggregate).
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// Durable, versioned, per-aggregate append-only event log.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events for a single aggregate.
    ///
    /// The batch is appended atomically: either every event becomes durable
    /// or none does. If `options.expected_version` is set and the durable
    /// version differs, the call fails with `ConcurrencyConflict`.
    ///
    /// Returns the version of the last appended event.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Retrieves the events of an aggregate with a version strictly greater
    /// than `after_version`, in ascending version order.
    async fn get_events(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
        after_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// Gets the current durable version of an aggregate.
    ///
    /// Returns None if the aggregate has no events.
    async fn get_aggregate_version(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
    ) -> Result<Option<Version>>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Retrieves the full history of an aggregate.
    async fn get_all_events(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
    ) -> Result<Vec<EventEnvelope>> {
        self.get_events(aggregate_id, aggregate_type, Version::initial())
            .await
    }

    /// Checks if an aggregate exists (has any events).
    async fn aggregate_exists(&self, aggregate_id: &AggregateId, aggregate_type: &str) -> Result<bool> {
        Ok(self
            .get_aggregate_version(aggregate_id, aggregate_type)
            .await?
            .is_some())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates a batch before appending.
///
/// A valid batch is non-empty, targets a single aggregate and carries
/// contiguous versions.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some((first, rest)) = events.split_first() else {
        return Err(EventStoreError::Validation(
            "Cannot append empty event list".to_string(),
        ));
    };

    if first.aggregate_id.is_blank() {
        return Err(EventStoreError::Validation(
            "Events must carry an aggregate id".to_string(),
        ));
    }

    let mut expected_version = first.version;
    for event in rest {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::Validation(
                "All events must be for the same aggregate".to_string(),
            ));
        }
        if event.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::Validation(
                "All events must have the same aggregate type".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::Validation(format!(
                "Event versions must be sequential. Expected {}, got {}",
                expected_version, event.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(aggregate_id: &str, aggregate_type: &str, version: i64) -> EventEnvelope {
        EventEnvelope::record(
            aggregate_id,
            aggregate_type,
            Version::new(version),
            "TestEvent",
            serde_json::json!({}),
        )
    }

    #[test]
    fn accepts_contiguous_batch() {
        let events = vec![event("a", "T", 3), event("a", "T", 4), event("a", "T", 5)];
        assert!(validate_events_for_append(&events).is_ok());
    }

    #[test]
    fn rejects_empty_batch() {
        let result = validate_events_for_append(&[]);
        assert!(matches!(result, Err(EventStoreError::Validation(_))));
    }

    #[test]
    fn rejects_blank_aggregate_id() {
        let result = validate_events_for_append(&[event("", "T", 1)]);
        assert!(matches!(result, Err(EventStoreError::Validation(_))));
    }

    #[test]
    fn rejects_mixed_aggregates() {
        let events = vec![event("a", "T", 1), event("b", "T", 2)];
        assert!(validate_events_for_append(&events).is_err());

        let events = vec![event("a", "T", 1), event("a", "U", 2)];
        assert!(validate_events_for_append(&events).is_err());
    }

    #[test]
    fn rejects_version_gaps() {
        let events = vec![event("a", "T", 1), event("a", "T", 3)];
        let err = validate_events_for_append(&events).unwrap_err();
        assert!(err.to_string().contains("Expected 2, got 3"));
    }
}
