//! Collaborator contracts for the event-sourced repository.
//!
//! - [`EventStore`]: durable, versioned, per-aggregate append-only event log
//! - [`SnapshotStore`]: point-in-time aggregate state records
//! - [`InMemoryEventStore`] / [`InMemorySnapshotStore`]: reference backends

pub mod error;
pub mod event;
pub mod memory;
pub mod snapshot;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventId, Version};
pub use memory::{InMemoryEventStore, InMemorySnapshotStore};
pub use snapshot::{Snapshot, SnapshotStore};
pub use store::{AppendOptions, EventStore, EventStoreExt};
