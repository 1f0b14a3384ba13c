//! Event-sourced aggregate persistence.
//!
//! This crate binds the event log, the snapshot store and an in-process
//! notification hub around a strict versioning discipline:
//! - [`Aggregate`] trait and [`AggregateRoot`] change buffer
//! - [`Repository`] for save, get and snapshot operations
//! - [`EventStream`] for synchronous publication of committed batches

pub mod aggregate;
pub mod config;
pub mod error;
pub mod notification;
pub mod repository;
pub mod telemetry;

pub use aggregate::{Aggregate, AggregateRoot, DomainEvent, SnapshotCapable};
pub use config::RepositoryConfig;
pub use error::{RepositoryError, Result};
pub use notification::{
    DeliveryFailure, DeliveryReport, EventStream, SubscriberError, Subscription,
    SubscriptionFilter,
};
pub use repository::{Repository, SaveOutcome};
pub use telemetry::{TelemetryConfig, init_tracing};

pub use common::AggregateId;
pub use event_store::{EventEnvelope, Version};
