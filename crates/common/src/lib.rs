//! Shared types used across the event log, snapshot store and repository.

pub mod types;

pub use types::AggregateId;
