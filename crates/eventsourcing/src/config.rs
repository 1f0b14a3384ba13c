//! Repository configuration loaded from environment variables.

use crate::aggregate::SnapshotCapable;

/// Environment variable overriding every aggregate's snapshot interval.
pub const SNAPSHOT_INTERVAL_VAR: &str = "EVENTSOURCING_SNAPSHOT_INTERVAL";

/// Largest usable snapshot interval; versions are `i64`.
pub const MAX_SNAPSHOT_INTERVAL: u64 = i64::MAX as u64;

/// Repository configuration with sensible defaults.
///
/// Reads `EVENTSOURCING_SNAPSHOT_INTERVAL`: events between automatic
/// snapshots (default: each aggregate's own interval). Values outside
/// `1..=MAX_SNAPSHOT_INTERVAL` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub snapshot_interval: Option<u64>,
}

impl RepositoryConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            snapshot_interval: lookup(SNAPSHOT_INTERVAL_VAR)
                .and_then(|v| v.trim().parse().ok())
                .filter(|interval| (1..=MAX_SNAPSHOT_INTERVAL).contains(interval)),
        }
    }

    /// Overrides the snapshot interval for every aggregate type.
    pub fn with_snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot_interval = Some(interval.clamp(1, MAX_SNAPSHOT_INTERVAL));
        self
    }

    /// Returns the snapshot interval that applies to `A`.
    pub fn snapshot_interval_for<A: SnapshotCapable>(&self) -> u64 {
        self.snapshot_interval
            .unwrap_or_else(A::snapshot_interval)
            .clamp(1, MAX_SNAPSHOT_INTERVAL)
    }
}
