//! Tracing bootstrap for processes embedding the repository.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable selecting JSON log output.
pub const LOG_FORMAT_VAR: &str = "LOG_FORMAT";

/// Process logging settings.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `"json"` for structured output (default: human-readable)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json_logs: bool,
}

impl TelemetryConfig {
    /// Loads settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads settings through `lookup`, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            log_level: lookup("RUST_LOG").unwrap_or_else(|| Self::default().log_level),
            json_logs: lookup(LOG_FORMAT_VAR)
                .is_some_and(|format| format.eq_ignore_ascii_case("json")),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Installs the global tracing subscriber described by `config`.
///
/// Falls back to the `info` filter when the configured directive does not
/// parse. Returns false if a global subscriber was already installed.
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.is_ok()
}
