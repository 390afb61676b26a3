//! Tracing subscriber setup for binaries and tests built on STASH.
//!
//! Library code only emits events through `tracing`; nothing here runs
//! unless the embedding program calls [`init_tracing`].

use stash_core::{StashError, StashResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive when neither `RUST_LOG` nor `STASH_LOG` is set.
pub const DEFAULT_FILTER: &str = "stash_ops=info,stash_storage=info,warn";

/// Log output configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Create TelemetryConfig from environment variables.
    ///
    /// Environment variables:
    /// - `STASH_LOG`: Filter directive (default: [`DEFAULT_FILTER`])
    /// - `STASH_LOG_JSON`: "true" or "1" for JSON output (default: false)
    pub fn from_env() -> Self {
        Self {
            filter: std::env::var("STASH_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
            json: std::env::var("STASH_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.filter`. Fails instead of
/// panicking when a global subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> StashResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| StashError::Telemetry {
            reason: format!("Invalid filter {:?}: {}", config.filter, e),
        })?;

    let json_layer = config
        .json
        .then(|| tracing_subscriber::fmt::layer().json());
    let plain_layer = (!config.json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(plain_layer)
        .try_init()
        .map_err(|e| StashError::Telemetry {
            reason: format!("Failed to init subscriber: {}", e),
        })?;

    tracing::debug!(filter = %config.filter, json = config.json, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.filter, DEFAULT_FILTER);
        assert!(!config.json);
    }

    #[test]
    fn test_builders() {
        let config = TelemetryConfig::default()
            .with_filter("stash_ops=trace")
            .with_json(true);
        assert_eq!(config.filter, "stash_ops=trace");
        assert!(config.json);
    }

    #[test]
    fn test_second_init_is_an_error() {
        let config = TelemetryConfig::default();
        let _ = init_tracing(&config);
        let err = init_tracing(&config).unwrap_err();
        assert!(matches!(err, StashError::Telemetry { .. }));
    }
}
