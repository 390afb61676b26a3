//! Configuration types
//!
//! Values are loaded from environment variables with defaults suited to a
//! single local cache file.

use std::path::PathBuf;
use std::time::Duration;

use crate::ConfigError;

/// Default number of canonical params bound per bulk lookup statement.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Default number of reader connections held by a store.
pub const DEFAULT_READ_POOL_SIZE: usize = 4;

/// Default capacity of the bounded channel behind a buffered pipe.
pub const DEFAULT_PIPE_BUFFER: usize = 64;

// ============================================================================
// STORE CONFIGURATION
// ============================================================================

/// Configuration for the persistent cache store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Path of the SQLite file. Parent directories are created on open.
    pub path: PathBuf,
    /// Maximum number of params bound per bulk lookup statement.
    pub chunk_size: usize,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Optional override of the backend's bound-variable cap.
    pub variable_limit: Option<i32>,
    /// Reader connections opened alongside the single writer.
    pub read_pool_size: usize,
}

impl StoreConfig {
    /// Create a store config for the given path with default values.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            busy_timeout: Duration::from_secs(5),
            variable_limit: None,
            read_pool_size: DEFAULT_READ_POOL_SIZE,
        }
    }

    /// Create StoreConfig from environment variables.
    ///
    /// Environment variables:
    /// - `STASH_DB_PATH`: Cache file path (default: "stash.db")
    /// - `STASH_CHUNK_SIZE`: Params per bulk statement (default: 10000)
    /// - `STASH_BUSY_TIMEOUT_MS`: Busy timeout in milliseconds (default: 5000)
    /// - `STASH_VARIABLE_LIMIT`: Bound-variable cap applied to the connection (default: unset)
    /// - `STASH_READ_POOL_SIZE`: Reader connections (default: 4)
    pub fn from_env() -> Self {
        let path = std::env::var("STASH_DB_PATH").unwrap_or_else(|_| "stash.db".to_string());

        let chunk_size = std::env::var("STASH_CHUNK_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CHUNK_SIZE);

        let busy_timeout_ms = std::env::var("STASH_BUSY_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);

        let variable_limit = std::env::var("STASH_VARIABLE_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok());

        let read_pool_size = std::env::var("STASH_READ_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_READ_POOL_SIZE);

        Self {
            path: PathBuf::from(path),
            chunk_size,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
            variable_limit,
            read_pool_size,
        }
    }

    /// Set the bulk lookup chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Cap the number of bound variables per statement.
    pub fn with_variable_limit(mut self, limit: i32) -> Self {
        self.variable_limit = Some(limit);
        self
    }

    /// Set the number of reader connections.
    pub fn with_read_pool_size(mut self, size: usize) -> Self {
        self.read_pool_size = size;
        self
    }

    /// Check the values that cannot be clamped into range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chunk_size".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.read_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "read_pool_size".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(limit) = self.variable_limit {
            // name and version are always bound alongside the chunk
            if limit < 3 {
                return Err(ConfigError::InvalidValue {
                    field: "variable_limit".to_string(),
                    value: limit.to_string(),
                    reason: "must leave room for at least one param".to_string(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// MEMO CONFIGURATION
// ============================================================================

/// When a freshly computed result reaches the store relative to `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// `get` returns only after the write has completed.
    #[default]
    Await,
    /// `get` returns immediately; the write runs as a tracked task whose
    /// failure surfaces from `flush_writes`.
    Background,
}

impl WritePolicy {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "await" => Ok(Self::Await),
            "background" => Ok(Self::Background),
            other => Err(ConfigError::InvalidValue {
                field: "write_policy".to_string(),
                value: other.to_string(),
                reason: "expected \"await\" or \"background\"".to_string(),
            }),
        }
    }
}

/// Engine configuration shared by memoized operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoConfig {
    pub write_policy: WritePolicy,
    /// Capacity of the channel used when bulk results are streamed.
    pub pipe_buffer: usize,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            write_policy: WritePolicy::Await,
            pipe_buffer: DEFAULT_PIPE_BUFFER,
        }
    }
}

impl MemoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create MemoConfig from environment variables.
    ///
    /// Environment variables:
    /// - `STASH_WRITE_POLICY`: "await" or "background" (default: await)
    /// - `STASH_PIPE_BUFFER`: Buffered pipe capacity (default: 64)
    pub fn from_env() -> Result<Self, ConfigError> {
        let write_policy = match std::env::var("STASH_WRITE_POLICY") {
            Ok(value) => WritePolicy::parse(&value)?,
            Err(_) => WritePolicy::default(),
        };

        let pipe_buffer = std::env::var("STASH_PIPE_BUFFER")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PIPE_BUFFER);

        Ok(Self {
            write_policy,
            pipe_buffer: pipe_buffer.max(1),
        })
    }

    /// Set the write policy.
    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Set the buffered pipe capacity.
    pub fn with_pipe_buffer(mut self, capacity: usize) -> Self {
        self.pipe_buffer = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfig::new("/tmp/cache.db")
            .with_chunk_size(500)
            .with_busy_timeout(Duration::from_millis(250))
            .with_variable_limit(1000)
            .with_read_pool_size(2);

        assert_eq!(config.path, PathBuf::from("/tmp/cache.db"));
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.variable_limit, Some(1000));
        assert_eq!(config.read_pool_size, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_config_rejects_zero_chunk() {
        let config = StoreConfig::new("x.db").with_chunk_size(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_store_config_rejects_empty_read_pool() {
        assert_eq!(StoreConfig::new("x.db").read_pool_size, DEFAULT_READ_POOL_SIZE);
        let err = StoreConfig::new("x.db")
            .with_read_pool_size(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("read_pool_size"));
    }

    #[test]
    fn test_store_config_rejects_tiny_variable_limit() {
        let config = StoreConfig::new("x.db").with_variable_limit(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_write_policy_parse() {
        assert_eq!(WritePolicy::parse("await"), Ok(WritePolicy::Await));
        assert_eq!(WritePolicy::parse(" Background "), Ok(WritePolicy::Background));
        assert!(WritePolicy::parse("eventually").is_err());
    }

    #[test]
    fn test_memo_config_defaults() {
        let config = MemoConfig::new().with_pipe_buffer(0);
        assert_eq!(config.write_policy, WritePolicy::Await);
        assert_eq!(config.pipe_buffer, 1);
    }
}
