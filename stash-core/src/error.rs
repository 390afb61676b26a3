//! Error types for STASH operations

use thiserror::Error;

/// Cache store errors.
///
/// None of these are recovered inside the engine; they are logged at the
/// failing statement and handed back to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Failed to open store at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Query failed ({statement}): {reason}")]
    Query { statement: String, reason: String },

    #[error("Insert failed for {name} v{version}: {reason}")]
    Insert {
        name: String,
        version: i64,
        reason: String,
    },

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Store task failed to complete: {reason}")]
    TaskJoin { reason: String },
}

/// Payload encoding errors.
///
/// A stored payload that fails to decode is fatal for the call that read it;
/// it is never downgraded to a cache miss.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to serialize {what}: {reason}")]
    Serialize { what: &'static str, reason: String },

    #[error("Failed to deserialize {what}: {reason}")]
    Deserialize { what: &'static str, reason: String },
}

/// Failure raised by an operation's `execute`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Operation {operation} failed: {reason}")]
pub struct ExecutionError {
    pub operation: String,
    pub reason: String,
}

impl ExecutionError {
    pub fn new(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all STASH errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StashError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Concurrency governor closed")]
    GovernorClosed,

    #[error("Telemetry initialization failed: {reason}")]
    Telemetry { reason: String },
}

/// Result type alias for STASH operations.
pub type StashResult<T> = Result<T, StashError>;

// =============================================================================
// TESTS
// =============================================================================
