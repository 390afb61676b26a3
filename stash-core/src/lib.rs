//! STASH Core - Shared Types and Primitives
//!
//! Error taxonomy, configuration, cache keys with canonical JSON, the
//! streaming [`Pipe`] used to chunk bulk lookups, and the [`Governor`] that
//! bounds in-flight executions. All other crates depend on this.

pub mod config;
pub mod error;
pub mod governor;
pub mod key;
pub mod pipe;

pub use config::{
    MemoConfig, StoreConfig, WritePolicy, DEFAULT_CHUNK_SIZE, DEFAULT_PIPE_BUFFER,
    DEFAULT_READ_POOL_SIZE,
};
pub use error::{
    CodecError, ConfigError, ExecutionError, StashError, StashResult, StoreError,
};
pub use governor::{Governor, GovernorPermit};
pub use key::{canonical_json, from_canonical, to_canonical, CacheKey};
pub use pipe::Pipe;
