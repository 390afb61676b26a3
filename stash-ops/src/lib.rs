//! STASH Ops - Memoized Operations
//!
//! Wraps a named, versioned, possibly expensive computation so that its
//! results are persisted and reused across runs:
//!
//! - [`Operation`]: identity, the computation, and payload encoders
//! - [`Memoized`]: the engine binding an operation to a store (`get`,
//!   `getall`, `cacheall`) with bounded, fail-fast bulk execution
//! - [`WarmReport`]: hit/miss accounting for bulk calls
//! - [`telemetry`]: subscriber setup for programs embedding the engine
//!
//! Invalidation is by version only: bump `Operation::version` and every
//! earlier entry stops matching. Nothing is ever evicted.

pub mod memo;
pub mod operation;
pub mod report;
pub mod telemetry;

pub use memo::Memoized;
pub use operation::Operation;
pub use report::WarmReport;
pub use telemetry::{init_tracing, TelemetryConfig};

pub use stash_core::{
    CacheKey, ExecutionError, Governor, MemoConfig, Pipe, StashError, StashResult, StoreConfig,
    WritePolicy,
};
pub use stash_storage::{CacheStore, NullStore, SqliteStore, Store};
