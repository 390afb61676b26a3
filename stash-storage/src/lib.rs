//! STASH Storage - Cache Store Contract and Backends
//!
//! Defines the persistence contract for memoized results and its two
//! implementations: a null store for disabled memoization and a SQLite
//! append-only log for everything else.

pub mod null_backend;
pub mod sqlite_backend;
pub mod store;
pub mod traits;

pub use null_backend::NullStore;
pub use sqlite_backend::SqliteStore;
pub use store::Store;
pub use traits::{CacheStore, CheckedParams, FetchedParams};
