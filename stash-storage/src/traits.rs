//! Cache store contract.
//!
//! A store is an append-only log of `(name, version, params, result)` rows.
//! Reads resolve to the most recent row for a key. Nothing is ever updated
//! or deleted through this trait.

use async_trait::async_trait;
use stash_core::StoreError;

/// Outcome of a bulk membership check for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedParams {
    pub params: String,
    pub cached: bool,
}

/// Outcome of a bulk fetch for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedParams {
    pub params: String,
    /// Serialized result of the most recent entry, if any.
    pub result: Option<String>,
}

/// Persistence contract for memoized results.
///
/// Bulk methods return exactly one entry per input, in input order, even
/// when the backend returns duplicate rows or none at all. Any limits on
/// statement size are the implementation's business; callers may pass
/// arbitrarily long lists.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Most recent serialized result for the key, or `None`.
    async fn get(
        &self,
        name: &str,
        version: i64,
        params: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Append one entry. The store stamps the insertion time.
    async fn put(
        &self,
        name: &str,
        version: i64,
        params: &str,
        result: &str,
    ) -> Result<(), StoreError>;

    /// Bulk membership test.
    async fn check(
        &self,
        name: &str,
        version: i64,
        params: &[String],
    ) -> Result<Vec<CheckedParams>, StoreError>;

    /// Bulk fetch of the most recent result per input.
    async fn getall(
        &self,
        name: &str,
        version: i64,
        params: &[String],
    ) -> Result<Vec<FetchedParams>, StoreError>;
}
