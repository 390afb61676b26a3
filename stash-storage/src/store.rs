//! The store handle callers construct.

use std::path::PathBuf;

use async_trait::async_trait;
use stash_core::{StoreConfig, StoreError};

use super::null_backend::NullStore;
use super::sqlite_backend::SqliteStore;
use super::traits::{CacheStore, CheckedParams, FetchedParams};

/// Either a persistent store or a null one.
///
/// `Store::open` persists; `Store::none` disables memoization without
/// changing the calling code.
#[derive(Debug, Clone)]
pub enum Store {
    Null(NullStore),
    Sqlite(SqliteStore),
}

impl Store {
    /// Persistent store at `path` with default settings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        SqliteStore::open_path(path).map(Self::Sqlite)
    }

    /// Persistent store from a full config.
    pub fn open_with(config: &StoreConfig) -> Result<Self, StoreError> {
        SqliteStore::open(config).map(Self::Sqlite)
    }

    /// Store that never hits.
    pub fn none() -> Self {
        Self::Null(NullStore)
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Sqlite(_))
    }

    pub fn as_sqlite(&self) -> Option<&SqliteStore> {
        match self {
            Self::Sqlite(store) => Some(store),
            Self::Null(_) => None,
        }
    }
}

#[async_trait]
impl CacheStore for Store {
    async fn get(
        &self,
        name: &str,
        version: i64,
        params: &str,
    ) -> Result<Option<String>, StoreError> {
        match self {
            Self::Null(store) => store.get(name, version, params).await,
            Self::Sqlite(store) => store.get(name, version, params).await,
        }
    }

    async fn put(
        &self,
        name: &str,
        version: i64,
        params: &str,
        result: &str,
    ) -> Result<(), StoreError> {
        match self {
            Self::Null(store) => store.put(name, version, params, result).await,
            Self::Sqlite(store) => store.put(name, version, params, result).await,
        }
    }

    async fn check(
        &self,
        name: &str,
        version: i64,
        params: &[String],
    ) -> Result<Vec<CheckedParams>, StoreError> {
        match self {
            Self::Null(store) => store.check(name, version, params).await,
            Self::Sqlite(store) => store.check(name, version, params).await,
        }
    }

    async fn getall(
        &self,
        name: &str,
        version: i64,
        params: &[String],
    ) -> Result<Vec<FetchedParams>, StoreError> {
        match self {
            Self::Null(store) => store.getall(name, version, params).await,
            Self::Sqlite(store) => store.getall(name, version, params).await,
        }
    }
}
