//! Store that remembers nothing.
//!
//! Used when memoization is switched off: every lookup misses and every
//! write is dropped, so each call executes.

use async_trait::async_trait;
use stash_core::StoreError;

use super::traits::{CacheStore, CheckedParams, FetchedParams};

#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CacheStore for NullStore {
    async fn get(
        &self,
        _name: &str,
        _version: i64,
        _params: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    async fn put(
        &self,
        _name: &str,
        _version: i64,
        _params: &str,
        _result: &str,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn check(
        &self,
        _name: &str,
        _version: i64,
        params: &[String],
    ) -> Result<Vec<CheckedParams>, StoreError> {
        Ok(params
            .iter()
            .map(|p| CheckedParams {
                params: p.clone(),
                cached: false,
            })
            .collect())
    }

    async fn getall(
        &self,
        _name: &str,
        _version: i64,
        params: &[String],
    ) -> Result<Vec<FetchedParams>, StoreError> {
        Ok(params
            .iter()
            .map(|p| FetchedParams {
                params: p.clone(),
                result: None,
            })
            .collect())
    }
}
