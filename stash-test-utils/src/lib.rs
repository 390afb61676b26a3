//! STASH Test Utilities
//!
//! Shared test infrastructure for the STASH workspace:
//! - Instrumented operations that count, time and fail on demand
//! - Proptest generators for params lists and map-shaped params
//! - Fixtures for temporary SQLite stores
//! - Assertions over `StashResult`

pub use stash_core::{
    canonical_json, CacheKey, CodecError, ConfigError, ExecutionError, MemoConfig, StashError,
    StashResult, StoreConfig, StoreError, WritePolicy,
};
pub use stash_ops::{Memoized, Operation, WarmReport};
pub use stash_storage::{CacheStore, NullStore, SqliteStore, Store};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

// ============================================================================
// MOCK OPERATIONS
// ============================================================================

/// `x -> 2x`, counting executions.
#[derive(Debug, Clone)]
pub struct CountingDouble {
    version: i64,
    max_concurrency: usize,
    calls: Arc<AtomicUsize>,
}

impl CountingDouble {
    pub fn new(version: i64) -> Self {
        Self {
            version,
            max_concurrency: 1,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Shared counter; survives moving the operation into a `Memoized`.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Operation for CountingDouble {
    type Params = i64;
    type Output = i64;

    fn name(&self) -> &str {
        "double"
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    async fn execute(&self, x: &i64) -> Result<i64, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(x * 2)
    }
}

/// Counters shared between a [`SlowEcho`] and the test observing it.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl ConcurrencyProbe {
    /// Highest number of simultaneous executions seen.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Returns its input after a delay, recording concurrency.
#[derive(Debug, Clone)]
pub struct SlowEcho {
    delay: Duration,
    max_concurrency: usize,
    probe: Arc<ConcurrencyProbe>,
}

impl SlowEcho {
    pub fn new(max_concurrency: usize, delay: Duration) -> Self {
        Self {
            delay,
            max_concurrency,
            probe: Arc::new(ConcurrencyProbe::default()),
        }
    }

    pub fn probe(&self) -> Arc<ConcurrencyProbe> {
        Arc::clone(&self.probe)
    }
}

#[async_trait]
impl Operation for SlowEcho {
    type Params = i64;
    type Output = i64;

    fn name(&self) -> &str {
        "slow_echo"
    }

    fn version(&self) -> i64 {
        1
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    async fn execute(&self, x: &i64) -> Result<i64, ExecutionError> {
        self.probe.enter();
        tokio::time::sleep(self.delay).await;
        self.probe.exit();
        Ok(*x)
    }
}

/// `x -> x + 100`, failing when `x` equals the configured value.
///
/// Records the order in which executions started.
#[derive(Debug, Clone)]
pub struct FailOn {
    fail_on: i64,
    max_concurrency: usize,
    delay: Duration,
    started: Arc<Mutex<Vec<i64>>>,
}

impl FailOn {
    pub fn new(fail_on: i64) -> Self {
        Self {
            fail_on,
            max_concurrency: 1,
            delay: Duration::ZERO,
            started: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// The failing item fails after `delay`; every other item takes twice
    /// as long, so siblings are still running when the failure lands.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn started_log(&self) -> Arc<Mutex<Vec<i64>>> {
        Arc::clone(&self.started)
    }
}

#[async_trait]
impl Operation for FailOn {
    type Params = i64;
    type Output = i64;

    fn name(&self) -> &str {
        "fail_on"
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    async fn execute(&self, x: &i64) -> Result<i64, ExecutionError> {
        self.started.lock().await.push(*x);
        if *x == self.fail_on {
            tokio::time::sleep(self.delay).await;
            return Err(ExecutionError::new(self.name(), format!("refusing {}", x)));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay * 2).await;
        }
        Ok(x + 100)
    }
}

/// Sums a map of named weights. Params are map-shaped so key order matters
/// only if encoding is not canonical.
#[derive(Debug, Clone, Default)]
pub struct WeightSum {
    calls: Arc<AtomicUsize>,
}

impl WeightSum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Operation for WeightSum {
    type Params = HashMap<String, i64>;
    type Output = i64;

    fn name(&self) -> &str {
        "weight_sum"
    }

    async fn execute(&self, weights: &HashMap<String, i64>) -> Result<i64, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(weights.values().sum())
    }
}

/// Catches its own failures so they are memoized as values.
#[derive(Debug, Clone, Default)]
pub struct CheckedSqrt {
    calls: Arc<AtomicUsize>,
}

impl CheckedSqrt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Operation for CheckedSqrt {
    type Params = i64;
    type Output = Result<i64, String>;

    fn name(&self) -> &str {
        "checked_sqrt"
    }

    fn max_concurrency(&self) -> usize {
        4
    }

    async fn execute(&self, x: &i64) -> Result<Result<i64, String>, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *x < 0 {
            return Ok(Err(format!("negative input {}", x)));
        }
        Ok(Ok((*x as f64).sqrt().floor() as i64))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for STASH inputs.

    use super::*;
    use proptest::prelude::*;

    /// Params lists drawn from a small domain so duplicates are common.
    pub fn arb_params_list(max_len: usize) -> impl Strategy<Value = Vec<i64>> {
        prop::collection::vec(-20i64..20, 0..max_len)
    }

    /// Map-shaped params with short keys.
    pub fn arb_weights() -> impl Strategy<Value = HashMap<String, i64>> {
        prop::collection::hash_map("[a-z]{1,6}", -1000i64..1000, 0..8)
    }

    /// Nested JSON values with objects at every level.
    pub fn arb_json() -> impl Strategy<Value = serde_json::Value> {
        let leaf = prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            "[ -~]{0,12}".prop_map(serde_json::Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::from),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Chunk sizes small enough to force multiple statements.
    pub fn arb_chunk_size() -> impl Strategy<Value = usize> {
        1usize..8
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Temporary stores. Keep the returned `TempDir` alive for as long as
    //! the store is in use.

    use super::*;
    use tempfile::TempDir;

    pub const CACHE_FILE: &str = "cache.db";

    /// Persistent store in a fresh temporary directory.
    pub fn temp_store() -> (Arc<Store>, TempDir) {
        temp_store_with(|config| config)
    }

    /// Persistent store with a tweaked config.
    pub fn temp_store_with(
        configure: impl FnOnce(StoreConfig) -> StoreConfig,
    ) -> (Arc<Store>, TempDir) {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = configure(StoreConfig::new(temp_dir.path().join(CACHE_FILE)));
        let store = Store::open_with(&config).expect("failed to open temp store");
        (Arc::new(store), temp_dir)
    }

    /// Memoization disabled.
    pub fn null_store() -> Arc<Store> {
        Arc::new(Store::none())
    }

    /// Config that writes in the background.
    pub fn background_config() -> MemoConfig {
        MemoConfig::new().with_write_policy(WritePolicy::Background)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over `StashResult` variants.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &StashResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert an execution error raised by `operation`.
    #[track_caller]
    pub fn assert_execution_error<T: std::fmt::Debug>(result: &StashResult<T>, operation: &str) {
        match result {
            Err(StashError::Execution(e)) => {
                assert_eq!(e.operation, operation, "Wrong operation in ExecutionError");
            }
            other => panic!("Expected Execution error from {}, got: {:?}", operation, other),
        }
    }

    #[track_caller]
    pub fn assert_codec_error<T: std::fmt::Debug>(result: &StashResult<T>) {
        match result {
            Err(StashError::Codec(_)) => {}
            other => panic!("Expected Codec error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &StashResult<T>) {
        match result {
            Err(StashError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    /// Assert two results lists hold the same pairs, ignoring order.
    #[track_caller]
    pub fn assert_same_pairs<P, R>(left: &[(P, R)], right: &[(P, R)])
    where
        P: Ord + Clone + std::fmt::Debug,
        R: Ord + Clone + std::fmt::Debug,
    {
        let mut left = left.to_vec();
        let mut right = right.to_vec();
        left.sort();
        right.sort();
        assert_eq!(left, right);
    }
}

// ============================================================================
// TESTS
// ============================================================================
