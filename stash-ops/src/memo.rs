//! Memoizing execution engine.
//!
//! [`Memoized`] binds an [`Operation`] to an injected store and drives its
//! three entry points:
//!
//! - `get`: one params value. Hit returns the stored result; miss executes,
//!   persists and returns.
//! - `getall`: many params. Hits come back first, in input order; misses run
//!   under the governor and are appended in **completion order**. Callers
//!   must pair outputs by the params carried in each tuple, never by
//!   position.
//! - `cacheall`: many params, results discarded. Only misses execute; the
//!   point is to warm the store.
//!
//! # Per-call state
//!
//! ```text
//! CheckingCache -> Hit  -> Return
//!               -> Miss -> Executing -> Persisting -> Return
//! ```
//!
//! # Failure policy
//!
//! Store and decode errors propagate. A stored payload that fails to decode
//! is an error, not a miss. Bulk calls are fail-fast: the first failing item
//! (execute, encode or write) drops every execution still in flight and stops
//! admitting new ones. Results written before the failure stay in the store,
//! so retrying the whole call only redoes the missing work.
//!
//! # Limits
//!
//! The engine has no timeouts. An `execute` that never resolves holds its
//! governor slot forever and, with a narrow governor, stalls the bulk call.

use std::sync::{Arc, Mutex};

use futures_util::stream::{FuturesUnordered, StreamExt};
use stash_core::{
    CacheKey, Governor, GovernorPermit, MemoConfig, Pipe, StashResult, StoreError, WritePolicy,
};
use stash_storage::{CacheStore, Store};
use tokio::task::JoinSet;

use crate::operation::Operation;
use crate::report::WarmReport;

type Output<O> = <O as Operation>::Output;
type Params<O> = <O as Operation>::Params;

/// Background writes issued by `get` and not yet flushed.
///
/// Finished tasks are reaped whenever the set is touched, so memory tracks
/// the writes still running, not every write ever issued.
#[derive(Default)]
struct BackgroundWrites {
    running: JoinSet<Result<(), StoreError>>,
    /// Writes reaped since the last flush.
    landed: usize,
    /// First failure reaped since the last flush.
    first_error: Option<StoreError>,
}

impl BackgroundWrites {
    fn record(&mut self, joined: Result<Result<(), StoreError>, tokio::task::JoinError>) {
        match joined {
            Ok(Ok(())) => self.landed += 1,
            Ok(Err(e)) => {
                self.first_error.get_or_insert(e);
            }
            Err(e) => {
                self.first_error.get_or_insert(StoreError::TaskJoin {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn reap(&mut self) {
        while let Some(joined) = self.running.try_join_next() {
            self.record(joined);
        }
    }
}

/// An operation bound to a store.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(Store::open("cache.db")?);
/// let double = Memoized::new(Double, store);
///
/// assert_eq!(double.get(&3).await?, 6);           // executes
/// assert_eq!(double.get(&3).await?, 6);           // served from the store
/// let report = double.cacheall(&[1, 2, 3]).await?; // "1/3 cached (33.3%)"
/// ```
pub struct Memoized<O, S = Store>
where
    O: Operation,
    S: CacheStore + 'static,
{
    op: O,
    store: Arc<S>,
    governor: Governor,
    config: MemoConfig,
    writes: Mutex<BackgroundWrites>,
}

impl<O, S> Memoized<O, S>
where
    O: Operation,
    S: CacheStore + 'static,
{
    /// Bind `op` to `store` with the default config.
    pub fn new(op: O, store: Arc<S>) -> Self {
        Self::with_config(op, store, MemoConfig::default())
    }

    pub fn with_config(op: O, store: Arc<S>, config: MemoConfig) -> Self {
        let governor = Governor::new(op.max_concurrency());
        Self {
            op,
            store,
            governor,
            config,
            writes: Mutex::new(BackgroundWrites::default()),
        }
    }

    pub fn operation(&self) -> &O {
        &self.op
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    pub fn config(&self) -> &MemoConfig {
        &self.config
    }

    /// Cache key for `params`.
    pub fn cache_key(&self, params: &Params<O>) -> StashResult<CacheKey> {
        Ok(CacheKey::new(
            self.op.name(),
            self.op.version(),
            self.op.serialize_params(params)?,
        ))
    }

    /// Whether `params` has a stored result. Never executes.
    pub async fn is_cached(&self, params: &Params<O>) -> StashResult<bool> {
        let encoded = self.op.serialize_params(params)?;
        let stored = self
            .store
            .get(self.op.name(), self.op.version(), &encoded)
            .await?;
        Ok(stored.is_some())
    }

    /// Bulk membership test, in input order. Never executes.
    pub async fn check(&self, params: &[Params<O>]) -> StashResult<Vec<(Params<O>, bool)>> {
        let encoded = self.encode_all(params)?;
        let checked = self
            .store
            .check(self.op.name(), self.op.version(), &encoded)
            .await?;
        Ok(params
            .iter()
            .cloned()
            .zip(checked.into_iter().map(|c| c.cached))
            .collect())
    }

    /// Stored result for `params`, executing and persisting on a miss.
    pub async fn get(&self, params: &Params<O>) -> StashResult<Output<O>> {
        let name = self.op.name();
        let version = self.op.version();
        let encoded = self.op.serialize_params(params)?;

        if let Some(stored) = self.store.get(name, version, &encoded).await? {
            tracing::trace!(operation = name, version, "Cache hit");
            return Ok(self.op.deserialize_result(&stored)?);
        }

        tracing::trace!(operation = name, version, "Cache miss");
        let output = self.op.execute(params).await?;
        let serialized = self.op.serialize_result(&output)?;

        match self.config.write_policy {
            WritePolicy::Await => {
                self.store.put(name, version, &encoded, &serialized).await?;
            }
            WritePolicy::Background => self.spawn_write(encoded, serialized)?,
        }
        Ok(output)
    }

    /// Warm the store for every params value, executing only the misses.
    pub async fn cacheall(&self, params: &[Params<O>]) -> StashResult<WarmReport> {
        let encoded = self.encode_all(params)?;
        let checked = self
            .store
            .check(self.op.name(), self.op.version(), &encoded)
            .await?;

        let misses: Vec<(Params<O>, String)> = params
            .iter()
            .zip(checked)
            .filter(|(_, c)| !c.cached)
            .map(|(p, c)| (p.clone(), c.params))
            .collect();

        let mut report = WarmReport::new(params.len(), params.len() - misses.len());
        self.log_report(&report);

        report.executed = self.execute_misses(misses).await?.len();
        Ok(report)
    }

    /// Results for every params value.
    ///
    /// Cached results come first in input order, then fresh results in the
    /// order their executions completed.
    pub async fn getall(&self, params: &[Params<O>]) -> StashResult<Vec<(Params<O>, Output<O>)>> {
        let encoded = self.encode_all(params)?;
        let fetched = self
            .store
            .getall(self.op.name(), self.op.version(), &encoded)
            .await?;

        let mut results = Vec::with_capacity(params.len());
        let mut misses = Vec::new();
        for (p, entry) in params.iter().zip(fetched) {
            match entry.result {
                Some(stored) => results.push((p.clone(), self.op.deserialize_result(&stored)?)),
                None => misses.push((p.clone(), entry.params)),
            }
        }

        self.log_report(&WarmReport::new(params.len(), results.len()));

        results.extend(self.execute_misses(misses).await?);
        Ok(results)
    }

    /// Lazy `getall` over a large params list.
    ///
    /// Params are resolved `pipe_buffer` at a time; each window is a full
    /// `getall` call, so ordering within a window follows its rules. The
    /// resolving side runs on its own task and stalls once `pipe_buffer`
    /// results are waiting. A failing window yields its error in place of
    /// its results; later windows still run.
    ///
    /// Must be called from within a tokio runtime.
    pub fn stream(
        self: Arc<Self>,
        params: Vec<Params<O>>,
    ) -> Pipe<StashResult<(Params<O>, Output<O>)>> {
        let window = self.config.pipe_buffer;
        Pipe::from_iter(params)
            .batch(window)
            .then(move |chunk| {
                let memo = Arc::clone(&self);
                async move { memo.getall(&chunk).await }
            })
            .map(|resolved| match resolved {
                Ok(pairs) => pairs.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            })
            .flat()
            .buffered(window)
    }

    /// Wait for every background write issued so far.
    ///
    /// Returns how many writes completed, or the first failure. All pending
    /// writes are awaited even when one fails.
    pub async fn flush_writes(&self) -> StashResult<usize> {
        let mut writes = {
            let mut guard = self.writes.lock().map_err(|_| StoreError::LockPoisoned)?;
            std::mem::take(&mut *guard)
        };

        while let Some(joined) = writes.running.join_next().await {
            writes.record(joined);
        }

        match writes.first_error {
            Some(e) => Err(e.into()),
            None => Ok(writes.landed),
        }
    }

    /// Background writes still running.
    pub fn pending_writes(&self) -> usize {
        self.writes
            .lock()
            .map(|mut w| {
                w.reap();
                w.running.len()
            })
            .unwrap_or(0)
    }

    fn encode_all(&self, params: &[Params<O>]) -> StashResult<Vec<String>> {
        params
            .iter()
            .map(|p| self.op.serialize_params(p).map_err(Into::into))
            .collect()
    }

    fn log_report(&self, report: &WarmReport) {
        tracing::info!(
            operation = self.op.name(),
            version = self.op.version(),
            hits = report.hits,
            total = report.total,
            "{}",
            report
        );
    }

    fn spawn_write(&self, encoded: String, serialized: String) -> StashResult<()> {
        let store = Arc::clone(&self.store);
        let name = self.op.name().to_string();
        let version = self.op.version();

        let mut writes = self.writes.lock().map_err(|_| StoreError::LockPoisoned)?;
        writes.reap();
        writes.running.spawn(async move {
            let result = store.put(&name, version, &encoded, &serialized).await;
            if let Err(e) = &result {
                tracing::error!(operation = %name, version, error = %e, "Background cache write failed");
            }
            result
        });
        Ok(())
    }

    /// Run misses under the governor, admitting in input order.
    ///
    /// A slot covers both execution and persistence, so an item is only
    /// reported once its result is in the store. Completed results are
    /// collected as they finish. The first error
    /// returns immediately; dropping `in_flight` cancels the rest.
    async fn execute_misses(
        &self,
        misses: Vec<(Params<O>, String)>,
    ) -> StashResult<Vec<(Params<O>, Output<O>)>> {
        let mut completed = Vec::with_capacity(misses.len());
        let mut pending = misses.into_iter();
        let mut next = pending.next();
        let mut in_flight = FuturesUnordered::new();

        loop {
            tokio::select! {
                // completions win over admissions so a failure is seen
                // before another item starts
                biased;

                Some(done) = in_flight.next() => {
                    completed.push(done?);
                }
                permit = self.governor.acquire(), if next.is_some() => {
                    let permit = permit?;
                    if let Some((params, encoded)) = next.take() {
                        in_flight.push(self.execute_one(params, encoded, permit));
                    }
                    next = pending.next();
                }
                else => break,
            }
        }

        Ok(completed)
    }

    async fn execute_one(
        &self,
        params: Params<O>,
        encoded: String,
        permit: GovernorPermit,
    ) -> StashResult<(Params<O>, Output<O>)> {
        let output = self.op.execute(&params).await?;
        let serialized = self.op.serialize_result(&output)?;
        self.store
            .put(self.op.name(), self.op.version(), &encoded, &serialized)
            .await?;
        drop(permit);
        Ok((params, output))
    }
}

impl<O, S> Drop for Memoized<O, S>
where
    O: Operation,
    S: CacheStore + 'static,
{
    fn drop(&mut self) {
        // unflushed background writes keep running instead of being aborted
        if let Ok(mut writes) = self.writes.lock() {
            writes.running.detach_all();
        }
    }
}

impl<O, S> std::fmt::Debug for Memoized<O, S>
where
    O: Operation,
    S: CacheStore + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoized")
            .field("operation", &self.op.name())
            .field("version", &self.op.version())
            .field("max_concurrency", &self.governor.max())
            .field("write_policy", &self.config.write_policy)
            .finish()
    }
}
