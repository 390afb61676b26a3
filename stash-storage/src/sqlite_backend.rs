//! SQLite-backed append-only cache log.
//!
//! One file, one table, one index:
//!
//! ```text
//! cacheline(id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, version INTEGER,
//!           timestamp TEXT, params TEXT, results TEXT)
//! INDEX cacheline_lookup (name, version, params)
//! PRAGMA journal_mode = WAL
//! PRAGMA synchronous = NORMAL
//! ```
//!
//! # Consistency
//!
//! `put` always inserts. The most recent row for a key wins, ordered by
//! RFC 3339 timestamp and then by row id, so two writes inside the same
//! microsecond still resolve deterministically. Several processes may append
//! to the same file; duplicate rows cost space, never correctness.
//!
//! # Thread Safety
//!
//! The store keeps one writer connection and a pool of reader connections
//! (`read_pool_size`, default 4), each behind its own mutex and driven from
//! `spawn_blocking`. Reads pick a reader round-robin, so up to
//! `read_pool_size` lookups run at once. WAL mode lets readers run while
//! another connection (or process) writes.
//!
//! # Chunking
//!
//! Bulk lookups bind every param, and SQLite caps bound variables per
//! statement. `check` and `getall` therefore push their input through a
//! [`Pipe`] in chunks no larger than the connection's cap allows, then merge
//! the chunk results by canonical params.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::limits::Limit;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use stash_core::{Pipe, StoreConfig, StoreError};

use super::traits::{CacheStore, CheckedParams, FetchedParams};

/// Variables bound in every bulk statement besides the params themselves.
const FIXED_VARIABLES: usize = 2;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cacheline (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    version INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    params TEXT NOT NULL,
    results TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS cacheline_lookup ON cacheline (name, version, params);
";

const SELECT_LATEST: &str = "SELECT results FROM cacheline \
     WHERE name = ?1 AND version = ?2 AND params = ?3 \
     ORDER BY timestamp DESC, id DESC LIMIT 1";

const INSERT_ENTRY: &str = "INSERT INTO cacheline (name, version, timestamp, params, results) \
     VALUES (?1, ?2, ?3, ?4, ?5)";

const COUNT_ENTRIES: &str = "SELECT COUNT(*) FROM cacheline WHERE name = ?1 AND version = ?2";

/// Persistent cache store.
///
/// # Example
///
/// ```ignore
/// use stash_core::StoreConfig;
/// use stash_storage::{CacheStore, SqliteStore};
///
/// let store = SqliteStore::open(&StoreConfig::new("/tmp/stash.db"))?;
/// store.put("double", 1, "3", "6").await?;
/// assert_eq!(store.get("double", 1, "3").await?, Some("6".to_string()));
/// ```
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    writer: Arc<Mutex<Connection>>,
    readers: Arc<Vec<Arc<Mutex<Connection>>>>,
    read_cursor: Arc<AtomicUsize>,
    chunk_size: usize,
}

impl SqliteStore {
    /// Open (or create) the store described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Open` if:
    /// - The config is invalid
    /// - The parent directory cannot be created
    /// - Any connection cannot be opened or the schema cannot be applied
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        config
            .validate()
            .map_err(|e| open_error(&config.path, e))?;

        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| open_error(&config.path, e))?;
        }

        let writer = open_connection(config)?;
        let journal_mode: String = writer
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| open_error(&config.path, e))?;
        writer
            .execute_batch("PRAGMA synchronous = NORMAL;")
            .map_err(|e| open_error(&config.path, e))?;
        writer
            .execute_batch(SCHEMA)
            .map_err(|e| open_error(&config.path, e))?;

        let mut readers = Vec::with_capacity(config.read_pool_size);
        for _ in 0..config.read_pool_size {
            readers.push(Arc::new(Mutex::new(open_connection(config)?)));
        }
        let cap = writer
            .limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER)
            .max(0) as usize;
        let chunk_size = config
            .chunk_size
            .min(cap.saturating_sub(FIXED_VARIABLES))
            .max(1);

        tracing::debug!(
            path = %config.path.display(),
            journal_mode = %journal_mode,
            variable_cap = cap,
            chunk_size,
            read_pool_size = readers.len(),
            "Opened cache store"
        );

        Ok(Self {
            path: config.path.clone(),
            writer: Arc::new(Mutex::new(writer)),
            readers: Arc::new(readers),
            read_cursor: Arc::new(AtomicUsize::new(0)),
            chunk_size,
        })
    }

    /// Open with default settings at `path`.
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open(&StoreConfig::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pooled reader connections.
    pub fn read_pool_size(&self) -> usize {
        self.readers.len()
    }

    /// Next reader, round-robin.
    fn reader(&self) -> Arc<Mutex<Connection>> {
        let index = self.read_cursor.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        Arc::clone(&self.readers[index])
    }

    /// Effective number of params bound per bulk statement.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Physical rows stored for an operation version, superseded ones included.
    pub async fn entry_count(&self, name: &str, version: i64) -> Result<u64, StoreError> {
        let name = name.to_string();
        run_blocking(self.reader(), move |conn| {
            conn.query_row(COUNT_ENTRIES, params![name, version], |row| {
                row.get::<_, i64>(0)
            })
            .map(|count| count.max(0) as u64)
            .map_err(|e| query_error(COUNT_ENTRIES, &name, version, 0, e))
        })
        .await
    }

    /// Journal mode reported by a reader connection.
    pub async fn journal_mode(&self) -> Result<String, StoreError> {
        run_blocking(self.reader(), |conn| {
            conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .map_err(|e| StoreError::Query {
                    statement: "PRAGMA journal_mode".to_string(),
                    reason: e.to_string(),
                })
        })
        .await
    }

    /// Run `query` over `params` one chunk at a time, spreading chunks over
    /// the reader pool.
    async fn chunked<T, F>(
        &self,
        name: &str,
        version: i64,
        params: Vec<String>,
        query: F,
    ) -> Result<Vec<T>, StoreError>
    where
        T: Send + 'static,
        F: Fn(&Connection, &str, i64, &[String]) -> Result<T, StoreError> + Copy + Send + 'static,
    {
        let store = self.clone();
        let name = name.to_string();
        Pipe::from_iter(params)
            .batch(self.chunk_size)
            .then(move |chunk| {
                let reader = store.reader();
                let name = name.clone();
                async move {
                    run_blocking(reader, move |conn| query(conn, &name, version, &chunk)).await
                }
            })
            .try_gather()
            .await
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(
        &self,
        name: &str,
        version: i64,
        params: &str,
    ) -> Result<Option<String>, StoreError> {
        let name = name.to_string();
        let canonical = params.to_string();
        run_blocking(self.reader(), move |conn| {
            conn.query_row(SELECT_LATEST, params![name, version, canonical], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| query_error(SELECT_LATEST, &name, version, 1, e))
        })
        .await
    }

    async fn put(
        &self,
        name: &str,
        version: i64,
        params: &str,
        result: &str,
    ) -> Result<(), StoreError> {
        let name = name.to_string();
        let canonical = params.to_string();
        let result = result.to_string();
        run_blocking(Arc::clone(&self.writer), move |conn| {
            let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
            conn.execute(
                INSERT_ENTRY,
                params![name, version, timestamp, canonical, result],
            )
            .map(|_| ())
            .map_err(|e| {
                tracing::error!(
                    statement = INSERT_ENTRY,
                    name = %name,
                    version,
                    params = %canonical,
                    error = %e,
                    "Cache store insert failed"
                );
                StoreError::Insert {
                    name: name.clone(),
                    version,
                    reason: e.to_string(),
                }
            })
        })
        .await
    }

    async fn check(
        &self,
        name: &str,
        version: i64,
        params: &[String],
    ) -> Result<Vec<CheckedParams>, StoreError> {
        let present: HashSet<String> = self
            .chunked(name, version, distinct(params), select_present)
            .await?
            .into_iter()
            .flatten()
            .collect();

        Ok(params
            .iter()
            .map(|p| CheckedParams {
                params: p.clone(),
                cached: present.contains(p),
            })
            .collect())
    }

    async fn getall(
        &self,
        name: &str,
        version: i64,
        params: &[String],
    ) -> Result<Vec<FetchedParams>, StoreError> {
        let mut found: HashMap<String, String> = HashMap::new();
        for chunk in self
            .chunked(name, version, distinct(params), select_results)
            .await?
        {
            found.extend(chunk);
        }

        Ok(params
            .iter()
            .map(|p| FetchedParams {
                params: p.clone(),
                result: found.get(p).cloned(),
            })
            .collect())
    }
}

// ============================================================================
// CONNECTION HELPERS
// ============================================================================

fn open_connection(config: &StoreConfig) -> Result<Connection, StoreError> {
    let conn = Connection::open(&config.path).map_err(|e| open_error(&config.path, e))?;
    conn.busy_timeout(config.busy_timeout)
        .map_err(|e| open_error(&config.path, e))?;
    if let Some(limit) = config.variable_limit {
        conn.set_limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER, limit);
    }
    Ok(conn)
}

async fn run_blocking<T, F>(conn: Arc<Mutex<Connection>>, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&guard)
    })
    .await
    .map_err(|e| StoreError::TaskJoin {
        reason: e.to_string(),
    })?
}

fn open_error(path: &Path, err: impl ToString) -> StoreError {
    StoreError::Open {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

fn query_error(
    statement: &str,
    name: &str,
    version: i64,
    bound_params: usize,
    err: rusqlite::Error,
) -> StoreError {
    tracing::error!(
        statement,
        name,
        version,
        bound_params,
        error = %err,
        "Cache store query failed"
    );
    StoreError::Query {
        statement: statement.to_string(),
        reason: err.to_string(),
    }
}

/// Inputs with duplicates removed, first occurrence kept.
fn distinct(params: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(params.len());
    params
        .iter()
        .filter(|p| seen.insert(p.as_str()))
        .cloned()
        .collect()
}

fn placeholders(count: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", i + FIXED_VARIABLES + 1))
        .collect::<Vec<_>>()
        .join(", ")
}

fn bind<'a>(name: &'a &'a str, version: &'a i64, chunk: &'a [String]) -> Vec<&'a dyn ToSql> {
    let mut bound: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() + FIXED_VARIABLES);
    bound.push(name);
    bound.push(version);
    bound.extend(chunk.iter().map(|p| p as &dyn ToSql));
    bound
}

fn select_present(
    conn: &Connection,
    name: &str,
    version: i64,
    chunk: &[String],
) -> Result<HashSet<String>, StoreError> {
    let sql = format!(
        "SELECT DISTINCT params FROM cacheline \
         WHERE name = ?1 AND version = ?2 AND params IN ({})",
        placeholders(chunk.len())
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| query_error(&sql, name, version, chunk.len(), e))?;
    let bound = bind(&name, &version, chunk);
    let rows = stmt
        .query_map(bound.as_slice(), |row| row.get::<_, String>(0))
        .map_err(|e| query_error(&sql, name, version, chunk.len(), e))?;

    let mut present = HashSet::with_capacity(chunk.len());
    for row in rows {
        present.insert(row.map_err(|e| query_error(&sql, name, version, chunk.len(), e))?);
    }
    Ok(present)
}

fn select_results(
    conn: &Connection,
    name: &str,
    version: i64,
    chunk: &[String],
) -> Result<HashMap<String, String>, StoreError> {
    // ascending so later rows overwrite earlier ones in the map
    let sql = format!(
        "SELECT params, results FROM cacheline \
         WHERE name = ?1 AND version = ?2 AND params IN ({}) \
         ORDER BY timestamp ASC, id ASC",
        placeholders(chunk.len())
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| query_error(&sql, name, version, chunk.len(), e))?;
    let bound = bind(&name, &version, chunk);
    let rows = stmt
        .query_map(bound.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| query_error(&sql, name, version, chunk.len(), e))?;

    let mut found = HashMap::with_capacity(chunk.len());
    for row in rows {
        let (params, results) =
            row.map_err(|e| query_error(&sql, name, version, chunk.len(), e))?;
        found.insert(params, results);
    }
    Ok(found)
}
