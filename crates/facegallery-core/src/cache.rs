//! Versioned embedding cache.
//!
//! Embeddings are keyed by (reference id, embedder version) and kept in an
//! in-memory map backed by a SQLite table, so a restarted process does not
//! re-run the embedder over the whole gallery. Rows written by another
//! embedder version are never returned and are pruned on open.
//!
//! Population is guarded per key: concurrent callers asking for the same
//! missing embedding share one computation instead of racing.

use crate::types::{Embedding, ReferenceId};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use thiserror::Error;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS embeddings (
        reference_id  TEXT NOT NULL,
        model_version TEXT NOT NULL,
        dim           INTEGER NOT NULL,
        vector        BLOB NOT NULL,
        created_at    TEXT NOT NULL,
        PRIMARY KEY (reference_id, model_version)
    );
";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt cache row for {0}")]
    Corrupt(String),
}

/// Why [`EmbeddingCache::get_or_compute`] produced no embedding.
#[derive(Error, Debug)]
pub enum ComputeError<E> {
    /// This caller ran the computation and it failed.
    #[error("{0}")]
    Compute(E),
    /// A concurrent caller ran the computation and it failed.
    #[error("embedding computation failed in a concurrent request")]
    FailedElsewhere,
    #[error(transparent)]
    Cache(CacheError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub reference_id: ReferenceId,
    pub version: String,
}

impl CacheKey {
    pub fn new(reference_id: ReferenceId, version: impl Into<String>) -> Self {
        Self {
            reference_id,
            version: version.into(),
        }
    }
}

type Slot = Arc<OnceLock<Option<Arc<Embedding>>>>;

pub struct EmbeddingCache {
    conn: Mutex<Connection>,
    entries: RwLock<HashMap<CacheKey, Arc<Embedding>>>,
    in_flight: Mutex<HashMap<CacheKey, Slot>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EmbeddingCache {
    /// Open (or create) a cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let cache = Self::with_connection(Connection::open(path)?)?;
        tracing::info!(path = %path.display(), entries = cache.len(), "embedding cache opened");
        Ok(cache)
    }

    /// A cache that lives only as long as the process.
    pub fn in_memory() -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(SCHEMA)?;
        let entries = load_entries(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            entries: RwLock::new(entries),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Embedding>> {
        self.read().get(key).cloned()
    }

    /// Persist and publish an embedding.
    pub fn insert(&self, key: &CacheKey, embedding: Embedding) -> Result<Arc<Embedding>, CacheError> {
        let blob: Vec<u8> = embedding.values.iter().flat_map(|v| v.to_le_bytes()).collect();
        lock(&self.conn).execute(
            "INSERT OR REPLACE INTO embeddings (reference_id, model_version, dim, vector, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.reference_id.as_str(),
                key.version,
                embedding.dim() as i64,
                blob,
                Utc::now().to_rfc3339(),
            ],
        )?;

        let stored = Arc::new(embedding);
        self.write().insert(key.clone(), stored.clone());
        Ok(stored)
    }

    /// Return the cached embedding for `key`, computing it at most once.
    ///
    /// If another caller is already computing the same key, this blocks until
    /// it finishes and shares its result. Nothing is cached unless `compute`
    /// succeeds; a failed key is retried by the next caller.
    pub fn get_or_compute<E, F>(&self, key: &CacheKey, compute: F) -> Result<Arc<Embedding>, ComputeError<E>>
    where
        F: FnOnce() -> Result<Embedding, E>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }

        let slot: Slot = lock(&self.in_flight).entry(key.clone()).or_default().clone();

        let mut own_error = None;
        let outcome = slot
            .get_or_init(|| {
                // Committed between our miss and claiming the slot.
                if let Some(hit) = self.get(key) {
                    return Some(hit);
                }
                let computed = compute()
                    .map_err(ComputeError::Compute)
                    .and_then(|embedding| self.insert(key, embedding).map_err(ComputeError::Cache));
                match computed {
                    Ok(stored) => Some(stored),
                    Err(e) => {
                        own_error = Some(e);
                        None
                    }
                }
            })
            .clone();

        {
            let mut in_flight = lock(&self.in_flight);
            if in_flight.get(key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                in_flight.remove(key);
            }
        }

        match (outcome, own_error) {
            (Some(embedding), _) => Ok(embedding),
            (None, Some(e)) => Err(e),
            (None, None) => Err(ComputeError::FailedElsewhere),
        }
    }

    /// Evict every version cached for `reference_id`.
    pub fn remove_reference(&self, reference_id: &ReferenceId) -> Result<usize, CacheError> {
        let removed = lock(&self.conn).execute(
            "DELETE FROM embeddings WHERE reference_id = ?1",
            params![reference_id.as_str()],
        )?;
        self.write().retain(|key, _| &key.reference_id != reference_id);
        Ok(removed)
    }

    /// Drop entries produced by any embedder version other than `version`.
    pub fn retain_version(&self, version: &str) -> Result<usize, CacheError> {
        let removed = lock(&self.conn).execute(
            "DELETE FROM embeddings WHERE model_version != ?1",
            params![version],
        )?;
        self.write().retain(|key, _| key.version == version);
        Ok(removed)
    }

    /// Drop entries whose reference is not in `live`.
    pub fn retain_references(&self, live: &HashSet<ReferenceId>) -> Result<usize, CacheError> {
        let stale: HashSet<ReferenceId> = self
            .read()
            .keys()
            .filter(|key| !live.contains(&key.reference_id))
            .map(|key| key.reference_id.clone())
            .collect();

        for reference_id in &stale {
            self.remove_reference(reference_id)?;
        }
        Ok(stale.len())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<CacheKey, Arc<Embedding>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<CacheKey, Arc<Embedding>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_entries(conn: &Connection) -> Result<HashMap<CacheKey, Arc<Embedding>>, CacheError> {
    let mut stmt = conn.prepare("SELECT reference_id, model_version, dim, vector FROM embeddings")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, Vec<u8>>(3)?,
        ))
    })?;

    let mut entries = HashMap::new();
    for row in rows {
        let (reference_id, version, dim, blob) = row?;
        let reference_id = match ReferenceId::parse(&reference_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(reference_id, error = %e, "skipping cache row with invalid id");
                continue;
            }
        };
        match decode_vector(&blob, dim) {
            Ok(values) => {
                let embedding = Embedding::new(values, version.clone());
                entries.insert(CacheKey::new(reference_id, version), Arc::new(embedding));
            }
            Err(_) => {
                tracing::warn!(%reference_id, dim, bytes = blob.len(), "skipping corrupt cache row");
            }
        }
    }
    Ok(entries)
}

fn decode_vector(blob: &[u8], dim: i64) -> Result<Vec<f32>, CacheError> {
    if dim < 0 || blob.len() != dim as usize * 4 {
        return Err(CacheError::Corrupt(format!("{} bytes for dim {dim}", blob.len())));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
