use log::{debug, info};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::chunk::{ChunkId, ChunkRecord, NewChunk, Scope};
use crate::distance::{Neighbor, cosine_distance, nearest};
use crate::error::{Result, StoreError};

/// Ids per `IN (...)` list, well under SQLite's bound-parameter limit.
const ID_BATCH: usize = 500;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    document_id TEXT PRIMARY KEY,
    scope_key TEXT NOT NULL,
    approximate_indexed INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL REFERENCES documents(document_id) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    UNIQUE (document_id, chunk_index)
);

CREATE TABLE IF NOT EXISTS scope_manifest (
    scope_key TEXT NOT NULL,
    chunk_id INTEGER NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
    PRIMARY KEY (scope_key, chunk_id)
);

CREATE INDEX IF NOT EXISTS idx_documents_scope ON documents(scope_key);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_manifest_chunk ON scope_manifest(chunk_id);
"#;

/// Configuration for the vector store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Dimension of every stored vector
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// How long SQLite waits on a locked database before giving up
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_embedding_dim() -> usize {
    768
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            embedding_dim: default_embedding_dim(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl VectorStoreConfig {
    pub fn with_dimension(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.embedding_dim == 0 {
            return Err("embedding_dim must be greater than 0".into());
        }
        Ok(())
    }
}

/// Time limit for a write, checked inside its transaction.
///
/// A write that runs past the limit rolls back, so a caller that sees
/// `StoreError::Timeout` can rely on nothing having been committed.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    operation: &'static str,
    at: Instant,
    limit: Duration,
}

impl Deadline {
    fn after(operation: &'static str, limit: Duration) -> Option<Self> {
        let at = Instant::now().checked_add(limit)?;
        Some(Self {
            operation,
            at,
            limit,
        })
    }

    fn check(deadline: Option<Self>) -> Result<()> {
        match deadline {
            Some(d) if Instant::now() >= d.at => Err(StoreError::Timeout {
                operation: d.operation,
                after_ms: d.limit.as_millis() as u64,
            }),
            _ => Ok(()),
        }
    }
}

/// Durable, exact store of chunks, their vectors and their scopes.
///
/// Backed by SQLite. All database work runs on the blocking thread pool;
/// clones share one connection.
#[derive(Clone)]
pub struct VectorStore {
    conn: Arc<Mutex<Connection>>,
    config: VectorStoreConfig,
}

impl VectorStore {
    /// Open (or create) a store at `path`
    pub async fn open(path: &Path, config: VectorStoreConfig) -> Result<Self> {
        info!("Opening vector store at {}", path.display());

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            Ok::<_, StoreError>(conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))??;

        Self::initialize(conn, config).await
    }

    /// An in-memory store, mainly for tests
    pub async fn open_in_memory(config: VectorStoreConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, config).await
    }

    async fn initialize(conn: Connection, config: VectorStoreConfig) -> Result<Self> {
        config.validate().map_err(StoreError::InvalidInput)?;

        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        };

        let expected = store.config.embedding_dim;
        store
            .run(move |conn| {
                conn.execute_batch(SCHEMA)?;
                let stored: Option<String> = conn
                    .query_row(
                        "SELECT value FROM store_meta WHERE key = 'embedding_dim'",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;
                match stored {
                    None => {
                        conn.execute(
                            "INSERT INTO store_meta (key, value) VALUES ('embedding_dim', ?1)",
                            [expected.to_string()],
                        )?;
                    }
                    Some(value) => {
                        let actual: usize = value.parse().map_err(|_| {
                            StoreError::Corrupt(format!("invalid stored dimension '{value}'"))
                        })?;
                        if actual != expected {
                            return Err(StoreError::DimensionMismatch { expected, actual });
                        }
                    }
                }
                Ok(())
            })
            .await?;

        info!("Vector store ready (dimension {expected})");
        Ok(store)
    }

    /// Dimension every vector must have
    pub fn dimension(&self) -> usize {
        self.config.embedding_dim
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        self.run_until(None, f).await
    }

    /// Like `run`, but gives up before touching the database once
    /// `deadline` has passed. The closure is expected to check the same
    /// deadline before it commits.
    async fn run_until<T, F>(&self, deadline: Option<Deadline>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))?;
            Deadline::check(deadline)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.embedding_dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.config.embedding_dim,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Write `chunks` under `scope` in a single transaction.
    ///
    /// Every vector is checked before anything is written. A document
    /// already owned by another scope, or a repeated
    /// `(document_id, chunk_index)`, rejects the whole batch. Returns the
    /// new ids in input order.
    pub async fn insert_batch(&self, chunks: Vec<NewChunk>, scope: &Scope) -> Result<Vec<ChunkId>> {
        self.insert_batch_until(chunks, scope, None).await
    }

    /// [`VectorStore::insert_batch`] bounded by `limit`. On
    /// `StoreError::Timeout` the transaction has been rolled back and no
    /// chunk of the batch is stored.
    pub async fn insert_batch_within(
        &self,
        chunks: Vec<NewChunk>,
        scope: &Scope,
        limit: Duration,
    ) -> Result<Vec<ChunkId>> {
        let deadline = Deadline::after("insert_batch", limit);
        self.insert_batch_until(chunks, scope, deadline).await
    }

    async fn insert_batch_until(
        &self,
        chunks: Vec<NewChunk>,
        scope: &Scope,
        deadline: Option<Deadline>,
    ) -> Result<Vec<ChunkId>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        for chunk in &chunks {
            self.check_dimension(&chunk.vector)?;
        }

        let scope_key = scope.key();
        let count = chunks.len();
        let ids = self
            .run_until(deadline, move |conn| {
                let tx = conn.transaction()?;
                let mut ids = Vec::with_capacity(chunks.len());
                {
                    let mut register_document = tx.prepare_cached(
                        "INSERT OR IGNORE INTO documents (document_id, scope_key) VALUES (?1, ?2)",
                    )?;
                    let mut document_scope =
                        tx.prepare_cached("SELECT scope_key FROM documents WHERE document_id = ?1")?;
                    let mut reset_indexed = tx.prepare_cached(
                        "UPDATE documents SET approximate_indexed = 0 WHERE document_id = ?1",
                    )?;
                    let mut insert_chunk = tx.prepare_cached(
                        "INSERT INTO chunks (document_id, chunk_index, content, embedding)
                         VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    let mut insert_manifest = tx.prepare_cached(
                        "INSERT INTO scope_manifest (scope_key, chunk_id) VALUES (?1, ?2)",
                    )?;

                    let mut registered: HashSet<String> = HashSet::new();
                    for chunk in &chunks {
                        Deadline::check(deadline)?;
                        if !registered.contains(&chunk.document_id) {
                            register_document.execute(params![chunk.document_id, scope_key])?;
                            let owner: String = document_scope
                                .query_row([&chunk.document_id], |row| row.get(0))?;
                            if owner != scope_key {
                                return Err(StoreError::Constraint(format!(
                                    "document '{}' belongs to another scope",
                                    chunk.document_id
                                )));
                            }
                            reset_indexed.execute([&chunk.document_id])?;
                            registered.insert(chunk.document_id.clone());
                        }

                        insert_chunk.execute(params![
                            chunk.document_id,
                            chunk.chunk_index as i64,
                            chunk.text,
                            embedding_to_bytes(&chunk.vector),
                        ])?;
                        let id = tx.last_insert_rowid();
                        insert_manifest.execute(params![scope_key, id])?;
                        ids.push(ChunkId(id));
                    }
                }
                Deadline::check(deadline)?;
                tx.commit()?;
                Ok(ids)
            })
            .await?;

        debug!("Inserted {count} chunks under {scope}");
        Ok(ids)
    }

    /// The `top_k` chunks visible under `scope` nearest to `query` by
    /// cosine distance, ascending, ties broken by insertion order.
    pub async fn exact_search(
        &self,
        query: &[f32],
        scope: &Scope,
        top_k: usize,
    ) -> Result<Vec<(ChunkId, f32)>> {
        self.check_dimension(query)?;
        if top_k == 0 {
            return Err(StoreError::InvalidInput("top_k must be positive".to_string()));
        }

        let query = query.to_vec();
        let scope_key = scope.key();
        let dimension = self.config.embedding_dim;
        let neighbors = self
            .run(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT c.id, c.embedding FROM chunks c
                     JOIN scope_manifest m ON m.chunk_id = c.id
                     WHERE m.scope_key IN (?1, ?2)",
                )?;
                let mut rows = stmt.query(params![Scope::global_key(), scope_key])?;

                let mut scored = Vec::new();
                while let Some(row) = rows.next()? {
                    let id: i64 = row.get(0)?;
                    let blob = row
                        .get_ref(1)?
                        .as_blob()
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                    let vector = bytes_to_embedding(blob, dimension)?;
                    scored.push(Neighbor::new(ChunkId(id), cosine_distance(&query, &vector)));
                }
                Ok(nearest(scored, top_k))
            })
            .await?;

        Ok(neighbors
            .into_iter()
            .map(|n| (n.chunk_id, n.distance))
            .collect())
    }

    /// Vectors for those of `chunk_ids` that are visible under `scope`.
    ///
    /// Ids that do not exist or belong to another scope are absent from the
    /// result.
    pub async fn fetch_vectors(
        &self,
        chunk_ids: &[ChunkId],
        scope: &Scope,
    ) -> Result<HashMap<ChunkId, Vec<f32>>> {
        if chunk_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids = chunk_ids.to_vec();
        let scope_key = scope.key();
        let dimension = self.config.embedding_dim;
        self.run(move |conn| {
            let mut vectors = HashMap::with_capacity(ids.len());
            for batch in ids.chunks(ID_BATCH) {
                let sql = format!(
                    "SELECT c.id, c.embedding FROM chunks c
                     JOIN scope_manifest m ON m.chunk_id = c.id
                     WHERE m.scope_key IN (?1, ?2) AND c.id IN ({})",
                    placeholders(batch.len(), 3)
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params_from_iter(scoped_params(&scope_key, batch)))?;
                while let Some(row) = rows.next()? {
                    let id: i64 = row.get(0)?;
                    let blob = row
                        .get_ref(1)?
                        .as_blob()
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                    vectors.insert(ChunkId(id), bytes_to_embedding(blob, dimension)?);
                }
            }
            Ok(vectors)
        })
        .await
    }

    /// Records for those of `chunk_ids` visible under `scope`, in input order
    pub async fn get_chunks(&self, chunk_ids: &[ChunkId], scope: &Scope) -> Result<Vec<ChunkRecord>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = chunk_ids.to_vec();
        let scope_key = scope.key();
        self.run(move |conn| {
            let mut found: HashMap<ChunkId, ChunkRecord> = HashMap::with_capacity(ids.len());
            for batch in ids.chunks(ID_BATCH) {
                let sql = format!(
                    "SELECT c.id, c.document_id, c.chunk_index, c.content, m.scope_key
                     FROM chunks c
                     JOIN scope_manifest m ON m.chunk_id = c.id
                     WHERE m.scope_key IN (?1, ?2) AND c.id IN ({})",
                    placeholders(batch.len(), 3)
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params_from_iter(scoped_params(&scope_key, batch)))?;
                while let Some(row) = rows.next()? {
                    let chunk_id = ChunkId(row.get(0)?);
                    let chunk_index: i64 = row.get(2)?;
                    let owner: String = row.get(4)?;
                    found.insert(
                        chunk_id,
                        ChunkRecord {
                            chunk_id,
                            document_id: row.get(1)?,
                            chunk_index: chunk_index as usize,
                            text: row.get(3)?,
                            scope: Scope::from_key(&owner)?,
                        },
                    );
                }
            }
            Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
        })
        .await
    }

    /// Delete every document of a session scope, returning the removed
    /// chunk ids. The global scope cannot be deleted this way.
    pub async fn delete_scope(&self, scope: &Scope) -> Result<Vec<ChunkId>> {
        self.delete_scope_until(scope, None).await
    }

    /// [`VectorStore::delete_scope`] bounded by `limit`. On
    /// `StoreError::Timeout` nothing has been deleted.
    pub async fn delete_scope_within(&self, scope: &Scope, limit: Duration) -> Result<Vec<ChunkId>> {
        let deadline = Deadline::after("delete_scope", limit);
        self.delete_scope_until(scope, deadline).await
    }

    async fn delete_scope_until(
        &self,
        scope: &Scope,
        deadline: Option<Deadline>,
    ) -> Result<Vec<ChunkId>> {
        if scope.is_global() {
            return Err(StoreError::InvalidInput(
                "the global scope cannot be deleted".to_string(),
            ));
        }

        let scope_key = scope.key();
        let removed = self
            .run_until(deadline, move |conn| {
                let tx = conn.transaction()?;
                let ids = {
                    let mut stmt = tx.prepare_cached(
                        "SELECT chunk_id FROM scope_manifest WHERE scope_key = ?1 ORDER BY chunk_id",
                    )?;
                    let ids = stmt
                        .query_map([&scope_key], |row| row.get::<_, i64>(0).map(ChunkId))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    ids
                };
                tx.execute("DELETE FROM documents WHERE scope_key = ?1", [&scope_key])?;
                Deadline::check(deadline)?;
                tx.commit()?;
                Ok(ids)
            })
            .await?;

        info!("Deleted {} chunks from {scope}", removed.len());
        Ok(removed)
    }

    /// Delete a document and its chunks, returning the removed chunk ids
    pub async fn delete_document(&self, document_id: &str) -> Result<Vec<ChunkId>> {
        self.delete_document_until(document_id, None).await
    }

    /// [`VectorStore::delete_document`] bounded by `limit`. On
    /// `StoreError::Timeout` nothing has been deleted.
    pub async fn delete_document_within(
        &self,
        document_id: &str,
        limit: Duration,
    ) -> Result<Vec<ChunkId>> {
        let deadline = Deadline::after("delete_document", limit);
        self.delete_document_until(document_id, deadline).await
    }

    async fn delete_document_until(
        &self,
        document_id: &str,
        deadline: Option<Deadline>,
    ) -> Result<Vec<ChunkId>> {
        let document_id = document_id.to_string();
        self.run_until(deadline, move |conn| {
            let tx = conn.transaction()?;
            let ids = {
                let mut stmt = tx.prepare_cached(
                    "SELECT id FROM chunks WHERE document_id = ?1 ORDER BY id",
                )?;
                let ids = stmt
                    .query_map([&document_id], |row| row.get::<_, i64>(0).map(ChunkId))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                ids
            };
            tx.execute("DELETE FROM documents WHERE document_id = ?1", [&document_id])?;
            Deadline::check(deadline)?;
            tx.commit()?;
            debug!("Deleted document {document_id} ({} chunks)", ids.len());
            Ok(ids)
        })
        .await
    }

    /// Record whether a document's chunks made it into the approximate index
    pub async fn mark_indexed(&self, document_id: &str, indexed: bool) -> Result<()> {
        let document_id = document_id.to_string();
        self.run(move |conn| {
            conn.execute(
                "UPDATE documents SET approximate_indexed = ?1 WHERE document_id = ?2",
                params![indexed, document_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Documents whose chunks are not known to be in the approximate index
    pub async fn pending_documents(&self) -> Result<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT document_id FROM documents WHERE approximate_indexed = 0 ORDER BY rowid",
            )?;
            let documents = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(documents)
        })
        .await
    }

    /// Ids and vectors of one document's chunks, in insertion order
    pub async fn document_vectors(&self, document_id: &str) -> Result<Vec<(ChunkId, Vec<f32>)>> {
        let document_id = document_id.to_string();
        let dimension = self.config.embedding_dim;
        self.run(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, embedding FROM chunks WHERE document_id = ?1 ORDER BY id",
            )?;
            let mut rows = stmt.query([&document_id])?;
            collect_vectors(&mut rows, dimension)
        })
        .await
    }

    /// Page through every stored vector in id order, starting after `after`
    pub async fn scan_vectors(
        &self,
        after: Option<ChunkId>,
        limit: usize,
    ) -> Result<Vec<(ChunkId, Vec<f32>)>> {
        let after = after.map_or(0, |id| id.0);
        let limit = limit as i64;
        let dimension = self.config.embedding_dim;
        self.run(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, embedding FROM chunks WHERE id > ?1 ORDER BY id LIMIT ?2",
            )?;
            let mut rows = stmt.query(params![after, limit])?;
            collect_vectors(&mut rows, dimension)
        })
        .await
    }

    /// Total number of stored chunks
    pub async fn count(&self) -> Result<usize> {
        self.run(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    /// Number of chunks owned by exactly `scope`
    pub async fn count_scope(&self, scope: &Scope) -> Result<usize> {
        let scope_key = scope.key();
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM scope_manifest WHERE scope_key = ?1",
                [&scope_key],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }
}

fn collect_vectors(rows: &mut rusqlite::Rows<'_>, dimension: usize) -> Result<Vec<(ChunkId, Vec<f32>)>> {
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let blob = row
            .get_ref(1)?
            .as_blob()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        out.push((ChunkId(id), bytes_to_embedding(blob, dimension)?));
    }
    Ok(out)
}

/// `?N, ?N+1, ...` for `count` parameters starting at `first`
fn placeholders(count: usize, first: usize) -> String {
    (first..first + count)
        .map(|n| format!("?{n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn scoped_params(scope_key: &str, ids: &[ChunkId]) -> Vec<Value> {
    let mut values = Vec::with_capacity(ids.len() + 2);
    values.push(Value::Text(Scope::global_key().to_string()));
    values.push(Value::Text(scope_key.to_string()));
    values.extend(ids.iter().map(|id| Value::Integer(id.0)));
    values
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8], dimension: usize) -> Result<Vec<f32>> {
    if bytes.len() != dimension * 4 {
        return Err(StoreError::Corrupt(format!(
            "stored vector has {} bytes, expected {}",
            bytes.len(),
            dimension * 4
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
