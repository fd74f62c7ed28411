use crate::config::{EngineConfig, RetrievalConfig};
use crate::error::{Result, RetrievalError};
use crate::ingest::{DocumentLocks, IngestRequest};
use crate::result::{
    DegradedReason, EngineStats, IndexStatus, IngestReport, ScoredChunk, SearchMode,
    SearchResults, SearchStats,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sift_chunker::Chunker;
use sift_embeddings::{EmbeddingError, EmbeddingProvider};
use sift_lsh_index::{ApproximateIndex, LshIndex};
use sift_vector_store::{
    ChunkId, Neighbor, NewChunk, Scope, StoreError, VectorStore, cosine_distance, nearest,
};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// A question to answer, embedded before searching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub scope: Scope,
    pub question_text: String,

    /// Defaults to `top_k_default`
    #[serde(default)]
    pub top_k: Option<usize>,

    /// Upper bound for each blocking step of the query
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl QueryRequest {
    pub fn new(scope: Scope, question_text: impl Into<String>) -> Self {
        Self {
            scope,
            question_text: question_text.into(),
            top_k: None,
            timeout_ms: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}

/// Per-call overrides of the configured timeouts. A value only takes
/// effect when it is tighter than the configured one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub store_timeout: Option<Duration>,
    pub index_timeout: Option<Duration>,
}

impl QueryOptions {
    /// Bound every step by `limit`
    pub fn within(limit: Duration) -> Self {
        Self {
            store_timeout: Some(limit),
            index_timeout: Some(limit),
        }
    }
}

/// Outcome of replaying pending documents into the approximate index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexReport {
    pub documents_indexed: usize,
    pub chunks_indexed: usize,
    pub still_pending: usize,
}

#[derive(Default)]
struct Counters {
    queries: AtomicU64,
    fallback_queries: AtomicU64,
    degraded_queries: AtomicU64,
    index_write_failures: AtomicU64,
    documents_ingested: AtomicU64,
}

/// Hybrid retrieval engine: approximate candidates re-ranked exactly, with
/// exact search as the fallback.
///
/// The vector store is the source of truth. The approximate index only
/// proposes candidate ids; every candidate is re-fetched from the store
/// under the caller's scope before it can be returned, so a stale or
/// broken index can cost latency but never correctness.
#[derive(Clone)]
pub struct HybridRetriever {
    config: Arc<RetrievalConfig>,
    chunker: Arc<Chunker>,
    provider: Arc<EmbeddingProvider>,
    store: VectorStore,
    index: Arc<dyn ApproximateIndex<ChunkId>>,
    locks: Arc<DocumentLocks>,
    counters: Arc<Counters>,
}

impl HybridRetriever {
    /// Assemble a retriever from ready components
    pub fn new(
        config: RetrievalConfig,
        chunker: Chunker,
        provider: Arc<EmbeddingProvider>,
        store: VectorStore,
        index: Arc<dyn ApproximateIndex<ChunkId>>,
    ) -> Result<Self> {
        config.validate().map_err(RetrievalError::Config)?;

        if provider.dimension() != store.dimension() {
            return Err(RetrievalError::Config(format!(
                "embedding dimension {} differs from store dimension {}",
                provider.dimension(),
                store.dimension()
            )));
        }

        info!(
            "Initializing hybrid retriever (dimension {}, approximate index {})",
            store.dimension(),
            if config.approximate_index_enabled {
                "enabled"
            } else {
                "disabled"
            }
        );

        Ok(Self {
            config: Arc::new(config),
            chunker: Arc::new(chunker),
            provider,
            store,
            index,
            locks: Arc::new(DocumentLocks::default()),
            counters: Arc::new(Counters::default()),
        })
    }

    /// Build every component from configuration and open the store at
    /// `store_path`. The approximate index starts empty; documents already
    /// in the store are replayed into it.
    pub async fn from_config(config: EngineConfig, store_path: &Path) -> Result<Self> {
        let config = config.with_dimension_propagated();
        config.validate().map_err(RetrievalError::Config)?;

        let chunker = Chunker::new(config.chunker)?;
        let provider = Arc::new(EmbeddingProvider::from_config(&config.embedding).await?);
        let store = VectorStore::open(store_path, config.store.clone()).await?;
        let index: Arc<dyn ApproximateIndex<ChunkId>> = Arc::new(LshIndex::new(config.lsh)?);

        let retriever = Self::new(config.retrieval, chunker, provider, store, index)?;
        if retriever.config.approximate_index_enabled {
            let indexed = retriever.rebuild_index().await?;
            info!("Replayed {indexed} stored chunks into the approximate index");
        }
        Ok(retriever)
    }

    /// Get configuration
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// The durable store behind this retriever
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Chunk, embed and store one document, then add it to the approximate
    /// index.
    ///
    /// The store write is all-or-nothing, including when it runs out of
    /// time. The index write is best effort: when it fails the document is
    /// still found through exact search and stays pending until
    /// [`HybridRetriever::reindex_pending`] succeeds.
    ///
    /// `request.timeout_ms` bounds the embedding call and tightens the
    /// configured store and index timeouts.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReport> {
        let document_id = request.document_id.clone();
        let scope = request.scope.clone();
        let limit = request.timeout_ms.map(Duration::from_millis);
        let segments = request.into_segments(&self.chunker)?;

        let _guard = self.locks.acquire(&document_id).await;

        if segments.is_empty() {
            debug!("Document {document_id} has no content to ingest");
            return Ok(IngestReport {
                document_id,
                chunk_ids: Vec::new(),
                indexed_count: 0,
                approximate_index_status: IndexStatus::Indexed,
            });
        }

        let texts: Vec<String> = segments.iter().map(|(_, text)| text.clone()).collect();
        let vectors = match limit {
            Some(limit) => timeout(limit, self.provider.embed(&texts))
                .await
                .map_err(|_| EmbeddingError::Timeout(limit))??,
            None => self.provider.embed(&texts).await?,
        };

        let chunks: Vec<NewChunk> = segments
            .into_iter()
            .zip(vectors.iter().cloned())
            .map(|((index, text), vector)| NewChunk::new(document_id.as_str(), index, text, vector))
            .collect();
        let chunk_ids = self
            .store
            .insert_batch_within(chunks, &scope, tighter(self.config.store_timeout(), limit))
            .await?;
        self.counters.documents_ingested.fetch_add(1, Ordering::Relaxed);

        let entries: Vec<(ChunkId, Vec<f32>)> = chunk_ids.iter().copied().zip(vectors).collect();
        let index_timeout = tighter(self.config.index_timeout(), limit);
        let status = self
            .index_document(&document_id, &entries, index_timeout)
            .await;

        info!(
            "Ingested document {document_id} into {scope}: {} chunks, index {:?}",
            chunk_ids.len(),
            status
        );
        Ok(IngestReport {
            document_id,
            indexed_count: chunk_ids.len(),
            chunk_ids,
            approximate_index_status: status,
        })
    }

    /// Best-effort index write for one stored document
    async fn index_document(
        &self,
        document_id: &str,
        entries: &[(ChunkId, Vec<f32>)],
        limit: Duration,
    ) -> IndexStatus {
        if !self.config.approximate_index_enabled {
            return IndexStatus::Degraded;
        }

        match timeout(limit, self.index.index_batch(entries)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                self.counters.index_write_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Approximate indexing of {document_id} failed, left pending: {err}");
                return IndexStatus::Degraded;
            }
            Err(_) => {
                self.counters.index_write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Approximate indexing of {document_id} timed out after {}ms, left pending",
                    limit.as_millis()
                );
                return IndexStatus::Degraded;
            }
        }

        // The chunks are in the index either way; a stale flag only means a
        // redundant replay later
        if let Err(err) = self.store.mark_indexed(document_id, true).await {
            warn!("Could not mark {document_id} as indexed: {err}");
        }
        IndexStatus::Indexed
    }

    /// Nearest chunks to `query` visible under `scope`
    pub async fn search(&self, query: &[f32], scope: &Scope, top_k: usize) -> Result<SearchResults> {
        self.search_with(query, scope, top_k, QueryOptions::default())
            .await
    }

    /// [`HybridRetriever::search`] with per-call timeouts
    pub async fn search_with(
        &self,
        query: &[f32],
        scope: &Scope,
        top_k: usize,
        options: QueryOptions,
    ) -> Result<SearchResults> {
        let start = Instant::now();
        let top_k = self.effective_top_k(top_k)?;
        if query.len() != self.store.dimension() {
            return Err(StoreError::DimensionMismatch {
                expected: self.store.dimension(),
                actual: query.len(),
            }
            .into());
        }

        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let store_timeout = tighter(self.config.store_timeout(), options.store_timeout);
        let index_timeout = tighter(self.config.index_timeout(), options.index_timeout);
        let mut stats = SearchStats {
            top_k,
            ..Default::default()
        };

        let approximate = if !self.config.approximate_index_enabled {
            Err(DegradedReason::IndexDisabled)
        } else if !self.index.is_available() {
            Err(DegradedReason::IndexUnavailable)
        } else {
            self.approximate(query, scope, top_k, index_timeout, store_timeout, &mut stats)
                .await?
        };

        let (neighbors, mode) = match approximate {
            Ok(neighbors) => (neighbors, SearchMode::Approximate),
            Err(reason) => {
                self.record_fallback(&reason, scope);
                let fallback_start = Instant::now();
                let neighbors = self
                    .bounded(
                        "exact_search",
                        store_timeout,
                        self.store.exact_search(query, scope, top_k),
                    )
                    .await?;
                stats.fallback_time_ms = fallback_start.elapsed().as_millis() as u64;
                (neighbors, SearchMode::Fallback(reason))
            }
        };

        let results = self.hydrate(&neighbors, scope, store_timeout).await?;
        stats.total_time_ms = start.elapsed().as_millis() as u64;

        debug!(
            "Search under {scope} returned {} results in {}ms ({:?})",
            results.len(),
            stats.total_time_ms,
            mode
        );
        Ok(SearchResults::new(mode)
            .with_results(results)
            .with_stats(stats))
    }

    /// Embed `request.question_text` and search with it
    pub async fn search_text(&self, request: QueryRequest) -> Result<SearchResults> {
        if request.question_text.trim().is_empty() {
            return Err(RetrievalError::Validation(
                "question_text must not be empty".to_string(),
            ));
        }
        let top_k = request.top_k.unwrap_or(self.config.top_k_default);
        self.effective_top_k(top_k)?;

        let limit = request.timeout_ms.map(Duration::from_millis);
        let query = match limit {
            Some(limit) => timeout(limit, self.provider.embed_one(&request.question_text))
                .await
                .map_err(|_| EmbeddingError::Timeout(limit))??,
            None => self.provider.embed_one(&request.question_text).await?,
        };

        let options = limit.map(QueryOptions::within).unwrap_or_default();
        self.search_with(&query, &request.scope, top_k, options)
            .await
    }

    /// Candidate generation, scope filter and exact re-rank. `Ok(Err(_))`
    /// sends the query to the fallback path; `Err(_)` is a store failure.
    async fn approximate(
        &self,
        query: &[f32],
        scope: &Scope,
        top_k: usize,
        index_timeout: Duration,
        store_timeout: Duration,
        stats: &mut SearchStats,
    ) -> Result<std::result::Result<Vec<(ChunkId, f32)>, DegradedReason>> {
        let pool = top_k.saturating_mul(self.config.candidate_pool_multiplier);

        let candidate_start = Instant::now();
        let candidates = match timeout(index_timeout, self.index.query(query, pool)).await {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(err)) => {
                return Ok(Err(DegradedReason::IndexError {
                    message: err.to_string(),
                }));
            }
            Err(_) => return Ok(Err(DegradedReason::IndexTimeout)),
        };
        stats.candidate_time_ms = candidate_start.elapsed().as_millis() as u64;
        stats.candidates_matched = candidates.total_matches;

        let rerank_start = Instant::now();
        let vectors = self
            .bounded(
                "fetch_vectors",
                store_timeout,
                self.store.fetch_vectors(&candidates.ids(), scope),
            )
            .await?;
        stats.candidates_in_scope = vectors.len();

        if vectors.len() < top_k {
            return Ok(Err(DegradedReason::InsufficientCandidates {
                found: vectors.len(),
                needed: top_k,
            }));
        }

        let ranked = nearest(
            vectors
                .iter()
                .map(|(id, vector)| Neighbor::new(*id, cosine_distance(query, vector))),
            top_k,
        );
        stats.rerank_time_ms = rerank_start.elapsed().as_millis() as u64;

        Ok(Ok(ranked
            .into_iter()
            .map(|n| (n.chunk_id, n.distance))
            .collect()))
    }

    /// Attach chunk records to ranked ids, re-checking scope
    async fn hydrate(
        &self,
        neighbors: &[(ChunkId, f32)],
        scope: &Scope,
        store_timeout: Duration,
    ) -> Result<Vec<ScoredChunk>> {
        let ids: Vec<ChunkId> = neighbors.iter().map(|(id, _)| *id).collect();
        let records = self
            .bounded("get_chunks", store_timeout, self.store.get_chunks(&ids, scope))
            .await?;

        let distances: HashMap<ChunkId, f32> = neighbors.iter().copied().collect();
        Ok(records
            .into_iter()
            .filter_map(|record| {
                let distance = *distances.get(&record.chunk_id)?;
                Some(ScoredChunk::new(record, distance))
            })
            .collect())
    }

    fn record_fallback(&self, reason: &DegradedReason, scope: &Scope) {
        self.counters.fallback_queries.fetch_add(1, Ordering::Relaxed);
        match reason {
            DegradedReason::IndexDisabled => {
                debug!("Approximate index disabled, exact search under {scope}");
            }
            DegradedReason::InsufficientCandidates { found, needed } => {
                self.counters.degraded_queries.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Only {found} of {needed} candidates in {scope}, falling back to exact search"
                );
            }
            other => {
                self.counters.degraded_queries.fetch_add(1, Ordering::Relaxed);
                warn!("Approximate index degraded ({other:?}), falling back to exact search");
            }
        }
    }

    fn effective_top_k(&self, top_k: usize) -> Result<usize> {
        if top_k == 0 {
            return Err(RetrievalError::Validation(
                "top_k must be a positive integer".to_string(),
            ));
        }
        if top_k > self.config.top_k_max {
            debug!("Clamping top_k {top_k} to {}", self.config.top_k_max);
        }
        Ok(top_k.min(self.config.top_k_max))
    }

    /// Bound a read. Writes carry their own deadline into the store so a
    /// timed-out write never commits.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        limit: Duration,
        call: impl Future<Output = sift_vector_store::Result<T>>,
    ) -> Result<T> {
        match timeout(limit, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout {
                operation,
                after_ms: limit.as_millis() as u64,
            }
            .into()),
        }
    }

    /// Remove every chunk of a session scope. Returns the number removed.
    pub async fn delete_scope(&self, scope: &Scope) -> Result<usize> {
        let removed = self
            .store
            .delete_scope_within(scope, self.config.store_timeout())
            .await?;
        self.evict(&removed).await;
        Ok(removed.len())
    }

    /// Remove one document and its chunks. Returns the number of chunks
    /// removed.
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let _guard = self.locks.acquire(document_id).await;
        let removed = self
            .store
            .delete_document_within(document_id, self.config.store_timeout())
            .await?;
        self.evict(&removed).await;
        Ok(removed.len())
    }

    /// Drop deleted ids from the index. Leftovers are harmless because
    /// candidates are always re-fetched from the store.
    async fn evict(&self, ids: &[ChunkId]) {
        if ids.is_empty() {
            return;
        }

        let removal = async {
            for id in ids {
                self.index.remove(*id).await?;
            }
            Ok::<_, sift_lsh_index::IndexError>(())
        };
        match timeout(self.config.index_timeout(), removal).await {
            Ok(Ok(())) => debug!("Evicted {} chunks from the approximate index", ids.len()),
            Ok(Err(err)) => warn!("Approximate index eviction incomplete: {err}"),
            Err(_) => warn!("Approximate index eviction timed out"),
        }
    }

    /// Clear the approximate index and replay every stored vector into it.
    /// Returns the number of chunks indexed.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let start = Instant::now();
        self.index.clear().await?;

        let pending = self.store.pending_documents().await?;
        let mut indexed = 0;
        let mut after = None;
        loop {
            let page = self
                .bounded(
                    "scan_vectors",
                    self.config.store_timeout(),
                    self.store.scan_vectors(after, self.config.index_batch_size),
                )
                .await?;
            let Some((last, _)) = page.last() else {
                break;
            };
            after = Some(*last);
            indexed += self.index.index_batch(&page).await?;
        }

        for document_id in pending {
            self.store.mark_indexed(&document_id, true).await?;
        }

        info!(
            "Rebuilt approximate index with {indexed} chunks in {}ms",
            start.elapsed().as_millis()
        );
        Ok(indexed)
    }

    /// Retry the index write for documents whose ingestion left them
    /// degraded. Stops at the first index failure.
    pub async fn reindex_pending(&self) -> Result<ReindexReport> {
        let pending = self.store.pending_documents().await?;
        let mut report = ReindexReport {
            still_pending: pending.len(),
            ..Default::default()
        };
        if !self.config.approximate_index_enabled || pending.is_empty() {
            return Ok(report);
        }

        for document_id in pending {
            let _guard = self.locks.acquire(&document_id).await;
            let entries = self
                .bounded(
                    "document_vectors",
                    self.config.store_timeout(),
                    self.store.document_vectors(&document_id),
                )
                .await?;

            match self
                .index_document(&document_id, &entries, self.config.index_timeout())
                .await
            {
                IndexStatus::Indexed => {
                    report.documents_indexed += 1;
                    report.chunks_indexed += entries.len();
                    report.still_pending -= 1;
                }
                IndexStatus::Degraded => break,
            }
        }

        info!(
            "Re-indexed {} pending documents ({} chunks), {} still pending",
            report.documents_indexed, report.chunks_indexed, report.still_pending
        );
        Ok(report)
    }

    /// Counters since creation plus current store figures
    pub async fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            queries: self.counters.queries.load(Ordering::Relaxed),
            fallback_queries: self.counters.fallback_queries.load(Ordering::Relaxed),
            degraded_queries: self.counters.degraded_queries.load(Ordering::Relaxed),
            index_write_failures: self.counters.index_write_failures.load(Ordering::Relaxed),
            documents_ingested: self.counters.documents_ingested.load(Ordering::Relaxed),
            stored_chunks: self.store.count().await?,
            pending_documents: self.store.pending_documents().await?.len(),
            approximate_index_available: self.config.approximate_index_enabled
                && self.index.is_available(),
            embedding_backend: self.provider.active_backend().to_string(),
            embedding_degraded: self.provider.is_degraded(),
        })
    }
}

fn tighter(configured: Duration, requested: Option<Duration>) -> Duration {
    requested.map_or(configured, |requested| requested.min(configured))
}
