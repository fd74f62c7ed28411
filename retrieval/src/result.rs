use serde::{Deserialize, Serialize};
use sift_vector_store::{ChunkId, ChunkRecord};

/// A chunk returned by a query together with its exact distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,

    /// `1 - distance`, higher is better
    pub score: f32,

    /// Cosine distance to the query, lower is better
    pub distance: f32,
}

impl ScoredChunk {
    pub fn new(record: ChunkRecord, distance: f32) -> Self {
        Self {
            chunk_id: record.chunk_id,
            document_id: record.document_id,
            chunk_index: record.chunk_index,
            text: record.text,
            score: 1.0 - distance,
            distance,
        }
    }
}

/// Why a query skipped or abandoned the approximate path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum DegradedReason {
    /// Disabled in configuration
    IndexDisabled,
    /// The index reported itself unavailable
    IndexUnavailable,
    /// The index returned an error
    IndexError { message: String },
    /// The index did not answer within `index_timeout_ms`
    IndexTimeout,
    /// Too few in-scope candidates survived to fill `top_k`
    InsufficientCandidates { found: usize, needed: usize },
}

/// How a query was answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Approximate candidates re-ranked exactly
    Approximate,
    /// Exact scan of every vector in scope
    Fallback(DegradedReason),
}

impl SearchMode {
    pub fn is_fallback(&self) -> bool {
        matches!(self, SearchMode::Fallback(_))
    }
}

/// Per-query timings and counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    /// Total search time in milliseconds
    pub total_time_ms: u64,

    /// Time spent waiting on the approximate index
    pub candidate_time_ms: u64,

    /// Time spent fetching vectors and re-ranking
    pub rerank_time_ms: u64,

    /// Time spent in the exact fallback scan
    pub fallback_time_ms: u64,

    /// Distinct ids matched by the index before the pool cap
    pub candidates_matched: usize,

    /// Candidates that passed the scope check
    pub candidates_in_scope: usize,

    /// `top_k` after clamping
    pub top_k: usize,
}

/// Ranked results of one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Results ordered by ascending distance
    pub results: Vec<ScoredChunk>,

    pub mode: SearchMode,

    pub stats: SearchStats,
}

impl SearchResults {
    pub fn new(mode: SearchMode) -> Self {
        Self {
            results: Vec::new(),
            mode,
            stats: SearchStats::default(),
        }
    }

    pub fn with_results(mut self, results: Vec<ScoredChunk>) -> Self {
        self.results = results;
        self
    }

    pub fn with_stats(mut self, stats: SearchStats) -> Self {
        self.stats = stats;
        self
    }

    /// Get top N results
    pub fn top(&self, n: usize) -> &[ScoredChunk] {
        &self.results[..n.min(self.results.len())]
    }

    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        self.results.iter().map(|r| r.chunk_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }
}

/// Outcome of the approximate index write during ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Indexed,
    /// Stored durably but not in the approximate index yet; still found
    /// through fallback
    Degraded,
}

/// Result of ingesting one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunk_ids: Vec<ChunkId>,
    pub indexed_count: usize,
    pub approximate_index_status: IndexStatus,
}

/// Running totals since the retriever was created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub queries: u64,
    /// Queries answered by the exact fallback
    pub fallback_queries: u64,
    /// Fallbacks for any reason other than a disabled index
    pub degraded_queries: u64,
    pub index_write_failures: u64,
    pub documents_ingested: u64,
    pub stored_chunks: usize,
    pub pending_documents: usize,
    pub approximate_index_available: bool,
    pub embedding_backend: String,
    pub embedding_degraded: bool,
}
