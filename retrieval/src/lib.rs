/*!
# Sift Retrieval

Hybrid semantic retrieval over a durable vector store:

- **Approximate candidates** from a banded LSH index, sized at
  `candidate_pool_multiplier × top_k`
- **Scope filter and rehydration** against the store, on every path
- **Exact re-ranking** by cosine distance, ties broken by insertion order
- **Exact fallback** when the index is disabled, down, slow, failing, or
  returns fewer in-scope candidates than requested

## Architecture

```text
Ingest                               Query
  │                                    │
  ├─> Chunker                          ├─> EmbeddingProvider (text queries)
  ├─> EmbeddingProvider (one batch)    ├─> ApproximateIndex::query ──┐
  ├─> VectorStore::insert_batch        │     (error / timeout / few) │
  │     (must succeed)                 ├─> VectorStore::fetch_vectors│
  └─> ApproximateIndex::index_batch    │     (scope check)           │
        (best effort, else pending)    ├─> exact re-rank             │
                                       │                             │
                                       ├─> VectorStore::exact_search <┘
                                       └─> VectorStore::get_chunks
```

## Example

```rust,no_run
use sift_retrieval::{EngineConfig, HybridRetriever, IngestRequest, QueryRequest};
use sift_vector_store::Scope;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), sift_retrieval::RetrievalError> {
    let config = EngineConfig::load(Path::new("sift.toml"))?;
    let retriever = HybridRetriever::from_config(config, Path::new("sift.db")).await?;

    let session = Scope::session("session-42")?;
    let report = retriever
        .ingest(IngestRequest::raw_text("handbook", session.clone(), "..."))
        .await?;
    println!("stored {} chunks", report.indexed_count);

    let results = retriever
        .search_text(QueryRequest::new(session, "how are scopes isolated?").with_top_k(5))
        .await?;
    for (i, hit) in results.results.iter().enumerate() {
        println!("{}. {} #{} (score: {:.3})", i + 1, hit.document_id, hit.chunk_index, hit.score);
    }

    Ok(())
}
```
*/

mod config;
mod error;
mod ingest;
mod result;
mod retrieval;

pub use config::{EngineConfig, RetrievalConfig};
pub use error::{ErrorKind, Result, RetrievalError};
pub use ingest::{ChunkInput, IngestRequest, IngestSource};
pub use result::{
    DegradedReason, EngineStats, IndexStatus, IngestReport, ScoredChunk, SearchMode,
    SearchResults, SearchStats,
};
pub use retrieval::{HybridRetriever, QueryOptions, QueryRequest, ReindexReport};
