use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sift_chunker::{Chunker, ChunkerConfig};
use sift_embeddings::{EmbeddingBackend, EmbeddingError, EmbeddingProvider};
use sift_lsh_index::{ApproximateIndex, CandidateSet, IndexError, LshConfig, LshIndex};
use sift_retrieval::{
    ChunkInput, DegradedReason, ErrorKind, HybridRetriever, IndexStatus, IngestRequest,
    QueryRequest, RetrievalConfig, RetrievalError, SearchMode,
};
use sift_vector_store::{ChunkId, Scope, StoreError, VectorStore, VectorStoreConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const DIM: usize = 16;

/// Returns registered vectors for known texts and a byte-derived vector
/// for anything else
struct TableBackend {
    dimension: usize,
    table: Mutex<HashMap<String, Vec<f32>>>,
}

impl TableBackend {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            table: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, text: &str, vector: Vec<f32>) {
        self.table.lock().unwrap().insert(text.to_string(), vector);
    }
}

#[async_trait]
impl EmbeddingBackend for TableBackend {
    fn name(&self) -> &'static str {
        "table"
    }

    fn max_batch_size(&self) -> usize {
        8
    }

    async fn embed_batch(&self, texts: &[String]) -> sift_embeddings::Result<Vec<Vec<f32>>> {
        let table = self.table.lock().unwrap();
        Ok(texts
            .iter()
            .map(|text| {
                table.get(text).cloned().unwrap_or_else(|| {
                    let mut v = vec![0.1; self.dimension];
                    for (i, b) in text.bytes().enumerate() {
                        v[i % self.dimension] += f32::from(b) / 64.0;
                    }
                    v
                })
            })
            .collect())
    }
}

/// Wraps a real index with switchable failures
struct FlakyIndex {
    inner: LshIndex<ChunkId>,
    fail_writes: AtomicBool,
    query_delay: Mutex<Option<Duration>>,
}

impl FlakyIndex {
    fn new(dimension: usize) -> Self {
        Self {
            inner: LshIndex::new(lsh_config(dimension)).unwrap(),
            fail_writes: AtomicBool::new(false),
            query_delay: Mutex::new(None),
        }
    }

    fn slow_queries(&self, delay: Duration) {
        *self.query_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl ApproximateIndex<ChunkId> for FlakyIndex {
    async fn index_batch(&self, entries: &[(ChunkId, Vec<f32>)]) -> sift_lsh_index::Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IndexError::Corrupted("injected write failure".to_string()));
        }
        self.inner.index_batch(entries).await
    }

    async fn query(&self, vector: &[f32], pool_size: usize) -> sift_lsh_index::Result<CandidateSet<ChunkId>> {
        let delay = *self.query_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.query(vector, pool_size).await
    }

    async fn remove(&self, id: ChunkId) -> sift_lsh_index::Result<bool> {
        self.inner.remove(id).await
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn clear(&self) -> sift_lsh_index::Result<()> {
        self.inner.clear().await
    }
}

fn lsh_config(dimension: usize) -> LshConfig {
    LshConfig {
        dimension,
        num_permutations: 64,
        num_bands: 16,
        ..Default::default()
    }
}

struct Harness {
    retriever: HybridRetriever,
    backend: Arc<TableBackend>,
    index: Arc<FlakyIndex>,
}

async fn harness_with(config: RetrievalConfig, store: VectorStore) -> Harness {
    let dimension = store.dimension();
    let backend = Arc::new(TableBackend::new(dimension));
    let index = Arc::new(FlakyIndex::new(dimension));
    let provider = Arc::new(EmbeddingProvider::new(
        dimension,
        Arc::clone(&backend) as Arc<dyn EmbeddingBackend>,
        None,
    ));
    let retriever = HybridRetriever::new(
        config,
        Chunker::new(ChunkerConfig::new(40, 10)).unwrap(),
        provider,
        store,
        Arc::clone(&index) as Arc<dyn ApproximateIndex<ChunkId>>,
    )
    .unwrap();
    Harness {
        retriever,
        backend,
        index,
    }
}

async fn harness(config: RetrievalConfig) -> Harness {
    let store = VectorStore::open_in_memory(VectorStoreConfig::with_dimension(DIM))
        .await
        .unwrap();
    harness_with(config, store).await
}

fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[i % DIM] = 1.0;
    v
}

fn blend(a: usize, b: usize, weight: f32) -> Vec<f32> {
    let mut v = axis(a);
    v[b % DIM] += weight;
    v
}

/// Ingest one pre-chunked document whose chunk texts map to `vectors`
async fn ingest_vectors(
    h: &Harness,
    document_id: &str,
    scope: &Scope,
    vectors: Vec<Vec<f32>>,
) -> sift_retrieval::IngestReport {
    let chunks = vectors
        .into_iter()
        .enumerate()
        .map(|(i, vector)| {
            let text = format!("{document_id}/{i}");
            h.backend.register(&text, vector);
            ChunkInput::new(i, text)
        })
        .collect();
    h.retriever
        .ingest(IngestRequest::chunks(document_id, scope.clone(), chunks))
        .await
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn sessions_never_see_each_other() {
    let h = harness(RetrievalConfig::default()).await;
    let s1 = Scope::session("s1").unwrap();
    let s2 = Scope::session("s2").unwrap();

    let a = ingest_vectors(&h, "a", &s1, vec![axis(0)]).await;
    let b = ingest_vectors(&h, "b", &s2, vec![axis(0)]).await;
    let g = ingest_vectors(&h, "g", &Scope::Global, vec![axis(1)]).await;

    let from_s1 = h.retriever.search(&axis(0), &s1, 10).await.unwrap();
    let ids = from_s1.chunk_ids();
    assert!(ids.contains(&a.chunk_ids[0]));
    assert!(ids.contains(&g.chunk_ids[0]));
    assert!(!ids.contains(&b.chunk_ids[0]));

    let from_global = h.retriever.search(&axis(0), &Scope::Global, 10).await.unwrap();
    assert_eq!(from_global.chunk_ids(), g.chunk_ids);

    // Same checks on the exact path
    h.index.inner.set_available(false);
    let fallback = h.retriever.search(&axis(0), &s2, 10).await.unwrap();
    assert_eq!(
        fallback.mode,
        SearchMode::Fallback(DegradedReason::IndexUnavailable)
    );
    assert_eq!(fallback.chunk_ids(), vec![b.chunk_ids[0], g.chunk_ids[0]]);
}

#[test_log::test(tokio::test)]
async fn approximate_path_filters_foreign_candidates() {
    let h = harness(RetrievalConfig::default()).await;
    let mine = Scope::session("mine").unwrap();
    let theirs = Scope::session("theirs").unwrap();

    let near = vec![blend(0, 1, 0.05), blend(0, 1, 0.1), blend(0, 1, 0.15)];
    let own = ingest_vectors(&h, "own", &mine, near.clone()).await;
    let foreign = ingest_vectors(&h, "foreign", &theirs, near).await;

    let results = h.retriever.search(&axis(0), &mine, 2).await.unwrap();
    assert_eq!(results.mode, SearchMode::Approximate);
    assert_eq!(results.stats.candidates_in_scope, 3);
    assert_eq!(results.chunk_ids(), own.chunk_ids[..2].to_vec());
    for id in &foreign.chunk_ids {
        assert!(!results.chunk_ids().contains(id));
    }
}

#[test_log::test(tokio::test)]
async fn disabled_index_matches_exact_search() {
    let h = harness(RetrievalConfig {
        approximate_index_enabled: false,
        ..Default::default()
    })
    .await;
    let scope = Scope::session("s").unwrap();
    let vectors: Vec<Vec<f32>> = (0..12).map(|i| blend(i, i + 3, 0.4)).collect();
    ingest_vectors(&h, "doc", &scope, vectors).await;
    // Identical vectors tie on distance and must come back in insertion order
    ingest_vectors(&h, "dup", &scope, vec![blend(2, 5, 0.4), blend(2, 5, 0.4)]).await;

    for query in [axis(2), blend(7, 1, 0.2), vec![0.3; DIM]] {
        let results = h.retriever.search(&query, &scope, 5).await.unwrap();
        let exact = h.retriever.store().exact_search(&query, &scope, 5).await.unwrap();

        assert_eq!(
            results.mode,
            SearchMode::Fallback(DegradedReason::IndexDisabled)
        );
        assert_eq!(
            results.chunk_ids(),
            exact.iter().map(|(id, _)| *id).collect::<Vec<_>>()
        );
        for (hit, (_, distance)) in results.results.iter().zip(&exact) {
            assert_eq!(hit.distance, *distance);
            assert_eq!(hit.score, 1.0 - distance);
        }
    }
}

#[test_log::test(tokio::test)]
async fn exact_vector_comes_back_first() {
    let h = harness(RetrievalConfig::default()).await;
    let report = ingest_vectors(&h, "doc", &Scope::Global, vec![axis(3), axis(4), axis(5)]).await;

    let hit = h.retriever.store().exact_search(&axis(4), &Scope::Global, 1).await.unwrap();
    assert_eq!(hit[0].0, report.chunk_ids[1]);
    assert!(hit[0].1.abs() < 1e-6);
}

#[test_log::test(tokio::test)]
async fn too_few_candidates_fall_back() {
    let h = harness(RetrievalConfig::default()).await;
    let scope = Scope::session("small").unwrap();
    ingest_vectors(&h, "doc", &scope, vec![axis(0), axis(8), blend(0, 1, 0.5)]).await;

    let results = h.retriever.search(&axis(0), &scope, 5).await.unwrap();
    assert!(matches!(
        results.mode,
        SearchMode::Fallback(DegradedReason::InsufficientCandidates { needed: 5, .. })
    ));
    assert_eq!(results.len(), 3);
    assert_eq!(results.results[0].text, "doc/0");

    let stats = h.retriever.stats().await.unwrap();
    assert_eq!(stats.fallback_queries, 1);
    assert_eq!(stats.degraded_queries, 1);
}

#[test_log::test(tokio::test)]
async fn slow_index_times_out_into_fallback() {
    let h = harness(RetrievalConfig {
        index_timeout_ms: 20,
        ..Default::default()
    })
    .await;
    ingest_vectors(&h, "doc", &Scope::Global, (0..6).map(axis).collect()).await;
    h.index.slow_queries(Duration::from_millis(500));

    let results = h.retriever.search(&axis(2), &Scope::Global, 2).await.unwrap();
    assert_eq!(
        results.mode,
        SearchMode::Fallback(DegradedReason::IndexTimeout)
    );
    assert_eq!(results.results[0].text, "doc/2");
}

#[test_log::test(tokio::test)]
async fn failed_index_write_degrades_then_repairs() {
    let h = harness(RetrievalConfig::default()).await;
    h.index.fail_writes.store(true, Ordering::SeqCst);

    let report = ingest_vectors(&h, "doc", &Scope::Global, (0..4).map(axis).collect()).await;
    assert_eq!(report.approximate_index_status, IndexStatus::Degraded);
    assert_eq!(report.indexed_count, 4);

    // Stored durably and still found through the exact path
    let results = h.retriever.search(&axis(1), &Scope::Global, 1).await.unwrap();
    assert!(results.mode.is_fallback());
    assert_eq!(results.chunk_ids(), vec![report.chunk_ids[1]]);

    let stats = h.retriever.stats().await.unwrap();
    assert_eq!(stats.index_write_failures, 1);
    assert_eq!(stats.pending_documents, 1);

    // Still failing: nothing repaired
    let repair = h.retriever.reindex_pending().await.unwrap();
    assert_eq!(repair.documents_indexed, 0);
    assert_eq!(repair.still_pending, 1);

    h.index.fail_writes.store(false, Ordering::SeqCst);
    let repair = h.retriever.reindex_pending().await.unwrap();
    assert_eq!(repair.documents_indexed, 1);
    assert_eq!(repair.chunks_indexed, 4);
    assert_eq!(repair.still_pending, 0);

    let results = h.retriever.search(&axis(1), &Scope::Global, 1).await.unwrap();
    assert_eq!(results.mode, SearchMode::Approximate);
    assert_eq!(results.chunk_ids(), vec![report.chunk_ids[1]]);
}

#[test_log::test(tokio::test)]
async fn wrong_dimension_is_rejected_and_not_persisted() {
    let store = VectorStore::open_in_memory(VectorStoreConfig::with_dimension(768))
        .await
        .unwrap();
    let h = harness_with(RetrievalConfig::default(), store).await;
    h.backend.register("short", vec![0.5; 512]);

    let err = h
        .retriever
        .ingest(IngestRequest::chunks(
            "doc",
            Scope::Global,
            vec![ChunkInput::new(0, "short")],
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RetrievalError::Provider(EmbeddingError::DimensionMismatch {
            expected: 768,
            actual: 512
        })
    ));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.retriever.store().count().await.unwrap(), 0);

    let err = h
        .retriever
        .search(&[0.5; 512], &Scope::Global, 3)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RetrievalError::Store(StoreError::DimensionMismatch { .. })
    ));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test_log::test(tokio::test)]
async fn deleting_a_scope_removes_its_chunks_everywhere() {
    let h = harness(RetrievalConfig::default()).await;
    let scope = Scope::session("temp").unwrap();
    let report = ingest_vectors(&h, "doc", &scope, (0..5).map(axis).collect()).await;
    ingest_vectors(&h, "keep", &Scope::Global, vec![axis(9)]).await;

    assert_eq!(h.retriever.delete_scope(&scope).await.unwrap(), 5);
    for id in &report.chunk_ids {
        assert!(!h.index.inner.contains(*id).unwrap());
    }

    let results = h.retriever.search(&axis(0), &scope, 3).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results.results[0].document_id, "keep");

    let err = h.retriever.delete_scope(&Scope::Global).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    // An empty scope is not an error
    let empty = Scope::session("nobody").unwrap();
    assert_eq!(h.retriever.delete_scope(&empty).await.unwrap(), 0);
}

#[test_log::test(tokio::test)]
async fn deleting_a_document_allows_reingestion() {
    let h = harness(RetrievalConfig::default()).await;
    let first = ingest_vectors(&h, "doc", &Scope::Global, vec![axis(0), axis(1)]).await;

    let err = h
        .retriever
        .ingest(IngestRequest::chunks(
            "doc",
            Scope::Global,
            vec![ChunkInput::new(0, "doc/0")],
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Store);

    assert_eq!(h.retriever.delete_document("doc").await.unwrap(), 2);
    assert!(!h.index.inner.contains(first.chunk_ids[0]).unwrap());

    let second = ingest_vectors(&h, "doc", &Scope::Global, vec![axis(0)]).await;
    assert!(second.chunk_ids[0] > first.chunk_ids[1]);
}

#[test_log::test(tokio::test)]
async fn concurrent_ingestion_of_one_document_is_serialized() {
    let h = harness(RetrievalConfig::default()).await;
    let chunks: Vec<ChunkInput> = (0..4).map(|i| ChunkInput::new(i, format!("part {i}"))).collect();

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let retriever = h.retriever.clone();
            let request = IngestRequest::chunks("shared", Scope::Global, chunks.clone());
            tokio::spawn(async move { retriever.ingest(request).await })
        })
        .collect();

    let mut ok = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(report) => {
                assert_eq!(report.indexed_count, 4);
                ok += 1;
            }
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::Store);
                rejected += 1;
            }
        }
    }
    assert_eq!((ok, rejected), (1, 1));
    assert_eq!(h.retriever.store().count().await.unwrap(), 4);
}

#[test_log::test(tokio::test)]
async fn raw_text_question_round_trip() {
    let h = harness(RetrievalConfig::default()).await;
    let text = "Scopes isolate sessions. Global chunks are visible everywhere. \
                Deleting a session removes its chunks.";
    let report = h
        .retriever
        .ingest(IngestRequest::raw_text("guide", Scope::Global, text))
        .await
        .unwrap();
    assert_eq!(report.indexed_count, 4);

    let first_chunk: String = text.chars().take(40).collect();
    let results = h
        .retriever
        .search_text(
            QueryRequest::new(Scope::Global, first_chunk)
                .with_top_k(1)
                .with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(results.results[0].chunk_index, 0);
    assert_eq!(results.results[0].document_id, "guide");

    let default_k = h
        .retriever
        .search_text(QueryRequest::new(Scope::Global, "sessions"))
        .await
        .unwrap();
    assert_eq!(default_k.stats.top_k, 5);
    assert_eq!(default_k.len(), 4);
}

#[test_log::test(tokio::test)]
async fn rebuild_restores_approximate_results_after_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("sift.db");

    let store = VectorStore::open(&path, VectorStoreConfig::with_dimension(DIM))
        .await
        .unwrap();
    let first = harness_with(RetrievalConfig::default(), store).await;
    let stored = ingest_vectors(&first, "doc", &Scope::Global, (0..6).map(axis).collect()).await;
    drop(first);

    // A new process starts with an empty index
    let store = VectorStore::open(&path, VectorStoreConfig::with_dimension(DIM))
        .await
        .unwrap();
    let h = harness_with(RetrievalConfig::default(), store).await;
    let before = h.retriever.search(&axis(3), &Scope::Global, 1).await.unwrap();
    assert!(before.mode.is_fallback());

    assert_eq!(h.retriever.rebuild_index().await.unwrap(), 6);
    let after = h.retriever.search(&axis(3), &Scope::Global, 1).await.unwrap();
    assert_eq!(after.mode, SearchMode::Approximate);
    assert_eq!(after.chunk_ids(), vec![stored.chunk_ids[3]]);
}

#[test_log::test(tokio::test)]
async fn approximate_recall_on_near_duplicates() {
    const DIM: usize = 64;
    let store = VectorStore::open_in_memory(VectorStoreConfig::with_dimension(DIM))
        .await
        .unwrap();
    let h = harness_with(RetrievalConfig::default(), store).await;
    let mut rng = StdRng::seed_from_u64(7);

    let corpus: Vec<Vec<f32>> = (0..200)
        .map(|_| (0..DIM).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect();
    let report = ingest_vectors(&h, "corpus", &Scope::Global, corpus.clone()).await;
    assert_eq!(report.approximate_index_status, IndexStatus::Indexed);

    let mut approximate_hits = 0;
    for target in corpus.iter().take(100) {
        let query: Vec<f32> = target
            .iter()
            .map(|x| x + rng.random_range(-0.05..0.05))
            .collect();

        let exact = h
            .retriever
            .store()
            .exact_search(&query, &Scope::Global, 1)
            .await
            .unwrap();
        let results = h.retriever.search(&query, &Scope::Global, 1).await.unwrap();
        if results.mode == SearchMode::Approximate && results.chunk_ids() == vec![exact[0].0] {
            approximate_hits += 1;
        }
    }

    assert!(approximate_hits >= 90, "recall {approximate_hits}/100");
}
