use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sift_chunker::{Chunker, ChunkerConfig};
use sift_embeddings::{EmbeddingBackend, EmbeddingProvider};
use sift_lsh_index::{LshConfig, LshIndex};
use sift_retrieval::{ChunkInput, HybridRetriever, IngestRequest, RetrievalConfig};
use sift_vector_store::{Scope, VectorStore, VectorStoreConfig};
use std::sync::Arc;
use tokio::runtime::Runtime;

const DIMENSION: usize = 384;

/// Pseudo-random unit-scale vector seeded by the text
struct SeededBackend;

#[async_trait]
impl EmbeddingBackend for SeededBackend {
    fn name(&self) -> &'static str {
        "seeded"
    }

    fn max_batch_size(&self) -> usize {
        256
    }

    async fn embed_batch(&self, texts: &[String]) -> sift_embeddings::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let seed = text
                    .bytes()
                    .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3));
                let mut rng = StdRng::seed_from_u64(seed);
                (0..DIMENSION).map(|_| rng.random_range(-1.0..1.0)).collect()
            })
            .collect())
    }
}

async fn setup_retriever(chunk_count: usize, approximate: bool) -> HybridRetriever {
    let store = VectorStore::open_in_memory(VectorStoreConfig::with_dimension(DIMENSION))
        .await
        .unwrap();
    let index = LshIndex::new(LshConfig {
        dimension: DIMENSION,
        ..Default::default()
    })
    .unwrap();
    let provider = Arc::new(EmbeddingProvider::new(DIMENSION, Arc::new(SeededBackend), None));
    let config = RetrievalConfig {
        approximate_index_enabled: approximate,
        ..Default::default()
    };
    let retriever = HybridRetriever::new(
        config,
        Chunker::new(ChunkerConfig::default()).unwrap(),
        provider,
        store,
        Arc::new(index),
    )
    .unwrap();

    let chunks = (0..chunk_count)
        .map(|i| ChunkInput::new(i, format!("chunk {i}")))
        .collect();
    retriever
        .ingest(IngestRequest::chunks("corpus", Scope::Global, chunks))
        .await
        .unwrap();
    retriever
}

fn bench_search_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("search_latency");

    for chunk_count in [1_000, 5_000, 20_000] {
        group.throughput(Throughput::Elements(chunk_count as u64));

        for (label, approximate) in [("approximate", true), ("exact", false)] {
            let retriever = rt.block_on(setup_retriever(chunk_count, approximate));
            let query = rt
                .block_on(SeededBackend.embed_batch(&["chunk 42".to_string()]))
                .unwrap()
                .remove(0);

            group.bench_with_input(BenchmarkId::new(label, chunk_count), &query, |b, query| {
                b.to_async(&rt).iter(|| async {
                    let results = retriever
                        .search(black_box(query), &Scope::Global, 10)
                        .await
                        .unwrap();
                    black_box(results);
                });
            });
        }
    }

    group.finish();
}

fn bench_ingest(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    c.bench_function("ingest_1000_chunks", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(setup_retriever(1_000, true).await) });
    });
}

criterion_group!(benches, bench_search_latency, bench_ingest);
criterion_main!(benches);
