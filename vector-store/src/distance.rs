use std::cmp::Ordering;

use crate::chunk::ChunkId;

/// Cosine similarity; zero when either vector has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// `1 - cosine_similarity`; lower is more similar
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// A chunk id paired with its distance to a query.
///
/// Orders by distance, then by id, so that among equal distances the
/// earlier-inserted chunk ranks first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub chunk_id: ChunkId,
    pub distance: f32,
}

impl Neighbor {
    pub fn new(chunk_id: ChunkId, distance: f32) -> Self {
        Self { chunk_id, distance }
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.chunk_id.cmp(&other.chunk_id))
    }
}

/// Keep the `top_k` smallest neighbors of `candidates`, sorted ascending.
pub fn nearest(candidates: impl IntoIterator<Item = Neighbor>, top_k: usize) -> Vec<Neighbor> {
    let mut heap = std::collections::BinaryHeap::with_capacity(top_k + 1);
    for candidate in candidates {
        heap.push(candidate);
        if heap.len() > top_k {
            heap.pop();
        }
    }
    heap.into_sorted_vec()
}
