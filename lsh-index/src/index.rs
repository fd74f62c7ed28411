use async_trait::async_trait;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::LshConfig;
use crate::error::{IndexError, Result};
use crate::hasher::HyperplaneHasher;

const MEMBER_SHARDS: usize = 16;

/// Identifier types the index can hold
pub trait IndexKey:
    Copy + Eq + Hash + Ord + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> IndexKey for T where
    T: Copy + Eq + Hash + Ord + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// A candidate id with the number of bands it shared with the query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate<K> {
    pub id: K,
    pub band_hits: usize,
}

/// Query result: the bounded candidate pool plus how many distinct ids
/// matched before truncation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet<K> {
    pub candidates: Vec<Candidate<K>>,
    pub total_matches: usize,
}

impl<K> CandidateSet<K> {
    pub fn empty() -> Self {
        Self {
            candidates: Vec::new(),
            total_matches: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn ids(&self) -> Vec<K>
    where
        K: Copy,
    {
        self.candidates.iter().map(|c| c.id).collect()
    }
}

/// Candidate generator used ahead of exact re-ranking.
///
/// Results are never authoritative: callers must re-score candidates
/// against the durable store and tolerate ids that no longer exist.
#[async_trait]
pub trait ApproximateIndex<K: Send + Sync + 'static>: Send + Sync {
    /// Add or replace entries. Returns how many were indexed.
    async fn index_batch(&self, entries: &[(K, Vec<f32>)]) -> Result<usize>;

    /// Up to `pool_size` candidates ordered by band hits, then id
    async fn query(&self, vector: &[f32], pool_size: usize) -> Result<CandidateSet<K>>;

    /// Returns whether the id was present
    async fn remove(&self, id: K) -> Result<bool>;

    fn is_available(&self) -> bool;

    async fn clear(&self) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct Snapshot<K> {
    config: LshConfig,
    members: Vec<(K, Vec<u64>)>,
}

/// In-memory banded LSH index.
///
/// Every id sits in exactly one bucket per band. The band hashes of each id
/// are remembered so re-indexing moves it and removal needs no vector.
pub struct LshIndex<K> {
    config: LshConfig,
    hasher: HyperplaneHasher,
    /// One bucket table per band
    bands: Vec<RwLock<HashMap<u64, HashSet<K>>>>,
    /// id -> band hashes, sharded by id
    members: Vec<RwLock<HashMap<K, Vec<u64>>>>,
    available: AtomicBool,
}

impl<K: IndexKey> LshIndex<K> {
    pub fn new(config: LshConfig) -> Result<Self> {
        config.validate().map_err(IndexError::InvalidConfig)?;

        let recall = config.collision_probability(config.similarity_threshold);
        if recall < 0.5 {
            warn!(
                "LSH layout {}x{} finds pairs at similarity {} with probability {:.2}",
                config.num_bands,
                config.rows_per_band(),
                config.similarity_threshold,
                recall
            );
        }
        info!(
            "LSH index: dim={}, bands={}, rows={}, effective threshold {:.3}",
            config.dimension,
            config.num_bands,
            config.rows_per_band(),
            config.effective_threshold()
        );

        let hasher = HyperplaneHasher::new(&config);
        let bands = (0..config.num_bands)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        let members = (0..MEMBER_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();

        Ok(Self {
            config,
            hasher,
            bands,
            members,
            available: AtomicBool::new(true),
        })
    }

    pub fn config(&self) -> &LshConfig {
        &self.config
    }

    /// Mark the index up or down. A down index refuses every operation
    /// until it is marked up again.
    pub fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::SeqCst);
        if was != available {
            info!("LSH index availability changed to {available}");
        }
    }

    pub fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of indexed ids
    pub fn len(&self) -> Result<usize> {
        let mut total = 0;
        for shard in &self.members {
            total += self.read(shard)?.len();
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, id: K) -> Result<bool> {
        Ok(self.read(self.shard(id))?.contains_key(&id))
    }

    /// Hash and insert entries, replacing any previous buckets of the same id
    pub fn insert_many(&self, entries: &[(K, Vec<f32>)]) -> Result<usize> {
        self.ensure_available()?;

        // Hash everything first so a bad vector leaves the index untouched
        let hashed = entries
            .iter()
            .map(|(id, vector)| Ok((*id, self.hasher.band_hashes(vector)?)))
            .collect::<Result<Vec<_>>>()?;

        for (id, hashes) in hashed {
            let mut shard = self.write(self.shard(id))?;
            if let Some(previous) = shard.get(&id) {
                self.unlink(id, previous)?;
            }
            for (band, hash) in self.bands.iter().zip(&hashes) {
                self.write(band)?.entry(*hash).or_default().insert(id);
            }
            shard.insert(id, hashes);
        }

        debug!("Indexed {} vectors", entries.len());
        Ok(entries.len())
    }

    /// Candidates sharing at least one band with `vector`
    pub fn lookup(&self, vector: &[f32], pool_size: usize) -> Result<CandidateSet<K>> {
        self.ensure_available()?;
        let hashes = self.hasher.band_hashes(vector)?;

        let mut hits: HashMap<K, usize> = HashMap::new();
        for (band, hash) in self.bands.iter().zip(&hashes) {
            if let Some(bucket) = self.read(band)?.get(hash) {
                for id in bucket {
                    *hits.entry(*id).or_default() += 1;
                }
            }
        }

        let total_matches = hits.len();
        let mut candidates: Vec<Candidate<K>> = hits
            .into_iter()
            .map(|(id, band_hits)| Candidate { id, band_hits })
            .collect();
        candidates.sort_by(|a, b| b.band_hits.cmp(&a.band_hits).then(a.id.cmp(&b.id)));
        candidates.truncate(pool_size);

        debug!(
            "LSH lookup matched {} ids, returning {}",
            total_matches,
            candidates.len()
        );
        Ok(CandidateSet {
            candidates,
            total_matches,
        })
    }

    /// Drop an id from every bucket
    pub fn evict(&self, id: K) -> Result<bool> {
        self.ensure_available()?;
        let mut shard = self.write(self.shard(id))?;
        match shard.remove(&id) {
            Some(hashes) => {
                self.unlink(id, &hashes)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn clear_all(&self) -> Result<()> {
        for shard in &self.members {
            self.write(shard)?.clear();
        }
        for band in &self.bands {
            self.write(band)?.clear();
        }
        Ok(())
    }

    /// Write the index to a JSON snapshot
    pub async fn save(&self, path: &Path) -> Result<()> {
        let mut members = Vec::new();
        for shard in &self.members {
            members.extend(self.read(shard)?.iter().map(|(id, h)| (*id, h.clone())));
        }
        members.sort_by_key(|(id, _)| *id);

        let snapshot = Snapshot {
            config: self.config.clone(),
            members,
        };
        let json = serde_json::to_vec(&snapshot)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!(
            "Saved LSH snapshot with {} entries to {}",
            snapshot.members.len(),
            path.display()
        );
        Ok(())
    }

    /// Rebuild an index from a snapshot written with the same configuration
    pub async fn load(path: &Path, config: LshConfig) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: Snapshot<K> = serde_json::from_slice(&bytes)?;

        if snapshot.config != config {
            return Err(IndexError::Snapshot(format!(
                "snapshot at {} was built with a different configuration",
                path.display()
            )));
        }

        let index = Self::new(config)?;
        for (id, hashes) in snapshot.members {
            if hashes.len() != index.config.num_bands {
                return Err(IndexError::Snapshot(format!(
                    "entry {id:?} has {} band hashes, expected {}",
                    hashes.len(),
                    index.config.num_bands
                )));
            }
            for (band, hash) in index.bands.iter().zip(&hashes) {
                index.write(band)?.entry(*hash).or_default().insert(id);
            }
            index.write(index.shard(id))?.insert(id, hashes);
        }

        info!(
            "Loaded LSH snapshot with {} entries from {}",
            index.len()?,
            path.display()
        );
        Ok(index)
    }

    fn unlink(&self, id: K, hashes: &[u64]) -> Result<()> {
        for (band, hash) in self.bands.iter().zip(hashes) {
            let mut table = self.write(band)?;
            if let Some(bucket) = table.get_mut(hash) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    table.remove(hash);
                }
            }
        }
        Ok(())
    }

    fn shard(&self, id: K) -> &RwLock<HashMap<K, Vec<u64>>> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.members[(hasher.finish() as usize) % MEMBER_SHARDS]
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available() {
            Ok(())
        } else {
            Err(IndexError::Unavailable)
        }
    }

    fn read<'a, T>(&self, lock: &'a RwLock<T>) -> Result<RwLockReadGuard<'a, T>> {
        lock.read().map_err(|_| self.poisoned())
    }

    fn write<'a, T>(&self, lock: &'a RwLock<T>) -> Result<RwLockWriteGuard<'a, T>> {
        lock.write().map_err(|_| self.poisoned())
    }

    fn poisoned(&self) -> IndexError {
        self.available.store(false, Ordering::SeqCst);
        IndexError::Corrupted("lock poisoned".into())
    }
}

#[async_trait]
impl<K: IndexKey> ApproximateIndex<K> for LshIndex<K> {
    async fn index_batch(&self, entries: &[(K, Vec<f32>)]) -> Result<usize> {
        self.insert_many(entries)
    }

    async fn query(&self, vector: &[f32], pool_size: usize) -> Result<CandidateSet<K>> {
        self.lookup(vector, pool_size)
    }

    async fn remove(&self, id: K) -> Result<bool> {
        self.evict(id)
    }

    fn is_available(&self) -> bool {
        self.available()
    }

    async fn clear(&self) -> Result<()> {
        self.clear_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    fn small_config() -> LshConfig {
        LshConfig {
            dimension: 16,
            num_permutations: 64,
            num_bands: 16,
            ..Default::default()
        }
    }

    fn vector(seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..16).map(|_| rng.random_range(-1.0..1.0)).collect()
    }

    fn bucket_count(index: &LshIndex<u64>, id: u64) -> usize {
        index
            .bands
            .iter()
            .map(|band| {
                band.read()
                    .unwrap()
                    .values()
                    .filter(|bucket| bucket.contains(&id))
                    .count()
            })
            .sum()
    }

    #[test]
    fn test_identical_vector_hits_every_band() {
        let index = LshIndex::new(small_config()).unwrap();
        index.insert_many(&[(7u64, vector(1))]).unwrap();

        let result = index.lookup(&vector(1), 10).unwrap();
        assert_eq!(
            result.candidates,
            vec![Candidate {
                id: 7,
                band_hits: 16
            }]
        );
        assert_eq!(result.total_matches, 1);
    }

    #[test]
    fn test_reindex_keeps_one_bucket_per_band() {
        let index = LshIndex::new(small_config()).unwrap();
        index.insert_many(&[(1u64, vector(1))]).unwrap();
        index.insert_many(&[(1u64, vector(1))]).unwrap();
        assert_eq!(bucket_count(&index, 1), 16);
        assert_eq!(index.len().unwrap(), 1);

        index.insert_many(&[(1u64, vector(2))]).unwrap();
        assert_eq!(bucket_count(&index, 1), 16);
        assert_eq!(index.lookup(&vector(2), 10).unwrap().candidates[0].band_hits, 16);
    }

    #[test]
    fn test_evict() {
        let index = LshIndex::new(small_config()).unwrap();
        index
            .insert_many(&[(1u64, vector(1)), (2u64, vector(2))])
            .unwrap();

        assert!(index.evict(1).unwrap());
        assert!(!index.evict(1).unwrap());
        assert_eq!(bucket_count(&index, 1), 0);
        assert!(!index.contains(1).unwrap());
        assert!(index.lookup(&vector(1), 10).unwrap().ids().iter().all(|id| *id != 1));
    }

    #[test]
    fn test_pool_size_and_ordering() {
        let index = LshIndex::new(small_config()).unwrap();
        let base = vector(42);
        let entries: Vec<(u64, Vec<f32>)> = (0..20).map(|id| (id, base.clone())).collect();
        index.insert_many(&entries).unwrap();

        let result = index.lookup(&base, 5).unwrap();
        assert_eq!(result.total_matches, 20);
        // All tie on hits, so ids ascend
        assert_eq!(result.ids(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_closer_vectors_rank_higher() {
        let index = LshIndex::new(small_config()).unwrap();
        let base = vector(3);
        let near: Vec<f32> = base.iter().map(|x| x + 0.01).collect();
        let far: Vec<f32> = base.iter().map(|x| -x).collect();
        index
            .insert_many(&[(1u64, far), (2u64, near)])
            .unwrap();

        let result = index.lookup(&base, 10).unwrap();
        assert_eq!(result.candidates[0].id, 2);
        assert!(result.ids().iter().all(|id| *id != 1));
    }

    #[test]
    fn test_bad_dimension_leaves_index_untouched() {
        let index = LshIndex::new(small_config()).unwrap();
        let err = index
            .insert_many(&[(1u64, vector(1)), (2u64, vec![1.0; 3])])
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn test_unavailable_index_refuses_work() {
        let index = LshIndex::new(small_config()).unwrap();
        index.insert_many(&[(1u64, vector(1))]).unwrap();
        index.set_available(false);

        assert!(matches!(
            index.lookup(&vector(1), 10),
            Err(IndexError::Unavailable)
        ));
        assert!(matches!(
            index.insert_many(&[(2u64, vector(2))]),
            Err(IndexError::Unavailable)
        ));

        index.set_available(true);
        assert_eq!(index.lookup(&vector(1), 10).unwrap().ids(), vec![1]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LshConfig {
            num_bands: 7,
            ..small_config()
        };
        assert!(matches!(
            LshIndex::<u64>::new(config),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empirical_collision_rate() {
        let config = LshConfig {
            dimension: 32,
            num_permutations: 128,
            num_bands: 32,
            ..Default::default()
        };
        let index = LshIndex::new(config).unwrap();
        let mut rng = StdRng::seed_from_u64(9);

        let mut found = 0;
        let trials = 200u64;
        for id in 0..trials {
            let base: Vec<f32> = (0..32).map(|_| rng.random_range(-1.0..1.0)).collect();
            let noisy: Vec<f32> = base
                .iter()
                .map(|x| x + rng.random_range(-0.1..0.1))
                .collect();
            index.insert_many(&[(id, base)]).unwrap();
            if index.lookup(&noisy, 1000).unwrap().ids().contains(&id) {
                found += 1;
            }
        }
        assert!(found as f64 / trials as f64 > 0.9, "found {found}/{trials}");
    }

    #[tokio::test]
    async fn test_trait_object_roundtrip() {
        let index: Box<dyn ApproximateIndex<u64>> =
            Box::new(LshIndex::new(small_config()).unwrap());
        assert!(index.is_available());
        assert_eq!(index.index_batch(&[(5, vector(5))]).await.unwrap(), 1);
        assert_eq!(index.query(&vector(5), 3).await.unwrap().ids(), vec![5]);
        assert!(index.remove(5).await.unwrap());
        index.clear().await.unwrap();
        assert!(index.query(&vector(5), 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_restores_buckets() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lsh.json");

        let index = LshIndex::new(small_config()).unwrap();
        index
            .insert_many(&[(1u64, vector(1)), (2u64, vector(2))])
            .unwrap();
        index.save(&path).await.unwrap();

        let restored = LshIndex::<u64>::load(&path, small_config()).await.unwrap();
        assert_eq!(restored.len().unwrap(), 2);
        assert_eq!(
            restored.lookup(&vector(2), 10).unwrap().candidates[0],
            Candidate {
                id: 2,
                band_hits: 16
            }
        );

        let other = LshConfig {
            seed: 1,
            ..small_config()
        };
        assert!(matches!(
            LshIndex::<u64>::load(&path, other).await,
            Err(IndexError::Snapshot(_))
        ));
    }
}
