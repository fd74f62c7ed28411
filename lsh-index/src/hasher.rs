use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;

use crate::config::LshConfig;
use crate::error::{IndexError, Result};

/// Random-hyperplane (SimHash) signatures reduced to one hash per band.
///
/// Each hyperplane contributes one bit: which side of the plane the vector
/// falls on. Two vectors agree on a bit with probability
/// `1 - angle / pi`, so banding the bits groups vectors by cosine
/// similarity.
pub struct HyperplaneHasher {
    dimension: usize,
    num_bands: usize,
    rows_per_band: usize,
    /// `num_permutations` rows of `dimension` components
    planes: Vec<f32>,
}

impl HyperplaneHasher {
    pub fn new(config: &LshConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let planes = (0..config.num_permutations * config.dimension)
            .map(|_| standard_normal(&mut rng))
            .collect();

        Self {
            dimension: config.dimension,
            num_bands: config.num_bands,
            rows_per_band: config.rows_per_band(),
            planes,
        }
    }

    /// One hash per band, in band order
    pub fn band_hashes(&self, vector: &[f32]) -> Result<Vec<u64>> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut hashes = Vec::with_capacity(self.num_bands);
        let mut planes = self.planes.chunks_exact(self.dimension);
        for _ in 0..self.num_bands {
            let mut bytes = Vec::with_capacity(self.rows_per_band.div_ceil(64) * 8);
            let mut word: u64 = 0;
            for row in 0..self.rows_per_band {
                let plane = planes
                    .next()
                    .ok_or_else(|| IndexError::Corrupted("hyperplane table too short".into()))?;
                let dot: f32 = plane.iter().zip(vector).map(|(p, v)| p * v).sum();
                if dot >= 0.0 {
                    word |= 1 << (row % 64);
                }
                if row % 64 == 63 {
                    bytes.extend_from_slice(&word.to_le_bytes());
                    word = 0;
                }
            }
            if self.rows_per_band % 64 != 0 {
                bytes.extend_from_slice(&word.to_le_bytes());
            }
            hashes.push(hash_bytes(&bytes));
        }

        Ok(hashes)
    }
}

/// FNV-1a
fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

/// Box-Muller sample from N(0, 1)
fn standard_normal(rng: &mut StdRng) -> f32 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    ((-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()) as f32
}
