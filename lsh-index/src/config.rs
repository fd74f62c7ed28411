use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Recall a band layout chosen by [`LshConfig::for_threshold`] must reach
/// at the similarity threshold.
const TARGET_RECALL: f64 = 0.9;

/// Parameters of the banded random-hyperplane index.
///
/// `num_permutations` sign bits are computed per vector and split into
/// `num_bands` bands of `rows_per_band()` bits. More bands raise recall and
/// the number of false candidates; more rows per band do the opposite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LshConfig {
    /// Dimension of indexed vectors
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Total hyperplanes, i.e. signature bits per vector
    #[serde(default = "default_num_permutations")]
    pub num_permutations: usize,

    #[serde(default = "default_num_bands")]
    pub num_bands: usize,

    /// Cosine similarity above which two vectors should share a bucket
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Seed for the hyperplanes; the same seed yields the same buckets
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_dimension() -> usize {
    768
}

fn default_num_permutations() -> usize {
    256
}

fn default_num_bands() -> usize {
    32
}

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_seed() -> u64 {
    0x5eed_1a5b_0c4d_2e6f
}

impl Default for LshConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            num_permutations: default_num_permutations(),
            num_bands: default_num_bands(),
            similarity_threshold: default_similarity_threshold(),
            seed: default_seed(),
        }
    }
}

impl LshConfig {
    /// Bits per band
    pub fn rows_per_band(&self) -> usize {
        if self.num_bands == 0 {
            0
        } else {
            self.num_permutations / self.num_bands
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.dimension == 0 {
            return Err("dimension must be greater than 0".into());
        }

        if self.num_permutations == 0 || self.num_bands == 0 {
            return Err("num_permutations and num_bands must be greater than 0".into());
        }

        if self.num_bands * self.rows_per_band() != self.num_permutations {
            return Err(format!(
                "num_bands ({}) must divide num_permutations ({})",
                self.num_bands, self.num_permutations
            ));
        }

        if !(self.similarity_threshold > 0.0 && self.similarity_threshold < 1.0) {
            return Err(format!(
                "similarity_threshold must be in (0, 1), got {}",
                self.similarity_threshold
            ));
        }

        Ok(())
    }

    /// Pick the band count for `num_permutations` bits: the fewest bands
    /// whose collision probability at `threshold` reaches 90%, or one bit
    /// per band if none does.
    pub fn for_threshold(
        dimension: usize,
        num_permutations: usize,
        threshold: f32,
    ) -> Result<Self, String> {
        let mut config = Self {
            dimension,
            num_permutations,
            num_bands: num_permutations,
            similarity_threshold: threshold,
            ..Default::default()
        };
        config.validate()?;

        for bands in (1..=num_permutations).filter(|b| num_permutations % b == 0) {
            let candidate = Self {
                num_bands: bands,
                ..config.clone()
            };
            if candidate.collision_probability(threshold) >= TARGET_RECALL {
                config.num_bands = bands;
                break;
            }
        }

        Ok(config)
    }

    /// Probability that one random hyperplane puts two vectors with this
    /// cosine similarity on the same side
    pub fn bit_agreement(similarity: f32) -> f64 {
        let similarity = f64::from(similarity).clamp(-1.0, 1.0);
        1.0 - similarity.acos() / PI
    }

    /// Probability that two vectors with this cosine similarity share at
    /// least one bucket
    pub fn collision_probability(&self, similarity: f32) -> f64 {
        let rows = self.rows_per_band() as i32;
        let bands = self.num_bands as i32;
        let band_match = Self::bit_agreement(similarity).powi(rows);
        1.0 - (1.0 - band_match).powi(bands)
    }

    /// Similarity at which the collision curve is steepest, roughly where
    /// two vectors start landing in a shared bucket
    pub fn effective_threshold(&self) -> f32 {
        let rows = self.rows_per_band() as f64;
        let bands = self.num_bands as f64;
        let agreement = (1.0 / bands).powf(1.0 / rows);
        (PI * (1.0 - agreement)).cos() as f32
    }
}
