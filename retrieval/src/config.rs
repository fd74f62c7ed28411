use serde::{Deserialize, Serialize};
use sift_chunker::ChunkerConfig;
use sift_embeddings::{DEFAULT_EMBEDDING_DIM, EmbeddingConfig};
use sift_lsh_index::LshConfig;
use sift_vector_store::VectorStoreConfig;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, RetrievalError};

/// Query and ingestion behaviour of the hybrid retriever
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results returned when a request does not say
    #[serde(default = "default_top_k_default")]
    pub top_k_default: usize,

    /// Larger requests are clamped to this
    #[serde(default = "default_top_k_max")]
    pub top_k_max: usize,

    /// Candidates requested from the approximate index per result
    #[serde(default = "default_candidate_pool_multiplier")]
    pub candidate_pool_multiplier: usize,

    /// When false every query takes the exact path
    #[serde(default = "default_true")]
    pub approximate_index_enabled: bool,

    /// Bound on each vector store call
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Bound on each approximate index call
    #[serde(default = "default_index_timeout_ms")]
    pub index_timeout_ms: u64,

    /// Vectors per index write when rebuilding
    #[serde(default = "default_index_batch_size")]
    pub index_batch_size: usize,
}

fn default_top_k_default() -> usize {
    5
}

fn default_top_k_max() -> usize {
    50
}

fn default_candidate_pool_multiplier() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_store_timeout_ms() -> u64 {
    10_000
}

fn default_index_timeout_ms() -> u64 {
    500
}

fn default_index_batch_size() -> usize {
    1000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k_default: default_top_k_default(),
            top_k_max: default_top_k_max(),
            candidate_pool_multiplier: default_candidate_pool_multiplier(),
            approximate_index_enabled: true,
            store_timeout_ms: default_store_timeout_ms(),
            index_timeout_ms: default_index_timeout_ms(),
            index_batch_size: default_index_batch_size(),
        }
    }
}

impl RetrievalConfig {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.top_k_default == 0 || self.top_k_max == 0 {
            return Err("top_k_default and top_k_max must be > 0".to_string());
        }

        if self.top_k_default > self.top_k_max {
            return Err(format!(
                "top_k_default ({}) cannot exceed top_k_max ({})",
                self.top_k_default, self.top_k_max
            ));
        }

        if self.candidate_pool_multiplier == 0 {
            return Err("candidate_pool_multiplier must be > 0".to_string());
        }

        if self.store_timeout_ms == 0 || self.index_timeout_ms == 0 {
            return Err("timeouts must be > 0".to_string());
        }

        if self.index_batch_size == 0 {
            return Err("index_batch_size must be > 0".to_string());
        }

        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.index_timeout_ms)
    }
}

/// Configuration of the whole engine, usually read from a TOML file.
///
/// `embedding_dimension` is the single source of truth for vector size; it
/// overrides the dimension fields of the nested sections.
///
/// ```toml
/// embedding_dimension = 384
///
/// [embedding]
/// provider = "remote"
/// allow_fallback = true
///
/// [chunker]
/// chunk_size = 800
/// chunk_overlap = 100
///
/// [retrieval]
/// top_k_default = 8
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub chunker: ChunkerConfig,

    #[serde(default)]
    pub store: VectorStoreConfig,

    #[serde(default)]
    pub lsh: LshConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

fn default_embedding_dimension() -> usize {
    DEFAULT_EMBEDDING_DIM
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: default_embedding_dimension(),
            embedding: EmbeddingConfig::default(),
            chunker: ChunkerConfig::default(),
            store: VectorStoreConfig::default(),
            lsh: LshConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document, propagate the dimension and validate
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| RetrievalError::Config(e.to_string()))?;
        let config = config.with_dimension_propagated();
        config.validate().map_err(RetrievalError::Config)?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RetrievalError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Copy `embedding_dimension` into every section that carries one
    pub fn with_dimension_propagated(mut self) -> Self {
        self.embedding.dimension = self.embedding_dimension;
        self.store.embedding_dim = self.embedding_dimension;
        self.lsh.dimension = self.embedding_dimension;
        self
    }

    /// Validate every section
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.embedding_dimension == 0 {
            return Err("embedding_dimension must be > 0".to_string());
        }

        for (section, dimension) in [
            ("embedding", self.embedding.dimension),
            ("store", self.store.embedding_dim),
            ("lsh", self.lsh.dimension),
        ] {
            if dimension != self.embedding_dimension {
                return Err(format!(
                    "{section} dimension {dimension} differs from embedding_dimension {}",
                    self.embedding_dimension
                ));
            }
        }

        self.embedding.validate().map_err(|e| format!("embedding: {e}"))?;
        self.chunker.validate().map_err(|e| format!("chunker: {e}"))?;
        self.store.validate().map_err(|e| format!("store: {e}"))?;
        self.lsh.validate().map_err(|e| format!("lsh: {e}"))?;
        self.retrieval
            .validate()
            .map_err(|e| format!("retrieval: {e}"))?;
        Ok(())
    }
}
