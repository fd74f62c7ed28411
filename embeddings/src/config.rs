use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::DEFAULT_EMBEDDING_DIM;

/// Which backend produces embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// In-process ONNX model
    Local,
    /// OpenAI-compatible HTTP API
    Remote,
}

impl ProviderKind {
    pub fn other(self) -> Self {
        match self {
            ProviderKind::Local => ProviderKind::Remote,
            ProviderKind::Remote => ProviderKind::Local,
        }
    }
}

/// Supported local embedding models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingModelType {
    /// Nomic-embed-text-v1.5
    NomicEmbedTextV15,
    /// BGE-base-en-v1.5
    BgeBaseEnV15,
    /// BGE-small-en-v1.5
    BgeSmallEnV15,
    /// All-MiniLM-L6-v2 (lightweight, faster)
    AllMiniLmL6V2,
}

impl EmbeddingModelType {
    /// Dimension of the vectors the model emits
    pub fn native_dimension(self) -> usize {
        match self {
            EmbeddingModelType::NomicEmbedTextV15 | EmbeddingModelType::BgeBaseEnV15 => 768,
            EmbeddingModelType::BgeSmallEnV15 | EmbeddingModelType::AllMiniLmL6V2 => 384,
        }
    }

    pub(crate) fn to_fastembed_model(self) -> fastembed::EmbeddingModel {
        use fastembed::EmbeddingModel;
        match self {
            EmbeddingModelType::NomicEmbedTextV15 => EmbeddingModel::NomicEmbedTextV15,
            EmbeddingModelType::BgeBaseEnV15 => EmbeddingModel::BGEBaseENV15,
            EmbeddingModelType::BgeSmallEnV15 => EmbeddingModel::BGESmallENV15,
            EmbeddingModelType::AllMiniLmL6V2 => EmbeddingModel::AllMiniLML6V2,
        }
    }
}

/// Settings for the in-process model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalModelConfig {
    #[serde(default = "default_model")]
    pub model: EmbeddingModelType,

    /// Texts per inference call
    #[serde(default = "default_local_batch_size")]
    pub batch_size: usize,

    /// Show download progress when fetching model files
    #[serde(default)]
    pub show_download_progress: bool,

    /// Where model files are cached; fastembed's default when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_model() -> EmbeddingModelType {
    EmbeddingModelType::NomicEmbedTextV15
}

fn default_local_batch_size() -> usize {
    32
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            batch_size: default_local_batch_size(),
            show_download_progress: false,
            cache_dir: None,
        }
    }
}

/// Settings for the OpenAI-compatible embeddings API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_remote_model")]
    pub model: String,

    /// Inline API key; takes precedence over `api_key_env`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Provider limit on inputs per request
    #[serde(default = "default_remote_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Total attempts per batch, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Delay before the first retry; doubles on every further retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Ask the API for vectors of the configured dimension
    #[serde(default = "default_true")]
    pub request_dimensions: bool,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_remote_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_remote_batch_size() -> usize {
    100
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_remote_model(),
            api_key: None,
            api_key_env: default_api_key_env(),
            batch_size: default_remote_batch_size(),
            request_timeout_ms: default_request_timeout_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            request_dimensions: true,
        }
    }
}

/// Configuration for the embedding provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Primary backend
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    /// Switch to the other backend for the rest of the process when the
    /// primary fails, instead of failing fast
    #[serde(default)]
    pub allow_fallback: bool,

    /// Dimension every produced vector must have
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub local: LocalModelConfig,

    #[serde(default)]
    pub remote: RemoteConfig,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Local
}

fn default_dimension() -> usize {
    DEFAULT_EMBEDDING_DIM
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            allow_fallback: false,
            dimension: default_dimension(),
            local: LocalModelConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.dimension == 0 {
            return Err("dimension must be greater than 0".into());
        }

        if self.local.batch_size == 0 {
            return Err("local.batch_size must be greater than 0".into());
        }

        if self.remote.batch_size == 0 {
            return Err("remote.batch_size must be greater than 0".into());
        }

        if self.remote.max_attempts == 0 {
            return Err("remote.max_attempts must be at least 1".into());
        }

        if self.remote.base_url.trim().is_empty() {
            return Err("remote.base_url must not be empty".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = EmbeddingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider, ProviderKind::Local);
        assert_eq!(config.remote.max_attempts, 3);
    }

    #[test]
    fn test_provider_kind_serializes_lowercase() {
        let config: EmbeddingConfig =
            serde_json::from_str(r#"{"provider": "remote", "allow_fallback": true}"#).unwrap();
        assert_eq!(config.provider, ProviderKind::Remote);
        assert_eq!(config.provider.other(), ProviderKind::Local);
        assert!(config.allow_fallback);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = EmbeddingConfig::default();
        config.remote.max_attempts = 0;
        assert!(config.validate().is_err());

        let config = EmbeddingConfig {
            dimension: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_native_dimensions() {
        assert_eq!(EmbeddingModelType::NomicEmbedTextV15.native_dimension(), 768);
        assert_eq!(EmbeddingModelType::AllMiniLmL6V2.native_dimension(), 384);
    }
}
