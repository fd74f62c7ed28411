//! # Sift Embeddings
//!
//! Turns text into fixed-dimension vectors for the retrieval engine.
//!
//! Two backends implement [`EmbeddingBackend`]:
//!
//! - [`LocalEmbedder`]: an ONNX model run in-process through fastembed. The
//!   model is loaded once per process and shared by every caller.
//! - [`RemoteEmbedder`]: an OpenAI-compatible HTTP API with bounded retries
//!   and exponential backoff for rate limits and transient failures.
//!
//! [`EmbeddingProvider`] picks one from [`EmbeddingConfig`], splits inputs
//! into backend-sized batches, checks every vector's dimension, and, when
//! `allow_fallback` is set, switches permanently to the other backend after
//! the first failure.
//!
//! ## Example
//!
//! ```no_run
//! use sift_embeddings::{EmbeddingConfig, EmbeddingProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sift_embeddings::EmbeddingError> {
//!     let provider = EmbeddingProvider::from_config(&EmbeddingConfig::default()).await?;
//!     let vector = provider.embed_one("how are chunks scoped?").await?;
//!     assert_eq!(vector.len(), provider.dimension());
//!     Ok(())
//! }
//! ```

mod backend;
mod config;
mod error;
mod local;
mod provider;
mod remote;

pub use backend::EmbeddingBackend;
pub use config::{EmbeddingConfig, EmbeddingModelType, LocalModelConfig, ProviderKind, RemoteConfig};
pub use error::{EmbeddingError, Result};
pub use local::LocalEmbedder;
pub use provider::EmbeddingProvider;
pub use remote::RemoteEmbedder;

/// Default embedding dimension for Nomic-embed-text-v1.5
pub const DEFAULT_EMBEDDING_DIM: usize = 768;
