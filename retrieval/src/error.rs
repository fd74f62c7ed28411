use serde::{Deserialize, Serialize};
use sift_chunker::ChunkerError;
use sift_embeddings::EmbeddingError;
use sift_lsh_index::IndexError;
use sift_vector_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    /// The request itself is malformed
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Embedding error: {0}")]
    Provider(#[from] EmbeddingError),

    #[error("Vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("Chunker error: {0}")]
    Chunker(#[from] ChunkerError),

    /// Only raised by index maintenance; queries and ingestion absorb index
    /// failures
    #[error("Approximate index error: {0}")]
    Index(#[from] IndexError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Fix the request; retrying it unchanged will fail again
    Validation,
    /// Embedding failed after retries and fallback
    Provider,
    /// The durable store failed or timed out
    Store,
    /// Index maintenance failed; exact search still works
    IndexDegraded,
}

impl RetrievalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RetrievalError::Validation(_)
            | RetrievalError::Chunker(_)
            | RetrievalError::Config(_) => ErrorKind::Validation,
            RetrievalError::Provider(err) if err.is_validation() => ErrorKind::Validation,
            RetrievalError::Provider(_) => ErrorKind::Provider,
            RetrievalError::Store(err) if err.is_validation() => ErrorKind::Validation,
            RetrievalError::Store(_) => ErrorKind::Store,
            RetrievalError::Index(_) => ErrorKind::IndexDegraded,
        }
    }

    /// Whether the same request may succeed later
    pub fn is_retryable(&self) -> bool {
        match self {
            RetrievalError::Store(err) => err.is_retryable(),
            RetrievalError::Provider(err) => !err.is_validation(),
            RetrievalError::Index(err) => matches!(err, IndexError::Unavailable),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
