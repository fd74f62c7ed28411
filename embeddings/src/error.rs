use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during embedding operations
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Failed to initialize the embedding backend
    #[error("Failed to initialize embedding model: {0}")]
    ModelInitialization(String),

    /// The backend failed to produce embeddings
    #[error("Failed to generate embeddings: {0}")]
    EmbeddingGeneration(String),

    /// Invalid input provided to the provider
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid provider configuration
    #[error("Invalid embedding configuration: {0}")]
    InvalidConfig(String),

    /// A vector came back with the wrong number of components
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The remote API rejected the request
    #[error("Embedding request failed ({status}): {body}")]
    Request { status: u16, body: String },

    /// Transient failures persisted through every attempt
    #[error("Embedding request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: usize, last_error: String },

    /// The call did not finish in time
    #[error("Embedding call timed out after {0:?}")]
    Timeout(Duration),
}

impl EmbeddingError {
    /// Whether the error describes bad input rather than a backend failure.
    ///
    /// Validation failures are never retried and never trigger a switch to
    /// the fallback backend. A vector of the wrong width is the backend's
    /// fault, not the caller's, so it is not one of them.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EmbeddingError::InvalidInput(_) | EmbeddingError::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;
