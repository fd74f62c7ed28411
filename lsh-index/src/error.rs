use thiserror::Error;

/// Errors from the approximate index. None of these are fatal to a query;
/// callers fall back to exact search.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The index has been marked down
    #[error("Approximate index unavailable")]
    Unavailable,

    /// Internal state can no longer be trusted
    #[error("Approximate index corrupted: {0}")]
    Corrupted(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid LSH configuration: {0}")]
    InvalidConfig(String),

    /// A snapshot does not match the running configuration
    #[error("Snapshot mismatch: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;
