use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during vector store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// A vector does not have the store's dimension
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Malformed request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Write rejected by a uniqueness or ownership rule
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// The database could not be reached; retrying may succeed
    #[error("Vector store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not finish in time
    #[error("Vector store operation '{operation}' timed out after {after_ms}ms")]
    Timeout { operation: &'static str, after_ms: u64 },

    /// Stored data could not be decoded
    #[error("Corrupt vector store data: {0}")]
    Corrupt(String),

    /// Any other database failure
    #[error("Database error: {0}")]
    Database(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the caller may retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout { .. })
    }

    /// Whether the request itself was invalid
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::DimensionMismatch { .. } | StoreError::InvalidInput(_)
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(failure, _) => Some(failure.code),
            _ => None,
        };
        match code {
            Some(ErrorCode::ConstraintViolation) => StoreError::Constraint(err.to_string()),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen) => {
                StoreError::Unavailable(err.to_string())
            }
            Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) => {
                StoreError::Corrupt(err.to_string())
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
