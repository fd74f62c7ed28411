use thiserror::Error;

/// Errors that can occur while splitting text
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkerError {
    /// Chunk size or overlap out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ChunkerError>;
