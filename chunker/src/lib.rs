//! # Sift Chunker
//!
//! Splits raw document text into overlapping fixed-size segments, the unit
//! of embedding and retrieval.
//!
//! ```text
//! |<------ chunk_size ------>|
//!                     |<-ov->|
//!                     |<------ chunk_size ------>|
//!                                          |<-ov->|
//!                                          |<--- tail --->|
//! ```
//!
//! Chunking is pure and deterministic, so re-ingesting a document always
//! produces the same segments.
//!
//! ## Example
//!
//! ```
//! use sift_chunker::{Chunker, ChunkerConfig};
//!
//! # fn main() -> Result<(), sift_chunker::ChunkerError> {
//! let chunker = Chunker::new(ChunkerConfig::new(1000, 200))?;
//! let chunks = chunker.chunk_str(&"lorem ipsum ".repeat(250));
//! assert_eq!(chunks.len(), 4);
//! # Ok(())
//! # }
//! ```

mod chunker;
mod config;
mod error;

pub use chunker::{Chunker, chunk_text};
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};

/// A contiguous segment of a source document
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TextChunk {
    /// Ordinal of the segment within its document
    pub index: usize,

    /// The segment text
    pub content: String,

    /// Start offset in characters (inclusive)
    pub start_char: usize,

    /// End offset in characters (exclusive)
    pub end_char: usize,
}

impl TextChunk {
    pub fn char_len(&self) -> usize {
        self.end_char - self.start_char
    }
}
