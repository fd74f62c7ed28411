use crate::TextChunk;
use crate::config::ChunkerConfig;
use crate::error::{ChunkerError, Result};
use log::debug;

/// Sliding-window text chunker
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a new chunker, rejecting an invalid configuration
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate().map_err(ChunkerError::InvalidConfig)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into overlapping segments.
    ///
    /// Windows start every `chunk_size - chunk_overlap` characters and the
    /// last window may be shorter than `chunk_size`. Whitespace-only input
    /// yields no segments.
    pub fn chunk_str(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // Byte offset of every char boundary, including the end of the text.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = boundaries.len() - 1;

        let size = self.config.chunk_size;
        let step = self.config.step();

        let mut chunks = Vec::with_capacity(total_chars / step + 1);
        let mut start = 0;
        loop {
            let end = (start + size).min(total_chars);
            chunks.push(TextChunk {
                index: chunks.len(),
                content: text[boundaries[start]..boundaries[end]].to_string(),
                start_char: start,
                end_char: end,
            });

            if end == total_chars {
                break;
            }
            start += step;
        }

        debug!(
            "Split {total_chars} characters into {} segments (size {size}, overlap {})",
            chunks.len(),
            self.config.chunk_overlap
        );

        chunks
    }
}

/// Split `text` into segments of at most `size` characters, consecutive
/// segments sharing `overlap` characters.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<String>> {
    let chunker = Chunker::new(ChunkerConfig::new(size, overlap))?;
    Ok(chunker
        .chunk_str(text)
        .into_iter()
        .map(|chunk| chunk.content)
        .collect())
}
