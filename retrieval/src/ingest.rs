use serde::{Deserialize, Serialize};
use sift_chunker::Chunker;
use sift_vector_store::Scope;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Result, RetrievalError};

/// A pre-chunked segment supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInput {
    pub chunk_index: usize,
    pub text: String,
}

impl ChunkInput {
    pub fn new(chunk_index: usize, text: impl Into<String>) -> Self {
        Self {
            chunk_index,
            text: text.into(),
        }
    }
}

/// Document content, either to be chunked here or already chunked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestSource {
    RawText(String),
    Chunks(Vec<ChunkInput>),
}

/// One document to ingest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub document_id: String,
    pub scope: Scope,
    pub source: IngestSource,

    /// Upper bound for embedding and for the store write
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl IngestRequest {
    pub fn raw_text(document_id: impl Into<String>, scope: Scope, text: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            scope,
            source: IngestSource::RawText(text.into()),
            timeout_ms: None,
        }
    }

    pub fn chunks(document_id: impl Into<String>, scope: Scope, chunks: Vec<ChunkInput>) -> Self {
        Self {
            document_id: document_id.into(),
            scope,
            source: IngestSource::Chunks(chunks),
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Resolve the request into `(chunk_index, text)` segments
    pub(crate) fn into_segments(self, chunker: &Chunker) -> Result<Vec<(usize, String)>> {
        if self.document_id.trim().is_empty() {
            return Err(RetrievalError::Validation(
                "document_id must not be empty".to_string(),
            ));
        }

        match self.source {
            IngestSource::RawText(text) => Ok(chunker
                .chunk_str(&text)
                .into_iter()
                .map(|chunk| (chunk.index, chunk.content))
                .collect()),
            IngestSource::Chunks(chunks) => {
                if let Some(empty) = chunks.iter().find(|c| c.text.trim().is_empty()) {
                    return Err(RetrievalError::Validation(format!(
                        "chunk {} of document '{}' is empty",
                        empty.chunk_index, self.document_id
                    )));
                }
                Ok(chunks.into_iter().map(|c| (c.chunk_index, c.text)).collect())
            }
        }
    }
}

/// Serializes writes per document id.
///
/// Entries are dropped once no task holds or waits on them.
#[derive(Default)]
pub(crate) struct DocumentLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    pub(crate) async fn acquire(&self, document_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(
                locks
                    .entry(document_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}
