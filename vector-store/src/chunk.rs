use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, StoreError};

const GLOBAL_KEY: &str = "global";
const SESSION_PREFIX: &str = "session:";

/// Isolation boundary for chunks.
///
/// Global chunks are visible from every scope. Session chunks are visible
/// only from their own session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Session(String),
}

impl Scope {
    /// A session scope; the id must not be blank
    pub fn session(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "session id must not be empty".to_string(),
            ));
        }
        Ok(Scope::Session(id))
    }

    /// `None` maps to the global scope
    pub fn from_session(id: Option<String>) -> Result<Self> {
        match id {
            Some(id) => Self::session(id),
            None => Ok(Scope::Global),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Scope::Global)
    }

    /// Whether a query under `self` may see a chunk stored under `owner`
    pub fn can_see(&self, owner: &Scope) -> bool {
        owner.is_global() || owner == self
    }

    /// Stable key used in the scope manifest
    pub(crate) fn key(&self) -> String {
        match self {
            Scope::Global => GLOBAL_KEY.to_string(),
            Scope::Session(id) => format!("{SESSION_PREFIX}{id}"),
        }
    }

    pub(crate) fn global_key() -> &'static str {
        GLOBAL_KEY
    }

    pub(crate) fn from_key(key: &str) -> Result<Self> {
        if key == GLOBAL_KEY {
            return Ok(Scope::Global);
        }
        key.strip_prefix(SESSION_PREFIX)
            .filter(|id| !id.is_empty())
            .map(|id| Scope::Session(id.to_string()))
            .ok_or_else(|| StoreError::Corrupt(format!("unknown scope key '{key}'")))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Session(id) => write!(f, "session {id}"),
        }
    }
}

/// Store-assigned chunk identifier. Ids increase with insertion order and
/// are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub i64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chunk and its embedding, ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

impl NewChunk {
    pub fn new(
        document_id: impl Into<String>,
        chunk_index: usize,
        text: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            chunk_index,
            text: text.into(),
            vector,
        }
    }
}

/// A stored chunk without its vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: ChunkId,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub scope: Scope,
}
