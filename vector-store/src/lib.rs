//! # Sift Vector Store
//!
//! The durable source of truth for the retrieval engine: chunks, their
//! embedding vectors and the scope each one belongs to, kept in SQLite.
//!
//! ## Features
//!
//! - Transactional batch inserts with dimension checks
//! - Exact cosine nearest-neighbor search restricted to a scope
//! - Scope-checked rehydration of candidate ids from an approximate index
//! - Cascading document and session-scope deletion
//! - Tracking of which documents reached the approximate index
//!
//! ## Layout
//!
//! ```text
//! documents(document_id PK, scope_key, approximate_indexed)
//!     └── chunks(id PK AUTOINCREMENT, document_id FK, chunk_index, content, embedding BLOB)
//!             └── scope_manifest(scope_key, chunk_id FK)
//! store_meta(key, value)   -- embedding_dim
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use sift_vector_store::{NewChunk, Scope, VectorStore, VectorStoreConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sift_vector_store::StoreError> {
//!     let store = VectorStore::open(Path::new("data/vectors.db"), VectorStoreConfig::with_dimension(3)).await?;
//!     let scope = Scope::session("s-42")?;
//!     store
//!         .insert_batch(vec![NewChunk::new("doc", 0, "hello", vec![1.0, 0.0, 0.0])], &scope)
//!         .await?;
//!     let hits = store.exact_search(&[1.0, 0.0, 0.0], &scope, 5).await?;
//!     println!("nearest: {:?}", hits.first());
//!     Ok(())
//! }
//! ```

mod chunk;
mod distance;
mod error;
mod store;

pub use chunk::{ChunkId, ChunkRecord, NewChunk, Scope};
pub use distance::{Neighbor, cosine_distance, cosine_similarity, nearest};
pub use error::{Result, StoreError};
pub use store::{VectorStore, VectorStoreConfig};
