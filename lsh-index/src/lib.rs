//! Approximate nearest-neighbour candidate generation.
//!
//! Vectors are reduced to random-hyperplane signatures and split into
//! bands; two vectors become candidates for each other when any band hashes
//! to the same bucket. The index only narrows the search. Final ordering is
//! always decided by exact distances from the durable store.
//!
//! ```text
//! vector ──> 256 sign bits ──> 32 bands x 8 bits ──> FNV-1a ──> bucket per band
//! ```

pub mod config;
pub mod error;
pub mod hasher;
pub mod index;

pub use config::LshConfig;
pub use error::{IndexError, Result};
pub use hasher::HyperplaneHasher;
pub use index::{ApproximateIndex, Candidate, CandidateSet, IndexKey, LshIndex};
