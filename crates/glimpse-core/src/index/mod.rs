//! Nearest-neighbor index over corpus embeddings.
//!
//! The engine only talks to [`VectorIndex`]; [`CosineIndex`] is the bundled
//! implementation. Keys are matrix row indices.
//!
//! # Concurrency
//!
//! Every method takes `&self`. Inserts with distinct keys may run from many
//! threads at once (the bootstrap build does exactly that), and searches run
//! concurrently with each other. A duplicate key is rejected rather than
//! overwritten.

mod cosine;
pub mod persist;

pub use cosine::CosineIndex;

use crate::error::IndexError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Floor for the HNSW candidate list size.
///
/// Queries use `max(ef_search, k * 2)`, so larger result counts widen the
/// search automatically.
pub const MIN_EF_SEARCH: usize = 50;

/// A searchable set of `(key, vector)` pairs under the cosine metric.
pub trait VectorIndex: Send + Sync {
    /// Length every stored and queried vector must have.
    fn dimensions(&self) -> usize;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hints that about `additional` more vectors will be added.
    fn reserve(&self, additional: usize);

    /// Stores `vector` under `key`.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` for a wrong-length vector, `DuplicateKey` if `key`
    /// is already stored.
    fn add(&self, key: u64, vector: &[f32]) -> Result<(), IndexError>;

    /// Returns up to `k` `(key, similarity)` pairs, most similar first.
    ///
    /// Ties are broken by ascending key.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>, IndexError>;

    /// Replaces the contents with a persisted index.
    fn load(&self, path: &Path) -> Result<(), IndexError>;

    /// Persists the contents so [`VectorIndex::load`] can restore them.
    fn save(&self, path: &Path) -> Result<(), IndexError>;
}

/// Accuracy/speed trade-off for [`VectorIndex::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Score every stored vector
    Exact,
    /// Walk an HNSW graph with a candidate list of at least `ef_search`
    Approximate { ef_search: usize },
}

impl Default for SearchStrategy {
    fn default() -> Self {
        SearchStrategy::Approximate {
            ef_search: MIN_EF_SEARCH,
        }
    }
}

/// Options for building a [`CosineIndex`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub strategy: SearchStrategy,
}

impl IndexOptions {
    pub fn exact() -> Self {
        Self {
            strategy: SearchStrategy::Exact,
        }
    }

    pub fn approximate(ef_search: usize) -> Self {
        Self {
            strategy: SearchStrategy::Approximate { ef_search },
        }
    }
}

/// Rejects vectors whose length differs from `expected`.
pub(crate) fn validate_dimension(expected: usize, actual: usize) -> Result<(), IndexError> {
    if expected != actual {
        return Err(IndexError::DimensionMismatch { expected, actual });
    }
    Ok(())
}
