//! # Glimpse Core
//!
//! Concurrent embedding search over a fixed corpus of pre-embedded assets.
//!
//! A corpus is a newline-separated list of asset names plus a row-major
//! matrix of their embeddings. The engine shows the catalog immediately,
//! loads the text encoder, image encoder and vector index concurrently in
//! the background, and answers text or image queries once everything is
//! ready. Newer queries supersede older ones on the same input channel.
//!
//! ## Modules
//!
//! - [`engine`] - UI-facing [`SearchEngine`] and its builder
//! - [`corpus`] - identifier catalog and embedding matrix loading
//! - [`index`] - vector index trait, cosine index, on-disk format
//! - [`embedding`] - encoder traits, query inputs, CLIP encoders (feature `clip`)
//! - [`loader`] - load-once resource loaders
//! - [`bootstrap`] - concurrent startup and readiness flags
//! - [`query`] - query pipeline, cancellation, single-flight, debounce
//! - [`similarity`] - cosine similarity and ranking helpers
//! - [`config`] - engine configuration and file layout
//! - [`error`] - error types

mod blocking;
pub mod bootstrap;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod loader;
pub mod query;
pub mod similarity;

#[cfg(test)]
mod test_utils;

pub use bootstrap::{Bootstrap, ReadinessSnapshot};
pub use config::{CorpusPaths, EngineConfig};
pub use corpus::{Corpus, CorpusCatalog, EmbeddingMatrix};
pub use embedding::{ImageEncoder, PixelBuffer, QueryChannel, QueryInput, TextEncoder};
pub use engine::{EngineBuilder, SearchEngine};
pub use error::{BootstrapError, CorpusLoadError, LoadError, QueryError};
pub use index::{CosineIndex, IndexOptions, SearchStrategy, VectorIndex};
pub use query::{QueryResults, SearchHit};
