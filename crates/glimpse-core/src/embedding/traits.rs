//! Encoder capabilities.
//!
//! An encoder maps a query into the corpus embedding space. Both traits are
//! synchronous: invocation is slow CPU/GPU work, and callers move it onto the
//! blocking pool themselves.

use super::types::PixelBuffer;
use crate::error::EmbeddingError;

/// Maps text into the embedding space.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one encoder instance serves every
/// concurrent query.
pub trait TextEncoder: Send + Sync {
    /// Length of every vector this encoder returns.
    fn embedding_dim(&self) -> usize;

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Maps an RGB image into the embedding space.
pub trait ImageEncoder: Send + Sync {
    /// Length of every vector this encoder returns.
    fn embedding_dim(&self) -> usize;

    fn embed_image(&self, image: &PixelBuffer) -> Result<Vec<f32>, EmbeddingError>;
}
