//! The searchable corpus: identifiers and their precomputed embeddings.
//!
//! Both halves load eagerly and synchronously and are read-only afterwards.
//! Row `i` of the [`EmbeddingMatrix`] embeds identifier `i` of the
//! [`CorpusCatalog`].

pub mod catalog;
pub mod matrix;

pub use catalog::{parse_identifiers, CatalogReport, CorpusCatalog};
pub use matrix::EmbeddingMatrix;

use crate::config::CorpusPaths;
use crate::error::CorpusLoadError;
use std::sync::Arc;
use tracing::warn;

/// Catalog and matrix, loaded together.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub catalog: Arc<CorpusCatalog>,
    pub matrix: Arc<EmbeddingMatrix>,
}

impl Corpus {
    /// Loads both artifacts from `paths`.
    pub fn load(paths: &CorpusPaths) -> Result<Self, CorpusLoadError> {
        let catalog = CorpusCatalog::load(&paths.names, &paths.images_dir)?;
        let matrix = EmbeddingMatrix::load(&paths.matrix)?;
        Ok(Self::new(catalog, matrix))
    }

    pub fn new(catalog: CorpusCatalog, matrix: EmbeddingMatrix) -> Self {
        if catalog.len() != matrix.rows() as usize {
            warn!(
                "Catalog lists {} identifiers but the matrix has {} rows; unmatched rows will be skipped",
                catalog.len(),
                matrix.rows()
            );
        }
        Self {
            catalog: Arc::new(catalog),
            matrix: Arc::new(matrix),
        }
    }
}
