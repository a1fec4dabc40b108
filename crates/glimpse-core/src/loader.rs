//! Resource loaders.
//!
//! The engine needs three slow resources before it can search: a text
//! encoder, an image encoder and a vector index. Each comes from a
//! [`ResourceLoader`], and [`LoadOnce`] guarantees a loader runs to success at
//! most once no matter how many tasks ask for it.

use crate::blocking::run_blocking;
use crate::corpus::EmbeddingMatrix;
use crate::embedding::{ImageEncoder, TextEncoder};
use crate::error::LoadError;
use crate::index::{CosineIndex, IndexOptions, VectorIndex};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

/// An asynchronous, failable constructor for a shared resource.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    type Resource: ?Sized + Send + Sync + 'static;

    async fn load(&self) -> Result<Arc<Self::Resource>, LoadError>;
}

/// Loader producing a text encoder.
pub type TextEncoderLoader = dyn ResourceLoader<Resource = dyn TextEncoder>;

/// Loader producing an image encoder.
pub type ImageEncoderLoader = dyn ResourceLoader<Resource = dyn ImageEncoder>;

/// Loader producing a vector index.
pub type IndexLoader = dyn ResourceLoader<Resource = dyn VectorIndex>;

/// Caches the first successful load of a loader.
///
/// Concurrent callers await the same initialization. A failed load is not
/// cached, so a later call tries again.
pub struct LoadOnce<R: ?Sized + Send + Sync + 'static> {
    loader: Arc<dyn ResourceLoader<Resource = R>>,
    cell: OnceCell<Arc<R>>,
}

impl<R: ?Sized + Send + Sync + 'static> LoadOnce<R> {
    pub fn new(loader: Arc<dyn ResourceLoader<Resource = R>>) -> Self {
        Self {
            loader,
            cell: OnceCell::new(),
        }
    }

    /// Returns the resource, loading it first if needed.
    pub async fn get(&self) -> Result<Arc<R>, LoadError> {
        self.cell
            .get_or_try_init(|| self.loader.load())
            .await
            .map(Arc::clone)
    }

    /// The resource, if a load already succeeded.
    pub fn loaded(&self) -> Option<Arc<R>> {
        self.cell.get().cloned()
    }
}

/// Hands out a resource that already exists.
pub struct Ready<R: ?Sized>(Arc<R>);

impl<R: ?Sized> Ready<R> {
    pub fn new(resource: Arc<R>) -> Self {
        Self(resource)
    }
}

#[async_trait]
impl<R: ?Sized + Send + Sync + 'static> ResourceLoader for Ready<R> {
    type Resource = R;

    async fn load(&self) -> Result<Arc<R>, LoadError> {
        Ok(Arc::clone(&self.0))
    }
}

/// How [`PersistentIndexLoader`] obtained its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    /// Read back from the persisted file
    Restored,
    /// Built from the embedding matrix
    Built,
}

/// Vector index loader with a persistence-first policy.
///
/// If the index file exists and matches the matrix (same dimensions, one
/// entry per row) it is restored. Otherwise every matrix row is inserted in
/// parallel, and the fresh index is written to the file for the next run.
pub struct PersistentIndexLoader {
    matrix: Arc<EmbeddingMatrix>,
    path: Option<PathBuf>,
    options: IndexOptions,
}

impl PersistentIndexLoader {
    /// `path = None` always builds and never writes.
    pub fn new(matrix: Arc<EmbeddingMatrix>, path: Option<PathBuf>, options: IndexOptions) -> Self {
        Self {
            matrix,
            path,
            options,
        }
    }

    /// Loads the index and reports where it came from.
    #[instrument(skip_all, fields(path = ?self.path))]
    pub async fn load_with_origin(&self) -> Result<(Arc<CosineIndex>, IndexOrigin), LoadError> {
        let matrix = Arc::clone(&self.matrix);
        let path = self.path.clone();
        let options = self.options;

        let (index, origin) =
            run_blocking(move || restore_or_build(&matrix, path, options).map_err(LoadError::Index))
                .await?;
        Ok((Arc::new(index), origin))
    }
}

fn restore_or_build(
    matrix: &EmbeddingMatrix,
    path: Option<PathBuf>,
    options: IndexOptions,
) -> Result<(CosineIndex, IndexOrigin), String> {
    if let Some(path) = path.as_deref().filter(|p| p.exists()) {
        match CosineIndex::open(path, options) {
            Ok(index) if matches_matrix(&index, matrix) => {
                info!("Restored index with {} vectors", index.len());
                index.seal();
                return Ok((index, IndexOrigin::Restored));
            }
            Ok(index) => warn!(
                "Index file ({} vectors of {} dimensions) does not match the {} x {} matrix; rebuilding",
                index.len(),
                index.dimensions(),
                matrix.rows(),
                matrix.columns()
            ),
            Err(e) => warn!("Index file {} is unusable ({}); rebuilding", path.display(), e),
        }
    }

    let index = CosineIndex::from_matrix(matrix, options).map_err(|e| e.to_string())?;

    if let Some(path) = path.as_deref() {
        match index.save(path) {
            Ok(()) => info!("Saved index to {}", path.display()),
            Err(e) => warn!("Failed to save index to {}: {}", path.display(), e),
        }
    }

    index.seal();
    Ok((index, IndexOrigin::Built))
}

/// Same shape and every row bitwise equal to the stored vector.
fn matches_matrix(index: &CosineIndex, matrix: &EmbeddingMatrix) -> bool {
    let rows = matrix.rows() as usize;
    index.dimensions() == matrix.dimensions()
        && index.len() == rows
        && (0..rows).all(|row| {
            matrix
                .row(row)
                .is_some_and(|vector| index.stores(row as u64, vector))
        })
}

#[async_trait]
impl ResourceLoader for PersistentIndexLoader {
    type Resource = dyn VectorIndex;

    async fn load(&self) -> Result<Arc<dyn VectorIndex>, LoadError> {
        let (index, _) = self.load_with_origin().await?;
        Ok(index)
    }
}

#[cfg(feature = "clip")]
pub use self::clip::{ClipImageLoader, ClipTextLoader};

#[cfg(feature = "clip")]
mod clip {
    use super::*;
    use crate::embedding::{ClipImageEncoder, ClipModelFiles, ClipTextEncoder};

    /// Loads the CLIP text tower on the blocking pool.
    pub struct ClipTextLoader {
        files: ClipModelFiles,
    }

    impl ClipTextLoader {
        pub fn new(files: ClipModelFiles) -> Self {
            Self { files }
        }
    }

    #[async_trait]
    impl ResourceLoader for ClipTextLoader {
        type Resource = dyn TextEncoder;

        async fn load(&self) -> Result<Arc<dyn TextEncoder>, LoadError> {
            let files = self.files.clone();
            let encoder = run_blocking(move || ClipTextEncoder::load(&files))
                .await
                .map_err(|e| LoadError::text(e.to_string()))?;
            Ok(Arc::new(encoder))
        }
    }

    /// Loads the CLIP vision tower on the blocking pool.
    pub struct ClipImageLoader {
        files: ClipModelFiles,
    }

    impl ClipImageLoader {
        pub fn new(files: ClipModelFiles) -> Self {
            Self { files }
        }
    }

    #[async_trait]
    impl ResourceLoader for ClipImageLoader {
        type Resource = dyn ImageEncoder;

        async fn load(&self) -> Result<Arc<dyn ImageEncoder>, LoadError> {
            let files = self.files.clone();
            let encoder = run_blocking(move || ClipImageEncoder::load(&files))
                .await
                .map_err(|e| LoadError::image(e.to_string()))?;
            Ok(Arc::new(encoder))
        }
    }
}
