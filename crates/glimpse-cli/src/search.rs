//! Command implementations.
//!
//! `search` bootstraps a full engine (corpus, both CLIP encoders, index) and
//! runs one query. `index` and `check` only need the corpus files.

use crate::config;
use anyhow::{anyhow, Context, Result};
use glimpse_core::corpus::{Corpus, EmbeddingMatrix};
use glimpse_core::loader::{IndexOrigin, PersistentIndexLoader};
use glimpse_core::{
    EngineBuilder, EngineConfig, IndexOptions, PixelBuffer, QueryInput, SearchHit, VectorIndex,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// What to search for.
pub enum Query {
    Text(String),
    Image(PathBuf),
}

impl Query {
    /// Label used in output headers.
    pub fn label(&self) -> String {
        match self {
            Query::Text(text) => text.clone(),
            Query::Image(path) => format!("image {}", path.display()),
        }
    }
}

/// Runs one query against the corpus in `data_dir`.
///
/// This function:
/// 1. Loads the corpus (identifier list and embedding matrix)
/// 2. Loads both CLIP encoders and the vector index concurrently
/// 3. Encodes the query and returns at most `limit` ranked hits
pub async fn execute_search(
    query: &Query,
    limit: usize,
    data_dir: &Path,
    model_dir: &Path,
    index: IndexOptions,
) -> Result<Vec<SearchHit>> {
    let paths = config::corpus_paths(data_dir)?;
    let files = config::model_files(model_dir)?;

    // Decode before paying for model loading
    let input = match query {
        Query::Text(text) => QueryInput::Text(text.clone()),
        Query::Image(path) => {
            let image = PixelBuffer::open(path)
                .map_err(|e| anyhow!("Failed to read query image: {}", e))?;
            QueryInput::Image(image)
        }
    };

    let engine_config = EngineConfig::new(paths)
        .with_result_limit(limit)
        .with_index_options(index);
    let engine = EngineBuilder::clip(engine_config, files)
        .build()
        .context("Failed to load corpus")?;

    let started = Instant::now();
    engine
        .wait_ready()
        .await
        .context("Failed to load search resources")?;
    info!("Engine ready in {:.2?}", started.elapsed());

    engine.query(input).await.context("Search failed")
}

/// Builds (or restores) the vector index and writes it next to the corpus.
pub async fn execute_index(data_dir: &Path, index: IndexOptions) -> Result<(usize, IndexOrigin)> {
    let paths = config::corpus_paths(data_dir)?;
    let matrix = EmbeddingMatrix::load(&paths.matrix).context("Failed to load embedding matrix")?;
    let index_path = paths
        .index
        .ok_or_else(|| anyhow!("No index file configured"))?;

    let started = Instant::now();
    let loader = PersistentIndexLoader::new(Arc::new(matrix), Some(index_path), index);
    let (index, origin) = loader
        .load_with_origin()
        .await
        .context("Failed to build index")?;
    info!("Index ready in {:.2?}", started.elapsed());

    Ok((index.len(), origin))
}

/// Loads the corpus for `glimpse check`.
pub fn load_corpus(data_dir: &Path) -> Result<Corpus> {
    let paths = config::corpus_paths(data_dir)?;
    Corpus::load(&paths).context("Failed to load corpus")
}
