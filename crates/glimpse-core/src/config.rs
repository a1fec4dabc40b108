//! Engine configuration.
//!
//! Named constants define the production defaults; [`EngineConfig`] bundles
//! the per-corpus paths with the tunables a frontend may override.
//!
//! # Usage
//!
//! ```
//! use glimpse_core::config::{CorpusPaths, EngineConfig, RESULT_LIMIT};
//!
//! let config = EngineConfig::new(CorpusPaths::in_dir("/data/corpus"));
//! assert_eq!(config.result_limit, RESULT_LIMIT);
//! assert!(config.paths.matrix.ends_with("images.fbin"));
//! ```

use crate::index::IndexOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Query Pipeline
// =============================================================================

/// Maximum number of ranked results returned for a query.
pub const RESULT_LIMIT: usize = 100;

/// Quiet period after the last keystroke before a text query runs.
pub const TEXT_DEBOUNCE: Duration = Duration::from_millis(100);

// =============================================================================
// Corpus Layout
// =============================================================================

/// Suffix appended to every identifier in the names file to form its asset file name.
pub const IDENTIFIER_SUFFIX: &str = ".jpg";

/// Newline-delimited identifier list.
pub const NAMES_FILENAME: &str = "images.names.txt";

/// Flat directory holding one asset per identifier.
pub const IMAGES_DIRNAME: &str = "images";

/// Precomputed embedding matrix (`u32 rows | u32 columns | f32[rows*columns]`).
pub const MATRIX_FILENAME: &str = "images.fbin";

/// Persisted vector index, written after the first build.
pub const INDEX_FILENAME: &str = "images.index";

/// Locations of the corpus artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusPaths {
    /// Identifier list
    pub names: PathBuf,
    /// Asset directory used for the cross-check diagnostic
    pub images_dir: PathBuf,
    /// Embedding matrix
    pub matrix: PathBuf,
    /// Persisted index; `None` disables persistence
    pub index: Option<PathBuf>,
}

impl CorpusPaths {
    /// Standard layout rooted at `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            names: dir.join(NAMES_FILENAME),
            images_dir: dir.join(IMAGES_DIRNAME),
            matrix: dir.join(MATRIX_FILENAME),
            index: Some(dir.join(INDEX_FILENAME)),
        }
    }

    /// Disables index persistence (always build in memory).
    pub fn without_index_file(mut self) -> Self {
        self.index = None;
        self
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub paths: CorpusPaths,
    /// Result cap for ranked queries
    pub result_limit: usize,
    /// Debounce window applied to text submissions
    pub text_debounce: Duration,
    /// Index strategy and build options
    pub index: IndexOptions,
}

impl EngineConfig {
    pub fn new(paths: CorpusPaths) -> Self {
        Self {
            paths,
            result_limit: RESULT_LIMIT,
            text_debounce: TEXT_DEBOUNCE,
            index: IndexOptions::default(),
        }
    }

    pub fn with_result_limit(mut self, limit: usize) -> Self {
        self.result_limit = limit;
        self
    }

    pub fn with_text_debounce(mut self, window: Duration) -> Self {
        self.text_debounce = window;
        self
    }

    pub fn with_index_options(mut self, options: IndexOptions) -> Self {
        self.index = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_layout() {
        let paths = CorpusPaths::in_dir("/corpus");
        assert_eq!(paths.names, PathBuf::from("/corpus/images.names.txt"));
        assert_eq!(paths.images_dir, PathBuf::from("/corpus/images"));
        assert_eq!(paths.matrix, PathBuf::from("/corpus/images.fbin"));
        assert_eq!(paths.index, Some(PathBuf::from("/corpus/images.index")));
        assert!(paths.without_index_file().index.is_none());
    }

    #[test]
    fn test_debounce_window_is_short() {
        // Long enough to swallow a typing burst, short enough to feel instant
        let window = TEXT_DEBOUNCE;
        assert!(window >= Duration::from_millis(50));
        assert!(window <= Duration::from_millis(300));
    }
}
