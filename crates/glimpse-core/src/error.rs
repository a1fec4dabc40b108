//! Error types for glimpse-core.
//!
//! Errors are grouped by the stage that produces them:
//!
//! - [`CorpusLoadError`] - matrix or identifier files missing, truncated or malformed
//! - [`LoadError`] - an encoder or the vector index failed to initialize
//! - [`BootstrapError`] - outcome of the single bootstrap attempt
//! - [`EmbeddingError`] - an encoder failed to embed an input
//! - [`IndexError`] - vector index operations and persisted index files
//! - [`QueryError`] - a query could not be answered

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading the corpus (identifier list and embedding matrix).
///
/// These are fatal to bootstrap: without a corpus there is nothing to search.
#[derive(Debug, Clone, Error)]
pub enum CorpusLoadError {
    /// The file could not be opened or read
    #[error("Failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },
    /// The file holds fewer bytes than its header declares
    #[error(
        "Matrix file {path} is truncated: header declares {rows}x{columns} ({expected} bytes), found {actual} bytes"
    )]
    Truncated {
        path: PathBuf,
        rows: u32,
        columns: u32,
        expected: u64,
        actual: u64,
    },
    /// The file holds more bytes than its header declares
    #[error(
        "Matrix file {path} has trailing data: header declares {rows}x{columns} ({expected} bytes), found {actual} bytes"
    )]
    TrailingBytes {
        path: PathBuf,
        rows: u32,
        columns: u32,
        expected: u64,
        actual: u64,
    },
    /// Structurally invalid content (e.g. a header whose size overflows)
    #[error("Malformed corpus file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Which encoder a [`LoadError::Encoder`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderKind {
    Text,
    Image,
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderKind::Text => f.write_str("text"),
            EncoderKind::Image => f.write_str("image"),
        }
    }
}

/// Errors raised by resource loaders.
///
/// Any of these keeps the engine out of the ready-to-search state for the
/// rest of the session.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// An encoder could not be constructed
    #[error("Failed to load {kind} encoder: {reason}")]
    Encoder { kind: EncoderKind, reason: String },
    /// The vector index could not be restored or built
    #[error("Failed to load vector index: {0}")]
    Index(String),
}

impl LoadError {
    pub fn text(reason: impl Into<String>) -> Self {
        LoadError::Encoder {
            kind: EncoderKind::Text,
            reason: reason.into(),
        }
    }

    pub fn image(reason: impl Into<String>) -> Self {
        LoadError::Encoder {
            kind: EncoderKind::Image,
            reason: reason.into(),
        }
    }
}

impl From<String> for LoadError {
    fn from(s: String) -> Self {
        LoadError::Index(s)
    }
}

/// Outcome of a failed bootstrap attempt.
#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
    /// One or more resource loaders failed
    #[error("{} resource loader(s) failed: {}", .0.len(), join_errors(.0))]
    Load(Vec<LoadError>),
    /// The bootstrap task itself panicked or was aborted
    #[error("Bootstrap task failed: {0}")]
    TaskFailed(String),
}

fn join_errors(errors: &[LoadError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur while embedding a query.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    /// Failed to load model weights
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    /// Failed to create an input tensor
    #[error("Failed to create tensor: {0}")]
    TensorCreation(String),
    /// Forward pass through the model failed
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    /// Failed to tokenize text
    #[error("Tokenization failed: {0}")]
    TokenizationFailed(String),
    /// The input cannot be embedded (e.g. malformed pixel buffer)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<String> for EmbeddingError {
    fn from(s: String) -> Self {
        EmbeddingError::InferenceFailed(s)
    }
}

/// Errors raised by vector index operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndexError {
    /// Vector length differs from the index dimensions
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// A vector was already stored under this key
    #[error("Key {0} is already present in the index")]
    DuplicateKey(u64),
    /// Reading or writing the persisted index failed
    #[error("Index I/O error: {0}")]
    Io(String),
    /// The persisted index file is not a valid index
    #[error("Invalid index file: {0}")]
    InvalidFormat(String),
    /// A background task used by the index failed
    #[error("Index task failed: {0}")]
    TaskFailed(String),
}

impl From<String> for IndexError {
    fn from(s: String) -> Self {
        IndexError::TaskFailed(s)
    }
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        IndexError::Io(err.to_string())
    }
}

/// Errors that can occur while answering a query.
///
/// The query pipeline recovers from `Encoding` and `Search` locally by
/// returning an empty result; `Cancelled` is dropped silently.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The query could not be embedded
    #[error("Failed to encode query: {0}")]
    Encoding(#[from] EmbeddingError),
    /// The index search failed
    #[error("Index search failed: {0}")]
    Search(#[from] IndexError),
    /// Search resources were not published
    #[error("Search resources are not loaded")]
    NotReady,
    /// A newer query superseded this one
    #[error("Query was superseded")]
    Cancelled,
}
