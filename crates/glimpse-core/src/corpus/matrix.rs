//! Embedding matrix loading.
//!
//! The matrix file has a fixed eight-byte header and no version field:
//!
//! ```text
//! offset 0   u32 LE   rows
//! offset 4   u32 LE   columns
//! offset 8   f32 LE   rows * columns values, row-major
//! ```
//!
//! The file length must be exactly `8 + rows * columns * 4`. The header is
//! validated against the actual length before any body byte is interpreted.

use crate::error::CorpusLoadError;
use std::path::Path;
use tracing::{info, instrument};

/// Size of the `rows | columns` header in bytes.
const HEADER_LEN: usize = 8;

/// Size of one `f32` value in bytes.
const VALUE_LEN: u64 = 4;

/// Row-major matrix of precomputed embeddings, one row per corpus item.
///
/// Immutable after construction; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    rows: u32,
    columns: u32,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Builds a matrix from its parts, enforcing `data.len() == rows * columns`.
    pub fn from_parts(rows: u32, columns: u32, data: Vec<f32>) -> Result<Self, CorpusLoadError> {
        let expected = rows as u64 * columns as u64;
        if data.len() as u64 != expected {
            return Err(CorpusLoadError::Malformed {
                path: "<memory>".into(),
                reason: format!(
                    "{}x{} matrix needs {} values, got {}",
                    rows,
                    columns,
                    expected,
                    data.len()
                ),
            });
        }
        Ok(Self {
            rows,
            columns,
            data,
        })
    }

    /// Reads and decodes a matrix file.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CorpusLoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| CorpusLoadError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let matrix = Self::from_bytes(&bytes, path)?;
        info!("Loaded a {} x {} matrix", matrix.rows, matrix.columns);
        Ok(matrix)
    }

    /// Decodes a matrix from raw file bytes.
    ///
    /// `origin` is only used to label errors.
    pub fn from_bytes(bytes: &[u8], origin: &Path) -> Result<Self, CorpusLoadError> {
        let actual = bytes.len() as u64;

        if bytes.len() < HEADER_LEN {
            return Err(CorpusLoadError::Truncated {
                path: origin.to_path_buf(),
                rows: 0,
                columns: 0,
                expected: HEADER_LEN as u64,
                actual,
            });
        }

        let rows = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let columns = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        let expected = (rows as u64)
            .checked_mul(columns as u64)
            .and_then(|values| values.checked_mul(VALUE_LEN))
            .and_then(|body| body.checked_add(HEADER_LEN as u64))
            .ok_or_else(|| CorpusLoadError::Malformed {
                path: origin.to_path_buf(),
                reason: format!("{}x{} matrix size overflows", rows, columns),
            })?;

        if actual < expected {
            return Err(CorpusLoadError::Truncated {
                path: origin.to_path_buf(),
                rows,
                columns,
                expected,
                actual,
            });
        }
        if actual > expected {
            return Err(CorpusLoadError::TrailingBytes {
                path: origin.to_path_buf(),
                rows,
                columns,
                expected,
                actual,
            });
        }

        // Length is now proven to be HEADER_LEN + rows * columns * 4
        let data = bytes[HEADER_LEN..]
            .chunks_exact(VALUE_LEN as usize)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self {
            rows,
            columns,
            data,
        })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    /// Embedding dimension as a `usize`.
    pub fn dimensions(&self) -> usize {
        self.columns as usize
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Returns row `index`, or `None` when out of range.
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows as usize {
            return None;
        }
        let start = index * self.columns as usize;
        self.data.get(start..start + self.columns as usize)
    }

    /// Iterates rows in order.
    pub fn rows_iter(&self) -> impl ExactSizeIterator<Item = &[f32]> + '_ {
        let width = self.columns as usize;
        (0..self.rows as usize).map(move |i| &self.data[i * width..(i + 1) * width])
    }

    /// Flat row-major view of every value.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
pub(crate) fn encode_matrix(rows: u32, columns: u32, values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + values.len() * 4);
    bytes.extend_from_slice(&rows.to_le_bytes());
    bytes.extend_from_slice(&columns.to_le_bytes());
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}
