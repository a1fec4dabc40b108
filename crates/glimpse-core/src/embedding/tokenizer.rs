//! Tokenization for the CLIP text tower.

use crate::error::EmbeddingError;
use std::path::Path;
use tokenizers::tokenizer::{Tokenizer, TruncationDirection, TruncationParams, TruncationStrategy};

/// Handle for a tokenizer with truncation configured.
pub struct TokenizerHandle {
    tokenizer: Tokenizer,
    max_length: usize,
}

impl TokenizerHandle {
    /// Reads a `tokenizer.json` and truncates encodings to `max_length` tokens.
    pub fn from_file(path: &Path, max_length: usize) -> Result<Self, EmbeddingError> {
        let bytes = std::fs::read(path).map_err(|e| {
            EmbeddingError::ModelLoad(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_bytes(bytes, max_length)
    }

    /// Creates a tokenizer from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `EmbeddingError::ModelLoad` if the JSON is not a tokenizer or
    /// truncation cannot be configured.
    pub fn from_bytes(tokenizer_bytes: Vec<u8>, max_length: usize) -> Result<Self, EmbeddingError> {
        let mut tokenizer = Tokenizer::from_bytes(tokenizer_bytes).map_err(|e| {
            EmbeddingError::ModelLoad(format!("Failed to deserialize tokenizer: {}", e))
        })?;

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                stride: 0,
                strategy: TruncationStrategy::OnlyFirst,
                direction: TruncationDirection::Right,
            }))
            .map_err(|e| {
                EmbeddingError::ModelLoad(format!(
                    "Failed to configure tokenizer truncation: {}",
                    e
                ))
            })?;

        Ok(Self {
            tokenizer,
            max_length,
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Tokenizes text into ids, including the start and end markers.
    pub fn tokenize(&self, text: &str) -> Result<Vec<u32>, EmbeddingError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::TokenizationFailed(format!("Encoding failed: {}", e)))?;

        let ids = encoding.get_ids();
        if ids.is_empty() {
            return Err(EmbeddingError::TokenizationFailed(
                "Tokenizer returned no tokens".to_string(),
            ));
        }

        Ok(ids.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_tokenizer_bytes() {
        let result = TokenizerHandle::from_bytes(b"not json".to_vec(), 77);
        assert!(matches!(result, Err(EmbeddingError::ModelLoad(_))));
    }

    #[test]
    fn test_missing_tokenizer_file() {
        let result = TokenizerHandle::from_file(Path::new("/nonexistent/tokenizer.json"), 77);
        assert!(matches!(result, Err(EmbeddingError::ModelLoad(_))));
    }
}
