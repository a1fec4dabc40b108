//! Query inputs handed to the encoders.

use crate::error::EmbeddingError;
use std::fmt;
use std::sync::Arc;

/// Packed RGB8 image, row-major, three bytes per pixel.
///
/// Cloning shares the pixel storage.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl PixelBuffer {
    /// Wraps raw RGB8 bytes, checking `pixels.len() == width * height * 3`.
    pub fn new(
        width: u32,
        height: u32,
        pixels: impl Into<Arc<[u8]>>,
    ) -> Result<Self, EmbeddingError> {
        let pixels = pixels.into();
        let expected = width as u64 * height as u64 * 3;
        if pixels.len() as u64 != expected {
            return Err(EmbeddingError::InvalidInput(format!(
                "{}x{} RGB image needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A zero-sized buffer. Image queries with it return no results.
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            pixels: Arc::from(Vec::new()),
        }
    }

    /// Decodes an image file (JPEG or PNG) into RGB8.
    #[cfg(feature = "clip")]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, EmbeddingError> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| {
            EmbeddingError::InvalidInput(format!("Failed to decode {}: {}", path.display(), e))
        })?;
        Ok(Self::from_rgb_image(image.to_rgb8()))
    }

    #[cfg(feature = "clip")]
    pub fn from_rgb_image(image: image::RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: Arc::from(image.into_raw()),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// Which single-flight slot a query occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryChannel {
    Text,
    Image,
}

/// A search request.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput {
    Text(String),
    Image(PixelBuffer),
}

impl QueryInput {
    pub fn channel(&self) -> QueryChannel {
        match self {
            QueryInput::Text(_) => QueryChannel::Text,
            QueryInput::Image(_) => QueryChannel::Image,
        }
    }
}

impl From<&str> for QueryInput {
    fn from(text: &str) -> Self {
        QueryInput::Text(text.to_string())
    }
}

impl From<String> for QueryInput {
    fn from(text: String) -> Self {
        QueryInput::Text(text)
    }
}

impl From<PixelBuffer> for QueryInput {
    fn from(image: PixelBuffer) -> Self {
        QueryInput::Image(image)
    }
}
