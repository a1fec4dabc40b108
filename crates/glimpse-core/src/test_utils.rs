//! Test doubles for encoders and loaders.
//!
//! Only compiled when running tests.

use crate::embedding::{ImageEncoder, PixelBuffer, TextEncoder};
use crate::error::{EmbeddingError, LoadError};
use crate::loader::ResourceLoader;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Text encoder with canned vectors.
///
/// Unknown text embeds to the first basis vector. Every call is recorded.
pub struct MockTextEncoder {
    dim: usize,
    vectors: HashMap<String, Vec<f32>>,
    delay: Duration,
    failing: bool,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<String>>,
}

impl MockTextEncoder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: HashMap::new(),
            delay: Duration::ZERO,
            failing: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Sleeps (blocking) for `delay` inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextEncoder for MockTextEncoder {
    fn embedding_dim(&self) -> usize {
        self.dim
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(text.to_string());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.failing {
            return Err(EmbeddingError::InferenceFailed("mock failure".into()));
        }
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| basis(self.dim, 0)))
    }
}

/// Image encoder that returns the same vector for every image.
pub struct MockImageEncoder {
    vector: Vec<f32>,
    pub calls: AtomicUsize,
}

impl MockImageEncoder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            calls: AtomicUsize::new(0),
        }
    }
}

impl ImageEncoder for MockImageEncoder {
    fn embedding_dim(&self) -> usize {
        self.vector.len()
    }

    fn embed_image(&self, _image: &PixelBuffer) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector.clone())
    }
}

/// Loader that counts invocations and can be slowed down or made to fail.
pub struct CountingLoader<R: ?Sized> {
    outcome: Result<Arc<R>, LoadError>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl<R: ?Sized> CountingLoader<R> {
    pub fn new(resource: Arc<R>, delay: Duration) -> Self {
        Self {
            outcome: Ok(resource),
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: LoadError) -> Self {
        Self {
            outcome: Err(error),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: ?Sized + Send + Sync + 'static> ResourceLoader for CountingLoader<R> {
    type Resource = R;

    async fn load(&self) -> Result<Arc<R>, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone()
    }
}

/// Unit vector along axis `axis`.
pub fn basis(dim: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    if axis < dim {
        v[axis] = 1.0;
    }
    v
}
