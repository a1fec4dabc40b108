//! CLIP text and image encoders on candle.
//!
//! Both towers come from the same `model.safetensors` checkpoint (the
//! `openai/clip-vit-base-patch32` layout). Each encoder loads the checkpoint
//! independently so the two can be constructed concurrently.

use super::tokenizer::TokenizerHandle;
use super::traits::{ImageEncoder, TextEncoder};
use super::types::PixelBuffer;
use crate::error::EmbeddingError;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Weights file name inside a model directory.
pub const WEIGHTS_FILENAME: &str = "model.safetensors";

/// Tokenizer file name inside a model directory.
pub const TOKENIZER_FILENAME: &str = "tokenizer.json";

/// Location of the CLIP checkpoint and tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipModelFiles {
    pub weights: PathBuf,
    pub tokenizer: PathBuf,
}

impl ClipModelFiles {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            weights: dir.join(WEIGHTS_FILENAME),
            tokenizer: dir.join(TOKENIZER_FILENAME),
        }
    }
}

/// Selects the best available compute device: CUDA, then Metal, then CPU.
pub fn select_device() -> Device {
    if let Ok(device) = Device::new_cuda(0) {
        info!("Using CUDA GPU");
        return device;
    }
    if let Ok(device) = Device::new_metal(0) {
        info!("Using Metal GPU");
        return device;
    }
    info!("Using CPU");
    Device::Cpu
}

fn load_model(
    weights: &Path,
    config: &ClipConfig,
    device: &Device,
) -> Result<ClipModel, EmbeddingError> {
    let bytes = std::fs::read(weights).map_err(|e| {
        EmbeddingError::ModelLoad(format!("Failed to read {}: {}", weights.display(), e))
    })?;
    info!(
        "Model bytes length: {} bytes ({:.2}MB)",
        bytes.len(),
        bytes.len() as f64 / 1_000_000.0
    );

    let vb = VarBuilder::from_buffered_safetensors(bytes, DType::F32, device).map_err(|e| {
        EmbeddingError::ModelLoad(format!("Failed to create VarBuilder: {}", e))
    })?;

    ClipModel::new(vb, config)
        .map_err(|e| EmbeddingError::ModelLoad(format!("Failed to create ClipModel: {}", e)))
}

/// Turns a `[1, dim]` feature tensor into a unit-length vector.
fn into_unit_vector(features: Tensor) -> Result<Vec<f32>, EmbeddingError> {
    let mut v = features
        .squeeze(0)
        .map_err(|e| EmbeddingError::InferenceFailed(format!("Failed to squeeze: {}", e)))?
        .to_vec1::<f32>()
        .map_err(|e| EmbeddingError::InferenceFailed(format!("Failed to convert to vec: {}", e)))?;

    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    Ok(v)
}

/// CLIP text tower.
pub struct ClipTextEncoder {
    model: ClipModel,
    tokenizer: TokenizerHandle,
    device: Device,
    dim: usize,
}

impl ClipTextEncoder {
    #[instrument(skip_all, fields(weights = %files.weights.display()))]
    pub fn load(files: &ClipModelFiles) -> Result<Self, EmbeddingError> {
        let config = ClipConfig::vit_base_patch32();
        let tokenizer =
            TokenizerHandle::from_file(&files.tokenizer, config.text_config.max_position_embeddings)?;
        let device = select_device();
        let model = load_model(&files.weights, &config, &device)?;
        info!("CLIP text encoder ready");

        Ok(Self {
            model,
            tokenizer,
            device,
            dim: config.text_config.projection_dim,
        })
    }
}

impl TextEncoder for ClipTextEncoder {
    fn embedding_dim(&self) -> usize {
        self.dim
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let ids = self.tokenizer.tokenize(text)?;
        let input_ids = Tensor::from_vec(ids.clone(), ids.len(), &self.device)
            .map_err(|e| EmbeddingError::TensorCreation(format!("Failed to create tensor: {}", e)))?
            .unsqueeze(0)
            .map_err(|e| EmbeddingError::TensorCreation(format!("Failed to unsqueeze: {}", e)))?;

        let features = self
            .model
            .get_text_features(&input_ids)
            .map_err(|e| EmbeddingError::InferenceFailed(format!("Forward pass failed: {}", e)))?;

        into_unit_vector(features)
    }
}

/// CLIP vision tower.
pub struct ClipImageEncoder {
    model: ClipModel,
    device: Device,
    image_size: usize,
    dim: usize,
}

impl ClipImageEncoder {
    #[instrument(skip_all, fields(weights = %files.weights.display()))]
    pub fn load(files: &ClipModelFiles) -> Result<Self, EmbeddingError> {
        let config = ClipConfig::vit_base_patch32();
        let device = select_device();
        let model = load_model(&files.weights, &config, &device)?;
        info!("CLIP image encoder ready");

        Ok(Self {
            model,
            device,
            image_size: config.image_size,
            dim: config.text_config.projection_dim,
        })
    }

    /// Resizes to the model's square input and scales channels to `[-1, 1]`.
    fn preprocess(&self, image: &PixelBuffer) -> Result<Tensor, EmbeddingError> {
        let rgb = RgbImage::from_raw(image.width(), image.height(), image.pixels().to_vec())
            .ok_or_else(|| EmbeddingError::InvalidInput("pixel buffer size mismatch".into()))?;
        let side = self.image_size as u32;
        let resized = DynamicImage::ImageRgb8(rgb)
            .resize_to_fill(side, side, FilterType::Triangle)
            .to_rgb8();

        Tensor::from_vec(
            resized.into_raw(),
            (self.image_size, self.image_size, 3),
            &self.device,
        )
        .and_then(|t| t.permute((2, 0, 1)))
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.affine(2.0 / 255.0, -1.0))
        .and_then(|t| t.unsqueeze(0))
        .map_err(|e| EmbeddingError::TensorCreation(format!("Failed to build pixel tensor: {}", e)))
    }
}

impl ImageEncoder for ClipImageEncoder {
    fn embedding_dim(&self) -> usize {
        self.dim
    }

    fn embed_image(&self, image: &PixelBuffer) -> Result<Vec<f32>, EmbeddingError> {
        if image.is_empty() {
            return Err(EmbeddingError::InvalidInput("empty image".into()));
        }

        let pixel_values = self.preprocess(image)?;
        let features = self
            .model
            .get_image_features(&pixel_values)
            .map_err(|e| EmbeddingError::InferenceFailed(format!("Forward pass failed: {}", e)))?;

        into_unit_vector(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_model_files_layout() {
        let files = ClipModelFiles::in_dir("/models/clip");
        assert_eq!(files.weights, PathBuf::from("/models/clip/model.safetensors"));
        assert_eq!(files.tokenizer, PathBuf::from("/models/clip/tokenizer.json"));
    }

    #[test]
    fn test_load_fails_on_garbage_weights() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(WEIGHTS_FILENAME), b"garbage").unwrap();

        let result = ClipImageEncoder::load(&ClipModelFiles::in_dir(dir.path()));
        assert!(matches!(result, Err(EmbeddingError::ModelLoad(_))));
    }

    #[test]
    fn test_unit_vector() {
        let t = Tensor::new(&[[3.0f32, 4.0]], &Device::Cpu).unwrap();
        let v = into_unit_vector(t).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }
}
