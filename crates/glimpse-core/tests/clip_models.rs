//! CLIP encoder tests against real model files.
//!
//! **Note**: These tests need `model.safetensors` and `tokenizer.json`
//! (openai/clip-vit-base-patch32) in `$GLIMPSE_MODEL_DIR`, so they are
//! ignored by default.
//! Run with: `GLIMPSE_MODEL_DIR=... cargo test -p glimpse-core --features clip --test clip_models -- --ignored`
#![cfg(feature = "clip")]

use glimpse_core::embedding::{ClipImageEncoder, ClipModelFiles, ClipTextEncoder};
use glimpse_core::similarity::cosine_similarity;
use glimpse_core::{ImageEncoder, PixelBuffer, TextEncoder};
use std::sync::{Arc, OnceLock};

// Model load is the slow part; every test shares one instance per tower.
static TEXT: OnceLock<Arc<ClipTextEncoder>> = OnceLock::new();
static IMAGE: OnceLock<Arc<ClipImageEncoder>> = OnceLock::new();

fn model_files() -> ClipModelFiles {
    let dir = std::env::var("GLIMPSE_MODEL_DIR")
        .expect("GLIMPSE_MODEL_DIR must point at a CLIP model directory");
    ClipModelFiles::in_dir(dir)
}

fn text_encoder() -> Arc<ClipTextEncoder> {
    TEXT.get_or_init(|| {
        Arc::new(ClipTextEncoder::load(&model_files()).expect("Failed to load CLIP text encoder"))
    })
    .clone()
}

fn image_encoder() -> Arc<ClipImageEncoder> {
    IMAGE
        .get_or_init(|| {
            Arc::new(
                ClipImageEncoder::load(&model_files()).expect("Failed to load CLIP image encoder"),
            )
        })
        .clone()
}

fn solid(rgb: [u8; 3]) -> PixelBuffer {
    let pixels: Vec<u8> = std::iter::repeat(rgb).take(64 * 64).flatten().collect();
    PixelBuffer::new(64, 64, pixels).unwrap()
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[test]
#[ignore = "requires CLIP model files in $GLIMPSE_MODEL_DIR"]
fn test_text_embedding_is_unit_length() {
    let encoder = text_encoder();
    let v = encoder.embed_text("a photo of a dog").unwrap();
    assert_eq!(v.len(), encoder.embedding_dim());
    assert!((norm(&v) - 1.0).abs() < 1e-3);
}

#[test]
#[ignore = "requires CLIP model files in $GLIMPSE_MODEL_DIR"]
fn test_text_embedding_is_deterministic() {
    let encoder = text_encoder();
    let a = encoder.embed_text("a red car").unwrap();
    let b = encoder.embed_text("a red car").unwrap();
    assert!(cosine_similarity(&a, &b) > 0.9999);
}

#[test]
#[ignore = "requires CLIP model files in $GLIMPSE_MODEL_DIR"]
fn test_long_text_is_truncated() {
    let encoder = text_encoder();
    let long = "dog ".repeat(500);
    assert!(encoder.embed_text(&long).is_ok());
}

#[test]
#[ignore = "requires CLIP model files in $GLIMPSE_MODEL_DIR"]
fn test_image_embedding_shares_text_space() {
    let text = text_encoder();
    let image = image_encoder();
    assert_eq!(text.embedding_dim(), image.embedding_dim());

    let red = image.embed_image(&solid([220, 20, 20])).unwrap();
    assert!((norm(&red) - 1.0).abs() < 1e-3);

    let red_text = text.embed_text("a plain red square").unwrap();
    let blue_text = text.embed_text("a plain blue square").unwrap();
    assert!(cosine_similarity(&red, &red_text) > cosine_similarity(&red, &blue_text));
}

#[test]
#[ignore = "requires CLIP model files in $GLIMPSE_MODEL_DIR"]
fn test_empty_image_is_rejected() {
    assert!(image_encoder().embed_image(&PixelBuffer::empty()).is_err());
}
