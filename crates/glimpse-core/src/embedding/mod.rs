//! Encoder abstractions and implementations.
//!
//! ## Core Traits
//!
//! - [`TextEncoder`] - text query to vector
//! - [`ImageEncoder`] - RGB image to vector
//!
//! ## Implementations
//!
//! With the `clip` feature, [`ClipTextEncoder`] and [`ClipImageEncoder`] run
//! the two CLIP towers on candle.

mod traits;

pub mod types;

#[cfg(feature = "clip")]
pub mod clip;
#[cfg(feature = "clip")]
pub mod tokenizer;

pub use traits::{ImageEncoder, TextEncoder};
pub use types::{PixelBuffer, QueryChannel, QueryInput};

#[cfg(feature = "clip")]
pub use clip::{ClipImageEncoder, ClipModelFiles, ClipTextEncoder};
