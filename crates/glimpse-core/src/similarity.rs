//! Cosine similarity and the canonical result ordering.
//!
//! Every ranked list the engine produces goes through
//! [`sort_by_descending_score`]: highest score first, ties broken by ascending
//! row, NaN last. The approximate index, the exact index and
//! [`rank_exhaustive`] all agree on it.

use crate::corpus::EmbeddingMatrix;
use rayon::prelude::*;
use std::cmp::Ordering;

/// Cosine similarity of two vectors, clamped to `[-1, 1]`.
///
/// Returns `0.0` when either vector has zero magnitude. Extra trailing
/// components of the longer vector are ignored.
///
/// ```
/// use glimpse_core::similarity::cosine_similarity;
///
/// assert!((cosine_similarity(&[3.0, 4.0], &[3.0, 4.0]) - 1.0).abs() < 1e-6);
/// assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    (dot / (mag_a * mag_b).sqrt()).clamp(-1.0, 1.0)
}

/// Compares two scores so that higher sorts first and NaN sorts last.
fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Sorts `(row, score)` pairs by descending score, then ascending row.
pub fn sort_by_descending_score(hits: &mut [(u64, f32)]) {
    hits.sort_by(|a, b| descending(a.1, b.1).then_with(|| a.0.cmp(&b.0)));
}

/// Scores every matrix row against `query` and returns the best `limit`.
///
/// Rows are scored in parallel. This is the brute-force reference the
/// approximate index is checked against.
pub fn rank_exhaustive(matrix: &EmbeddingMatrix, query: &[f32], limit: usize) -> Vec<(u64, f32)> {
    let mut hits: Vec<(u64, f32)> = matrix
        .as_slice()
        .par_chunks(matrix.dimensions().max(1))
        .enumerate()
        .map(|(row, vector)| (row as u64, cosine_similarity(vector, query)))
        .collect();

    sort_by_descending_score(&mut hits);
    hits.truncate(limit);
    hits
}
