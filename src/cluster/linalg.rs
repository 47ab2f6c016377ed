use ndarray::prelude::*;

use crate::{AppError, AppResult};

/// Euclidean norm of a vector.
pub fn vector_norm(v: ArrayView1<f64>) -> f64 {
    v.dot(&v).sqrt()
}

/// Cosine similarity between two vectors, in [-1, 1].
///
/// A zero-magnitude vector has no direction, so the similarity is undefined;
/// callers must be able to tell malformed input apart from genuine
/// dissimilarity, hence the explicit error instead of a silent 0 or NaN.
pub fn cosine_similarity(a: ArrayView1<f64>, b: ArrayView1<f64>) -> AppResult<f64> {
    if a.len() != b.len() {
        return Err(AppError::DimensionMismatch {
            expected: a.len(),
            found: b.len(),
        });
    }
    let norm_a = vector_norm(a);
    let norm_b = vector_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(AppError::DegenerateVector(
            "cosine similarity of a zero-magnitude vector".to_string(),
        ));
    }
    Ok(a.dot(&b) / (norm_a * norm_b))
}
