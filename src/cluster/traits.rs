use futures::future::BoxFuture;

use crate::AppResult;

/// Trait for converting text into vector embeddings.
///
/// Implementations must be deterministic for a fixed model version: the
/// batch reprocessing path relies on identical text producing an identical
/// vector so unchanged corpora yield bit-identical assignments.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts.
    /// Returns a vector of embeddings, where each embedding is a vector of floats.
    fn embed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, AppResult<Vec<Vec<f32>>>>;
}
