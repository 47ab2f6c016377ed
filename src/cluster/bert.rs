use dichoteca_local_embedder::SentenceEmbedder as LocalSentenceEmbedder;
use futures::FutureExt;

use crate::AppResult;
use crate::cluster::traits::Embedder;

/// Local sentence-encoder embeddings, no server required.
#[derive(Clone)]
pub struct BertEmbedder {
    inner: LocalSentenceEmbedder,
}

impl Embedder for BertEmbedder {
    fn embed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> futures::future::BoxFuture<'a, AppResult<Vec<Vec<f32>>>> {
        async move {
            match self.inner.embed_texts(texts).await {
                Ok(v) => Ok(v),
                Err(e) => Err(crate::error::AppError::EmbeddingProvider(e.to_string())),
            }
        }
        .boxed()
    }
}

impl BertEmbedder {
    #[tracing::instrument(name = "Loading local embedding model", level = "info")]
    pub async fn new_from_pretrained<S: AsRef<str> + std::fmt::Debug>(
        model_name: S,
    ) -> AppResult<Self> {
        let inner = LocalSentenceEmbedder::new_from_pretrained(model_name)
            .await
            .map_err(|e| crate::error::AppError::EmbeddingProvider(e.to_string()))?;
        Ok(Self { inner })
    }
}
