//! C3 Embedder: `embed(text) -> vector of configured dimension`,
//! guaranteeing the same model is used for storing and searching.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::RoutingError;

/// A backend capable of embedding text, e.g. an HTTP call to an
/// embeddings endpoint. Kept separate from `BackendClient` because
/// embedding and generation are distinct capabilities even when served by
/// the same provider.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed_raw(&self, text: &str) -> Result<Vec<f32>, RoutingError>;
}

/// Embedding model identity, persisted alongside each artifact's stored
/// vector ("artifact memory tracks `embedding_model_id` per
/// record") so a model change can be detected and flagged stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelId {
    pub model_key: String,
    pub dimension: usize,
}

pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    model_id: EmbeddingModelId,
}

impl Embedder {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, model_id: EmbeddingModelId) -> Self {
        Self { backend, model_id }
    }

    pub fn model_id(&self) -> &EmbeddingModelId {
        &self.model_id
    }

    /// Embed `text`, validating the backend actually returned a vector of
    /// the configured dimension.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RoutingError> {
        let vector = self.backend.embed_raw(text).await?;
        if vector.len() != self.model_id.dimension {
            return Err(RoutingError::BackendUnavailable {
                backend: self.model_id.model_key.clone(),
                message: format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.model_id.dimension,
                    vector.len()
                ),
            });
        }
        Ok(vector)
    }

    /// True if a stored record's `embedding_model_id` no longer matches
    /// this embedder's configuration — such records are stale and must be
    /// rebuilt before they can be compared against fresh embeddings.
    pub fn is_stale(&self, recorded: &EmbeddingModelId) -> bool {
        recorded != &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend(Vec<f32>);

    #[async_trait]
    impl EmbeddingBackend for FixedBackend {
        async fn embed_raw(&self, _text: &str) -> Result<Vec<f32>, RoutingError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let embedder = Embedder::new(
            Arc::new(FixedBackend(vec![0.0; 4])),
            EmbeddingModelId { model_key: "text-embed".into(), dimension: 768 },
        );
        assert!(embedder.embed("hi").await.is_err());
    }

    #[test]
    fn detects_stale_model() {
        let embedder = Embedder::new(
            Arc::new(FixedBackend(vec![0.0; 768])),
            EmbeddingModelId { model_key: "text-embed-v2".into(), dimension: 768 },
        );
        let old = EmbeddingModelId { model_key: "text-embed-v1".into(), dimension: 768 };
        assert!(embedder.is_stale(&old));
    }
}
