//! Pluggable similarity backend ("works with either a
//! persistent vector backend or an in-memory fallback; callers never
//! distinguish").

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::artifact::cosine_similarity;
use crate::error::MemoryError;

#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<(), MemoryError>;
    async fn delete(&self, id: &str) -> Result<(), MemoryError>;
    /// Return up to `limit` `(id, similarity)` pairs closest to `query`,
    /// sorted by descending similarity.
    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>, MemoryError>;
}

/// Brute-force in-memory cosine-similarity index. Always available; used
/// as the degraded-mode fallback when a persistent backend is unreachable
/// ("search degrades gracefully... logged as degraded mode") and
/// as the sole backend in tests/small deployments.
#[derive(Default)]
pub struct InMemoryVectorBackend {
    vectors: RwLock<HashMap<String, Vec<f32>>>,
}

impl InMemoryVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    async fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<(), MemoryError> {
        self.vectors.write().insert(id.to_string(), vector);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), MemoryError> {
        self.vectors.write().remove(id);
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>, MemoryError> {
        let vectors = self.vectors.read();
        let mut scored: Vec<(String, f32)> = vectors
            .iter()
            .map(|(id, v)| (id.clone(), cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Thin adapter over a remote Qdrant collection, gated behind the
/// `qdrant` feature (persisted state: "a vector database for
/// similarity"). Grounded in the `qdrant-client` crate used by several
/// pack repos for the same role (see DESIGN.md). Connection details are
/// caller-provided; this type only shapes the upsert/search calls into
/// `VectorBackend`'s contract.
#[cfg(feature = "qdrant")]
pub struct QdrantVectorBackend {
    client: qdrant_client::Qdrant,
    collection: String,
}

#[cfg(feature = "qdrant")]
impl QdrantVectorBackend {
    pub fn new(client: qdrant_client::Qdrant, collection: impl Into<String>) -> Self {
        Self { client, collection: collection.into() }
    }
}

#[cfg(feature = "qdrant")]
#[async_trait]
impl VectorBackend for QdrantVectorBackend {
    async fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<(), MemoryError> {
        use qdrant_client::qdrant::{PointStruct, UpsertPointsBuilder};

        let point = PointStruct::new(id.to_string(), vector, std::collections::HashMap::new());
        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection.clone(), vec![point]))
            .await
            .map_err(|e| MemoryError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), MemoryError> {
        use qdrant_client::qdrant::{DeletePointsBuilder, PointsIdsList};

        self.client
            .delete_points(
                DeletePointsBuilder::new(self.collection.clone())
                    .points(PointsIdsList { ids: vec![id.to_string().into()] }),
            )
            .await
            .map_err(|e| MemoryError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>, MemoryError> {
        use qdrant_client::qdrant::SearchPointsBuilder;

        let response = self
            .client
            .search_points(SearchPointsBuilder::new(self.collection.clone(), query.to_vec(), limit as u64))
            .await
            .map_err(|e| MemoryError::StorageUnavailable(e.to_string()))?;
        Ok(response
            .result
            .into_iter()
            .map(|point| (point.id.map(|id| format!("{id:?}")).unwrap_or_default(), point.score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_backend_ranks_by_similarity() {
        let backend = InMemoryVectorBackend::new();
        backend.upsert("a", vec![1.0, 0.0]).await.unwrap();
        backend.upsert("b", vec![0.0, 1.0]).await.unwrap();
        let results = backend.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].0, "a");
    }
}
