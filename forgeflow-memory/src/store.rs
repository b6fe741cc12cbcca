//! Artifact Memory: content-addressed storage with
//! combined-rank semantic retrieval, degrading gracefully when the
//! vector backend is unavailable.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use forgeflow_commons::hashing::definition_hash;
use parking_lot::RwLock;

use crate::artifact::{Artifact, ArtifactKind, ArtifactStatus, cosine_similarity};
use crate::error::MemoryError;
use crate::rank::{CombinedRankWeights, combined_rank};
use crate::vector_backend::VectorBackend;

#[derive(Debug, Clone)]
pub struct RankedArtifact {
    pub artifact: Artifact,
    pub similarity: f32,
    pub rank: f32,
}

/// Classification of a content change under the §4.4 semver rule:
/// breaking/interface-changing -> major; new optional feature -> minor;
/// otherwise -> patch. Callers that know the nature of their change set
/// `artifact.metadata["version_bump"]` to `"major"` / `"minor"` before
/// calling `store`; absent that hint the change is treated as a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionBump {
    Major,
    Minor,
    Patch,
}

fn classify_bump(artifact: &Artifact) -> VersionBump {
    match artifact.metadata.get("version_bump").and_then(|v| v.as_str()) {
        Some("major") => VersionBump::Major,
        Some("minor") => VersionBump::Minor,
        _ => VersionBump::Patch,
    }
}

fn apply_bump(version: &mut semver::Version, bump: VersionBump) {
    match bump {
        VersionBump::Major => {
            version.major += 1;
            version.minor = 0;
            version.patch = 0;
        }
        VersionBump::Minor => {
            version.minor += 1;
            version.patch = 0;
        }
        VersionBump::Patch => version.patch += 1,
    }
}

pub struct ArtifactMemory {
    artifacts: RwLock<HashMap<String, Artifact>>,
    vector_backend: Arc<dyn VectorBackend>,
}

impl ArtifactMemory {
    pub fn new(vector_backend: Arc<dyn VectorBackend>) -> Self {
        Self { artifacts: RwLock::new(HashMap::new()), vector_backend }
    }

    /// Insert or update an artifact. Re-hashes `content`; if an existing
    /// record under the *same id* has a different hash, this is a new
    /// logical version: the new content is stored under a freshly minted
    /// id, the version is bumped per `classify_bump`, the superseded
    /// record is preserved (not overwritten) with `status = archived` and
    /// `children_ids` pointing at the new id, and the new record's
    /// `parent_ids` points back at the old one (§4.4 content-addressed
    /// versioning, §9 lineage DAG). A same-hash re-store under the same id
    /// is a no-op version bump (idempotent).
    pub async fn store(&self, mut artifact: Artifact) -> Result<Artifact, MemoryError> {
        let hash = definition_hash(&artifact.content);

        let previous = self.artifacts.read().get(&artifact.artifact_id).cloned();
        if let Some(mut previous) = previous {
            if previous.definition_hash != hash {
                let bump = classify_bump(&artifact);
                let mut version = previous.version.clone();
                apply_bump(&mut version, bump);

                let new_id = uuid::Uuid::new_v4().to_string();
                artifact.artifact_id = new_id.clone();
                artifact.version = version;
                artifact.definition_hash = hash;
                if !artifact.parent_ids.contains(&previous.artifact_id) {
                    artifact.parent_ids.push(previous.artifact_id.clone());
                }

                previous.status = ArtifactStatus::Archived;
                if !previous.children_ids.contains(&new_id) {
                    previous.children_ids.push(new_id.clone());
                }

                if let Some(embedding) = artifact.embedding.clone() {
                    if let Err(err) = self.vector_backend.upsert(&artifact.artifact_id, embedding).await {
                        tracing::warn!(artifact_id = %artifact.artifact_id, error = %err, "vector backend upsert failed, artifact stored without live index entry");
                    }
                }

                let mut artifacts = self.artifacts.write();
                artifacts.insert(previous.artifact_id.clone(), previous);
                artifacts.insert(artifact.artifact_id.clone(), artifact.clone());
                return Ok(artifact);
            }
            artifact.version = previous.version.clone();
        }
        artifact.definition_hash = hash;

        if let Some(embedding) = artifact.embedding.clone() {
            if let Err(err) = self.vector_backend.upsert(&artifact.artifact_id, embedding).await {
                tracing::warn!(artifact_id = %artifact.artifact_id, error = %err, "vector backend upsert failed, artifact stored without live index entry");
            }
        }

        self.artifacts.write().insert(artifact.artifact_id.clone(), artifact.clone());
        Ok(artifact)
    }

    pub fn get(&self, artifact_id: &str) -> Result<Artifact, MemoryError> {
        self.artifacts
            .read()
            .get(artifact_id)
            .cloned()
            .ok_or_else(|| MemoryError::NotFound(artifact_id.to_string()))
    }

    pub fn find_by_tags(&self, tags: &BTreeSet<String>) -> Vec<Artifact> {
        self.artifacts
            .read()
            .values()
            .filter(|a| !a.tags.is_disjoint(tags))
            .cloned()
            .collect()
    }

    pub fn increment_usage(&self, artifact_id: &str) -> Result<(), MemoryError> {
        let mut artifacts = self.artifacts.write();
        let artifact = artifacts
            .get_mut(artifact_id)
            .ok_or_else(|| MemoryError::NotFound(artifact_id.to_string()))?;
        artifact.usage_count += 1;
        artifact.last_used = chrono::Utc::now();
        Ok(())
    }

    pub fn update_quality(&self, artifact_id: &str, quality_score: f32) -> Result<(), MemoryError> {
        let mut artifacts = self.artifacts.write();
        let artifact = artifacts
            .get_mut(artifact_id)
            .ok_or_else(|| MemoryError::NotFound(artifact_id.to_string()))?;
        artifact.quality_score = quality_score.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn update_metadata(&self, artifact_id: &str, key: &str, value: serde_json::Value) -> Result<(), MemoryError> {
        let mut artifacts = self.artifacts.write();
        let artifact = artifacts
            .get_mut(artifact_id)
            .ok_or_else(|| MemoryError::NotFound(artifact_id.to_string()))?;
        artifact.metadata.insert(key.to_string(), value);
        Ok(())
    }

    /// Semantic retrieval ranked by `combined_rank`. Falls back to a
    /// brute-force in-memory cosine scan, logged as degraded mode, when
    /// the configured vector backend errors.
    pub async fn find_similar(
        &self,
        query_embedding: &[f32],
        kind: Option<ArtifactKind>,
        limit: usize,
        weights: CombinedRankWeights,
    ) -> Result<Vec<RankedArtifact>, MemoryError> {
        let candidate_pool = limit.saturating_mul(4).max(limit).max(20);

        let similarities: HashMap<String, f32> = match self.vector_backend.search(query_embedding, candidate_pool).await {
            Ok(hits) => hits.into_iter().collect(),
            Err(err) => {
                tracing::warn!(error = %err, "vector backend search failed, degrading to in-memory scan");
                self.artifacts
                    .read()
                    .iter()
                    .filter_map(|(id, a)| a.embedding.as_ref().map(|e| (id.clone(), cosine_similarity(query_embedding, e))))
                    .collect()
            }
        };

        let artifacts = self.artifacts.read();
        let mut ranked: Vec<RankedArtifact> = similarities
            .into_iter()
            .filter_map(|(id, similarity)| {
                let artifact = artifacts.get(&id)?;
                if let Some(kind) = kind {
                    if artifact.kind != kind {
                        return None;
                    }
                }
                let rank = combined_rank(weights, artifact.usage_count, similarity, artifact.quality_score);
                Some(RankedArtifact { artifact: artifact.clone(), similarity, rank })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.rank
                .partial_cmp(&a.rank)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.artifact.last_used.cmp(&a.artifact.last_used))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_backend::InMemoryVectorBackend;

    fn artifact_with_embedding(name: &str, embedding: Vec<f32>) -> Artifact {
        let mut artifact = Artifact::new(ArtifactKind::Function, name, "desc", "fn body");
        artifact.embedding = Some(embedding);
        artifact.status = ArtifactStatus::Candidate;
        artifact
    }

    #[tokio::test]
    async fn store_then_find_similar_ranks_by_combined_rank() {
        let memory = ArtifactMemory::new(Arc::new(InMemoryVectorBackend::new()));
        let mut close = artifact_with_embedding("close", vec![1.0, 0.0]);
        close.usage_count = 5;
        let stored_close = memory.store(close).await.unwrap();
        let far = artifact_with_embedding("far", vec![0.0, 1.0]);
        memory.store(far).await.unwrap();

        let ranked = memory
            .find_similar(&[1.0, 0.0], None, 2, CombinedRankWeights::default())
            .await
            .unwrap();

        assert_eq!(ranked[0].artifact.artifact_id, stored_close.artifact_id);
    }

    #[tokio::test]
    async fn store_bumps_version_when_content_changes() {
        let memory = ArtifactMemory::new(Arc::new(InMemoryVectorBackend::new()));
        let artifact = Artifact::new(ArtifactKind::Function, "f", "desc", "v1");
        let original = memory.store(artifact).await.unwrap();
        let original_id = original.artifact_id.clone();

        let mut next = original.clone();
        next.content = "v2".to_string();
        let updated = memory.store(next).await.unwrap();

        assert_eq!(updated.version.patch, 1);
        assert_ne!(updated.artifact_id, original_id, "a content change must mint a new artifact id, not overwrite the old one");
        assert_eq!(updated.parent_ids, vec![original_id.clone()]);

        let archived_previous = memory.get(&original_id).unwrap();
        assert_eq!(archived_previous.status, ArtifactStatus::Archived);
        assert_eq!(archived_previous.children_ids, vec![updated.artifact_id.clone()]);
    }

    #[test]
    fn get_missing_artifact_errors() {
        let memory = ArtifactMemory::new(Arc::new(InMemoryVectorBackend::new()));
        assert!(matches!(memory.get("missing"), Err(MemoryError::NotFound(_))));
    }
}
