//! The `Artifact` data model.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Unit of semantic memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Function,
    Workflow,
    Tool,
    Test,
    Pattern,
    Plan,
    Prompt,
    SubWorkflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Canonical,
    Candidate,
    Archived,
}

/// Per-tool-kind optimization bookkeeping for the Cluster Optimizer
/// (`optimization_weights`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizationWeights {
    pub last_distance: f32,
    pub fitness_score: f32,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

/// A stored error->fix observation attached to an artifact (/// `bug_embeddings`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugEmbedding {
    pub id: String,
    pub vector: Vec<f32>,
    pub severity: u8,
    pub resolved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    pub kind: ArtifactKind,
    pub name: String,
    pub description: String,
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Identity of the embedding model used to produce `embedding`, so a
    /// later embedder-model change can be detected.
    #[serde(default)]
    pub embedding_model_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub quality_score: f32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_used: chrono::DateTime<chrono::Utc>,
    pub version: semver::Version,
    pub definition_hash: String,
    #[serde(default)]
    pub parent_ids: Vec<String>,
    #[serde(default)]
    pub children_ids: Vec<String>,
    #[serde(default)]
    pub cluster_id: Option<String>,
    pub status: ArtifactStatus,
    #[serde(default)]
    pub optimization_weights: HashMap<String, OptimizationWeights>,
    #[serde(default)]
    pub bug_embeddings: Vec<BugEmbedding>,
}

impl Artifact {
    /// Construct a brand-new candidate artifact; callers fill in
    /// embedding/definition_hash through `ArtifactMemory::store`.
    pub fn new(
        kind: ArtifactKind,
        name: impl Into<String>,
        description: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            artifact_id: uuid::Uuid::new_v4().to_string(),
            kind,
            name: name.into(),
            description: description.into(),
            content: content.into(),
            tags: BTreeSet::new(),
            embedding: None,
            embedding_model_id: None,
            metadata: HashMap::new(),
            usage_count: 0,
            quality_score: 0.5,
            created_at: now,
            last_used: now,
            version: semver::Version::new(0, 1, 0),
            definition_hash: String::new(),
            parent_ids: Vec::new(),
            children_ids: Vec::new(),
            cluster_id: None,
            status: ArtifactStatus::Candidate,
            optimization_weights: HashMap::new(),
            bug_embeddings: Vec::new(),
        }
    }
}

/// Cosine similarity between two equal-length vectors, clamped to
/// `[0, 1]` ("cosine similarity `s ∈ [0,1]`"). Vectors of
/// mismatched length are treated as non-comparable (similarity 0).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    ((dot / (norm_a * norm_b)) + 1.0) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_half() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mismatched_length_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
