//! Reuse Layer: decide whether to reuse, generalize, or
//! create new, before anything is handed to a generator role.

use std::sync::Arc;

use crate::artifact::{Artifact, ArtifactKind};
use crate::error::MemoryError;
use crate::fix_pattern::FixPattern;
use crate::rank::CombinedRankWeights;
use crate::store::ArtifactMemory;

/// Default similarity floor above which an existing artifact is reused
/// as-is rather than regenerated.
pub const DEFAULT_REUSE_THRESHOLD: f32 = 0.85;

#[derive(Debug, Clone)]
pub enum ReuseDecision {
    /// A near-duplicate already exists; use it directly.
    Reuse { artifact: Artifact, similarity: f32 },
    /// Something similar exists but not close enough to reuse verbatim;
    /// the generator should be pointed at it as a starting point.
    GeneralizeExisting { artifact: Artifact, similarity: f32 },
    /// Nothing close enough was found.
    CreateNew,
}

pub struct ReuseLayer {
    memory: Arc<ArtifactMemory>,
    threshold: f32,
}

impl ReuseLayer {
    pub fn new(memory: Arc<ArtifactMemory>) -> Self {
        Self { memory, threshold: DEFAULT_REUSE_THRESHOLD }
    }

    pub fn with_threshold(memory: Arc<ArtifactMemory>, threshold: f32) -> Self {
        Self { memory, threshold }
    }

    pub async fn evaluate(
        &self,
        query_embedding: &[f32],
        kind: Option<ArtifactKind>,
    ) -> Result<ReuseDecision, MemoryError> {
        let ranked = self
            .memory
            .find_similar(query_embedding, kind, 1, CombinedRankWeights::default())
            .await?;

        match ranked.into_iter().next() {
            Some(top) if top.similarity >= self.threshold => {
                Ok(ReuseDecision::Reuse { artifact: top.artifact, similarity: top.similarity })
            }
            Some(top) => Ok(ReuseDecision::GeneralizeExisting { artifact: top.artifact, similarity: top.similarity }),
            None => Ok(ReuseDecision::CreateNew),
        }
    }
}

/// Find the narrowest-scoped fix pattern visible from `target` whose
/// `error_signature` matches, preferring higher success rate on ties.
pub fn best_fix_pattern<'a>(patterns: &'a [FixPattern], target: &str, error_signature: &str) -> Option<&'a FixPattern> {
    patterns
        .iter()
        .filter(|p| p.error_signature == error_signature && p.scope.visible_to(&p.anchor, target))
        .min_by(|a, b| a.scope.cmp(&b.scope).then_with(|| b.success_rate.partial_cmp(&a.success_rate()).unwrap_or(std::cmp::Ordering::Equal)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use crate::fix_pattern::Scope;
    use crate::vector_backend::InMemoryVectorBackend;

    #[tokio::test]
    async fn high_similarity_triggers_reuse() {
        let memory = Arc::new(ArtifactMemory::new(Arc::new(InMemoryVectorBackend::new())));
        let mut artifact = Artifact::new(ArtifactKind::Function, "f", "desc", "body");
        artifact.embedding = Some(vec![1.0, 0.0]);
        memory.store(artifact).await.unwrap();

        let layer = ReuseLayer::new(memory);
        let decision = layer.evaluate(&[1.0, 0.0], None).await.unwrap();
        assert!(matches!(decision, ReuseDecision::Reuse { .. }));
    }

    #[tokio::test]
    async fn no_match_creates_new() {
        let memory = Arc::new(ArtifactMemory::new(Arc::new(InMemoryVectorBackend::new())));
        let layer = ReuseLayer::new(memory);
        let decision = layer.evaluate(&[1.0, 0.0], None).await.unwrap();
        assert!(matches!(decision, ReuseDecision::CreateNew));
    }

    #[test]
    fn tool_scoped_pattern_preferred_over_global() {
        let tool_pattern = FixPattern::new("tool.fetch", Scope::Tool, "timeout", "retry", "content");
        let global_pattern = FixPattern::new("*", Scope::Global, "timeout", "retry-global", "content");
        let patterns = vec![global_pattern, tool_pattern.clone()];

        let best = best_fix_pattern(&patterns, "tool.fetch", "timeout").unwrap();
        assert_eq!(best.pattern_id, tool_pattern.pattern_id);
    }
}
