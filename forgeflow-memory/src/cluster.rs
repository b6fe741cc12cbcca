//! Cluster Optimizer: groups near-duplicate artifacts,
//! iteratively evolves a cluster's canonical member toward higher fitness,
//! and trims members that drift too far from the fittest one under an
//! eight-rule distance-from-fittest policy.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, ArtifactStatus, cosine_similarity};
use crate::error::MemoryError;
use crate::store::ArtifactMemory;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: String,
    pub member_ids: Vec<String>,
    pub canonical_id: Option<String>,
    /// Pattern category -> recorded improvements that produced a
    /// promotion, each naming the contributing delta (`Cluster::learned_patterns`).
    #[serde(default)]
    pub learned_patterns: std::collections::HashMap<String, Vec<LearnedPattern>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub improvement_delta: f32,
    pub description: String,
    pub source_cluster_id: String,
}

impl Cluster {
    pub fn new(member_ids: Vec<String>) -> Self {
        Self {
            cluster_id: uuid::Uuid::new_v4().to_string(),
            member_ids,
            canonical_id: None,
            learned_patterns: std::collections::HashMap::new(),
            created_at: chrono::Utc::now(),
        }
    }
}

/// Raw measurements a caller-provided validator reports for a candidate
/// ("collects `{latency, memory, cpu, success_rate,
/// coverage}`"). `latency`/`memory`/`cpu` are expressed relative to a
/// baseline the caller defines (e.g. canonical's own measurement = 1.0);
/// `success_rate`/`coverage` are already fractions in `[0,1]`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FitnessMetrics {
    pub latency: f32,
    pub memory: f32,
    pub cpu: f32,
    pub success_rate: f32,
    pub coverage: f32,
}

/// Clamp `x` into `[0, 1]`, then invert cost metrics (lower raw value is
/// better) so every normalized term follows "higher normalized value is
/// better fitness" ("normalization clamps metrics to [0,1]").
fn norm_cost(x: f32) -> f32 {
    1.0 - x.clamp(0.0, 1.0)
}

fn norm_benefit(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

/// Per-artifact-kind fitness weights ("Weights are per artifact
/// kind").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FitnessWeights {
    pub latency: f32,
    pub memory: f32,
    pub cpu: f32,
    pub success: f32,
    pub coverage: f32,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self { latency: 0.2, memory: 0.15, cpu: 0.15, success: 0.35, coverage: 0.15 }
    }
}

impl FitnessWeights {
    pub fn score(&self, metrics: &FitnessMetrics) -> f32 {
        self.latency * norm_cost(metrics.latency)
            + self.memory * norm_cost(metrics.memory)
            + self.cpu * norm_cost(metrics.cpu)
            + self.success * norm_benefit(metrics.success_rate)
            + self.coverage * norm_benefit(metrics.coverage)
    }
}

/// Distance-from-fittest trim policy, eight ordered rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrimPolicy {
    pub always_keep_canonical: bool,
    pub preserve_lineage_endpoints: bool,
    pub min_fitness_absolute: f32,
    pub max_distance_from_fittest: f32,
    pub min_similarity_to_fittest: f32,
    pub preserve_high_perf_threshold: f32,
    pub never_used_grace_period_days: i64,
    pub min_usage_count: u64,
    pub test_coverage_keep_threshold: f32,
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self {
            always_keep_canonical: true,
            preserve_lineage_endpoints: true,
            min_fitness_absolute: 0.3,
            max_distance_from_fittest: 0.4,
            min_similarity_to_fittest: 0.5,
            preserve_high_perf_threshold: 0.8,
            never_used_grace_period_days: 30,
            min_usage_count: 1,
            test_coverage_keep_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimDecision {
    Keep,
    Prune,
}

/// How a replacement candidate is synthesized from a cluster's members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStrategy {
    /// Graft the strongest fragments of each alternate onto the canonical.
    BestOfBreed,
    /// Apply the single highest-confidence delta to the canonical.
    Incremental,
    /// Discard the canonical and regenerate from scratch against the
    /// cluster's shared description, keeping its declared interface.
    Radical,
    /// Alternates across strategies on successive iterations.
    Hybrid,
}

/// Implemented by the caller to synthesize a candidate artifact from a
/// cluster's canonical member and its alternates under a chosen strategy.
/// Kept as a trait rather than a closure so the
/// candidate-synthesis language-model call, and its prompt construction,
/// lives with the caller rather than inside this crate.
#[async_trait::async_trait]
pub trait CandidateSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        canonical: &Artifact,
        alternates: &[Artifact],
        strategy: CandidateStrategy,
    ) -> Result<Artifact, MemoryError>;
}

/// Implemented by the caller to run whatever tests/benchmarks a candidate
/// needs and report the raw metrics the optimizer normalizes into a
/// fitness score.
#[async_trait::async_trait]
pub trait CandidateValidator: Send + Sync {
    async fn validate(&self, candidate: &Artifact) -> Result<FitnessMetrics, MemoryError>;
}

#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub iterations_run: u32,
    pub promotions: u32,
    pub final_canonical_id: Option<String>,
}

pub struct ClusterOptimizer {
    memory: Arc<ArtifactMemory>,
    fitness_weights: FitnessWeights,
    trim_policy: TrimPolicy,
    fitness_improvement_threshold: f32,
}

impl ClusterOptimizer {
    pub fn new(memory: Arc<ArtifactMemory>) -> Self {
        Self { memory, fitness_weights: FitnessWeights::default(), trim_policy: TrimPolicy::default(), fitness_improvement_threshold: 0.05 }
    }

    pub fn with_policy(memory: Arc<ArtifactMemory>, fitness_weights: FitnessWeights, trim_policy: TrimPolicy) -> Self {
        Self { memory, fitness_weights, trim_policy, fitness_improvement_threshold: 0.05 }
    }

    /// A member's own stored `quality_score` stands in for fitness when no
    /// fresh validator run exists yet (e.g. before the first iteration, or
    /// for `identify_canonical` over members this run never re-validates).
    fn stored_fitness(&self, artifact: &Artifact) -> f32 {
        artifact.quality_score
    }

    /// Pick the member with the highest stored fitness as canonical.
    pub fn identify_canonical(&self, cluster: &Cluster) -> Result<Artifact, MemoryError> {
        let members: Vec<Artifact> = cluster.member_ids.iter().map(|id| self.memory.get(id)).collect::<Result<_, _>>()?;
        members
            .into_iter()
            .max_by(|a, b| self.stored_fitness(a).partial_cmp(&self.stored_fitness(b)).unwrap_or(std::cmp::Ordering::Equal))
            .ok_or_else(|| MemoryError::ClusterNotFound(cluster.cluster_id.clone()))
    }

    /// Choose a strategy from how much the alternates already agree with
    /// the canonical (near-unanimous agreement favors a small incremental
    /// nudge; wide disagreement favors starting over; the middle ground
    /// favors grafting), cycling through all four on a `Hybrid` run.
    pub fn choose_strategy(&self, canonical: &Artifact, alternates: &[Artifact], iteration: u32) -> CandidateStrategy {
        if alternates.is_empty() {
            return CandidateStrategy::Incremental;
        }
        let canonical_embedding = canonical.embedding.as_deref().unwrap_or(&[]);
        let mean_similarity: f32 =
            alternates.iter().map(|a| cosine_similarity(canonical_embedding, a.embedding.as_deref().unwrap_or(&[]))).sum::<f32>() / alternates.len() as f32;

        if mean_similarity > 0.9 {
            CandidateStrategy::Incremental
        } else if mean_similarity > 0.6 {
            CandidateStrategy::BestOfBreed
        } else if alternates.len() >= 3 {
            const ROTATION: [CandidateStrategy; 3] = [CandidateStrategy::Incremental, CandidateStrategy::BestOfBreed, CandidateStrategy::Radical];
            ROTATION[iteration as usize % ROTATION.len()]
        } else {
            CandidateStrategy::Radical
        }
    }

    /// Run up to `max_iterations` optimization rounds: extract
    /// the canonical/alternates, synthesize a candidate, validate it, and
    /// promote when the improvement clears `fitness_improvement_threshold`;
    /// stop as soon as a round produces no improvement.
    pub async fn optimize(
        &self,
        cluster: &mut Cluster,
        synthesizer: &dyn CandidateSynthesizer,
        validator: &dyn CandidateValidator,
        max_iterations: u32,
    ) -> Result<OptimizationOutcome, MemoryError> {
        let mut promotions = 0;
        let mut iterations_run = 0;

        for iteration in 0..max_iterations {
            iterations_run = iteration + 1;

            let canonical = self.identify_canonical(cluster)?;
            let alternates: Vec<Artifact> =
                cluster.member_ids.iter().filter(|id| **id != canonical.artifact_id).map(|id| self.memory.get(id)).collect::<Result<_, _>>()?;

            let strategy = self.choose_strategy(&canonical, &alternates, iteration);
            let mut candidate = synthesizer.synthesize(&canonical, &alternates, strategy).await?;

            let canonical_metrics = validator.validate(&canonical).await?;
            let candidate_metrics = validator.validate(&candidate).await?;
            let canonical_fitness = self.fitness_weights.score(&canonical_metrics);
            let candidate_fitness = self.fitness_weights.score(&candidate_metrics);
            candidate.quality_score = candidate_fitness;

            if candidate_fitness - canonical_fitness < self.fitness_improvement_threshold {
                break;
            }

            candidate.parent_ids = vec![canonical.artifact_id.clone()];
            let stored_candidate = self.memory.store(candidate).await?;

            let mut promoted_canonical = canonical.clone();
            promoted_canonical.children_ids.push(stored_candidate.artifact_id.clone());
            self.memory.store(promoted_canonical).await?;

            self.promote(cluster, &stored_candidate.artifact_id).await?;
            self.archive(&canonical.artifact_id).await?;

            let floor = candidate_fitness - 0.1;
            for alternate in &alternates {
                if self.stored_fitness(alternate) < floor {
                    self.archive(&alternate.artifact_id).await?;
                }
            }

            cluster.member_ids.push(stored_candidate.artifact_id.clone());
            cluster
                .learned_patterns
                .entry(format!("{strategy:?}"))
                .or_default()
                .push(LearnedPattern {
                    improvement_delta: candidate_fitness - canonical_fitness,
                    description: format!("promoted over canonical {}", canonical.artifact_id),
                    source_cluster_id: cluster.cluster_id.clone(),
                });

            promotions += 1;
        }

        Ok(OptimizationOutcome { iterations_run, promotions, final_canonical_id: cluster.canonical_id.clone() })
    }

    pub async fn promote(&self, cluster: &mut Cluster, artifact_id: &str) -> Result<(), MemoryError> {
        let mut artifact = self.memory.get(artifact_id)?;
        artifact.status = ArtifactStatus::Canonical;
        self.memory.store(artifact).await?;
        cluster.canonical_id = Some(artifact_id.to_string());
        Ok(())
    }

    pub async fn archive(&self, artifact_id: &str) -> Result<(), MemoryError> {
        let mut artifact = self.memory.get(artifact_id)?;
        artifact.status = ArtifactStatus::Archived;
        self.memory.store(artifact).await?;
        Ok(())
    }

    /// Apply the eight ordered distance-from-fittest rules to one
    /// non-canonical member. Pure decision function so the
    /// rule order itself is directly testable.
    pub fn decide_trim(&self, artifact: &Artifact, canonical: &Artifact, is_leaf: bool) -> TrimDecision {
        let policy = &self.trim_policy;

        if policy.always_keep_canonical && artifact.artifact_id == canonical.artifact_id {
            return TrimDecision::Keep;
        }
        let test_coverage = artifact.metadata.get("test_coverage").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
        if test_coverage >= policy.test_coverage_keep_threshold {
            return TrimDecision::Keep;
        }
        if policy.preserve_lineage_endpoints && is_leaf {
            return TrimDecision::Keep;
        }

        let similarity = cosine_similarity(canonical.embedding.as_deref().unwrap_or(&[]), artifact.embedding.as_deref().unwrap_or(&[]));
        let distance = 1.0 - similarity;
        let fitness = self.stored_fitness(artifact);
        let days_since_creation = (chrono::Utc::now() - artifact.created_at).num_days();

        if fitness < policy.min_fitness_absolute && distance > policy.max_distance_from_fittest {
            return TrimDecision::Prune;
        }
        if similarity < policy.min_similarity_to_fittest && fitness < policy.preserve_high_perf_threshold {
            return TrimDecision::Prune;
        }
        if artifact.usage_count == 0 && days_since_creation > policy.never_used_grace_period_days && fitness < policy.preserve_high_perf_threshold {
            return TrimDecision::Prune;
        }
        if fitness >= policy.min_fitness_absolute && artifact.usage_count >= policy.min_usage_count {
            return TrimDecision::Keep;
        }
        TrimDecision::Keep
    }

    /// Run `decide_trim` over every non-canonical member and archive the
    /// ones it prunes. "Prune" never hard-deletes ("mark
    /// archived, never hard-delete unless an explicit purge operation is
    /// invoked") — that purge operation is intentionally out of scope
    /// here.
    pub async fn trim(&self, cluster: &mut Cluster) -> Result<Vec<String>, MemoryError> {
        let members: Vec<Artifact> = cluster.member_ids.iter().map(|id| self.memory.get(id)).collect::<Result<_, _>>()?;
        let canonical = self.identify_canonical(cluster)?;

        let parent_ids: std::collections::HashSet<&str> = members.iter().flat_map(|m| m.parent_ids.iter().map(String::as_str)).collect();

        let mut archived_ids = Vec::new();
        let mut survivors = Vec::new();
        for member in members {
            if member.artifact_id == canonical.artifact_id {
                survivors.push(member.artifact_id.clone());
                continue;
            }
            let is_leaf = !parent_ids.contains(member.artifact_id.as_str());
            match self.decide_trim(&member, &canonical, is_leaf) {
                TrimDecision::Keep => survivors.push(member.artifact_id.clone()),
                TrimDecision::Prune => {
                    self.archive(&member.artifact_id).await?;
                    archived_ids.push(member.artifact_id);
                }
            }
        }

        cluster.member_ids = survivors;
        Ok(archived_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use crate::vector_backend::InMemoryVectorBackend;

    async fn stored(memory: &ArtifactMemory, embedding: Vec<f32>, quality: f32, usage: u64) -> Artifact {
        let mut artifact = Artifact::new(ArtifactKind::Function, "f", "desc", "body");
        artifact.embedding = Some(embedding);
        artifact.quality_score = quality;
        artifact.usage_count = usage;
        memory.store(artifact).await.unwrap()
    }

    #[tokio::test]
    async fn identifies_highest_fitness_as_canonical() {
        let memory = Arc::new(ArtifactMemory::new(Arc::new(InMemoryVectorBackend::new())));
        let weak = stored(&memory, vec![1.0, 0.0], 0.2, 0).await;
        let strong = stored(&memory, vec![0.9, 0.1], 0.9, 20).await;
        let cluster = Cluster::new(vec![weak.artifact_id, strong.artifact_id.clone()]);

        let optimizer = ClusterOptimizer::new(memory);
        let canonical = optimizer.identify_canonical(&cluster).unwrap();
        assert_eq!(canonical.artifact_id, strong.artifact_id);
    }

    #[tokio::test]
    async fn trim_archives_distant_low_fitness_members() {
        let memory = Arc::new(ArtifactMemory::new(Arc::new(InMemoryVectorBackend::new())));
        let fittest = stored(&memory, vec![1.0, 0.0], 0.9, 50).await;
        let close = stored(&memory, vec![0.95, 0.05], 0.5, 1).await;
        let distant = stored(&memory, vec![0.0, 1.0], 0.1, 0).await;
        let mut cluster = Cluster::new(vec![fittest.artifact_id.clone(), close.artifact_id.clone(), distant.artifact_id.clone()]);

        let optimizer = ClusterOptimizer::with_policy(
            memory,
            FitnessWeights::default(),
            TrimPolicy { max_distance_from_fittest: 0.3, preserve_lineage_endpoints: false, ..TrimPolicy::default() },
        );
        let archived = optimizer.trim(&mut cluster).await.unwrap();

        assert!(archived.contains(&distant.artifact_id));
        assert!(cluster.member_ids.contains(&fittest.artifact_id));
        assert!(cluster.member_ids.contains(&close.artifact_id));
    }

    #[tokio::test]
    async fn high_test_coverage_member_is_never_pruned() {
        let memory = Arc::new(ArtifactMemory::new(Arc::new(InMemoryVectorBackend::new())));
        let fittest = stored(&memory, vec![1.0, 0.0], 0.9, 50).await;
        let mut well_tested = stored(&memory, vec![0.0, 1.0], 0.05, 0).await;
        well_tested.metadata.insert("test_coverage".to_string(), serde_json::json!(0.95));
        let well_tested = memory.store(well_tested).await.unwrap();
        let mut cluster = Cluster::new(vec![fittest.artifact_id.clone(), well_tested.artifact_id.clone()]);

        let optimizer = ClusterOptimizer::with_policy(
            memory,
            FitnessWeights::default(),
            TrimPolicy { preserve_lineage_endpoints: false, ..TrimPolicy::default() },
        );
        let archived = optimizer.trim(&mut cluster).await.unwrap();

        assert!(!archived.contains(&well_tested.artifact_id));
    }

    struct StubSynthesizer;
    #[async_trait::async_trait]
    impl CandidateSynthesizer for StubSynthesizer {
        async fn synthesize(&self, canonical: &Artifact, _alternates: &[Artifact], _strategy: CandidateStrategy) -> Result<Artifact, MemoryError> {
            let mut candidate = canonical.clone();
            candidate.artifact_id = uuid::Uuid::new_v4().to_string();
            candidate.content = format!("{}-improved", canonical.content);
            Ok(candidate)
        }
    }

    struct StubValidator {
        canonical_success: f32,
        candidate_success: f32,
    }
    #[async_trait::async_trait]
    impl CandidateValidator for StubValidator {
        async fn validate(&self, candidate: &Artifact) -> Result<FitnessMetrics, MemoryError> {
            let success_rate = if candidate.content.ends_with("-improved") { self.candidate_success } else { self.canonical_success };
            Ok(FitnessMetrics { latency: 0.2, memory: 0.2, cpu: 0.2, success_rate, coverage: 0.8 })
        }
    }

    #[tokio::test]
    async fn optimize_promotes_candidate_that_clears_improvement_threshold() {
        let memory = Arc::new(ArtifactMemory::new(Arc::new(InMemoryVectorBackend::new())));
        let canonical = stored(&memory, vec![1.0, 0.0], 0.75, 5).await;
        let mut cluster = Cluster::new(vec![canonical.artifact_id.clone()]);

        let optimizer = ClusterOptimizer::new(Arc::clone(&memory));
        let outcome = optimizer
            .optimize(&mut cluster, &StubSynthesizer, &StubValidator { canonical_success: 0.75, candidate_success: 0.95 }, 1)
            .await
            .unwrap();

        assert_eq!(outcome.promotions, 1);
        assert_ne!(cluster.canonical_id, Some(canonical.artifact_id));
        assert_eq!(cluster.learned_patterns.values().map(|v| v.len()).sum::<usize>(), 1);
    }

    #[tokio::test]
    async fn optimize_stops_when_no_improvement_clears_threshold() {
        let memory = Arc::new(ArtifactMemory::new(Arc::new(InMemoryVectorBackend::new())));
        let canonical = stored(&memory, vec![1.0, 0.0], 0.75, 5).await;
        let mut cluster = Cluster::new(vec![canonical.artifact_id.clone()]);

        let optimizer = ClusterOptimizer::new(Arc::clone(&memory));
        let outcome = optimizer
            .optimize(&mut cluster, &StubSynthesizer, &StubValidator { canonical_success: 0.8, candidate_success: 0.81 }, 3)
            .await
            .unwrap();

        assert_eq!(outcome.promotions, 0);
        assert!(cluster.canonical_id.is_none());
    }
}
