//! C4 Artifact Memory, C9 Cluster Optimizer, C11 Reuse Layer.

pub mod artifact;
pub mod cluster;
pub mod error;
pub mod fix_pattern;
pub mod rank;
pub mod reuse;
pub mod store;
pub mod vector_backend;

pub use artifact::{Artifact, ArtifactKind, ArtifactStatus, OptimizationWeights};
pub use cluster::{
    CandidateStrategy, CandidateSynthesizer, CandidateValidator, Cluster, ClusterOptimizer, FitnessMetrics, FitnessWeights, LearnedPattern,
    OptimizationOutcome, TrimDecision, TrimPolicy,
};
pub use error::MemoryError;
pub use fix_pattern::{FixPattern, Scope};
pub use rank::{CombinedRankWeights, combined_rank};
pub use reuse::{ReuseDecision, ReuseLayer};
pub use store::{ArtifactMemory, RankedArtifact};
pub use vector_backend::{InMemoryVectorBackend, VectorBackend};
