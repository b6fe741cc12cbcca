//! Combined rank: `rank = w_u·u + w_s·s + w_q·q`, biasing
//! retrieval toward proven patterns while still surfacing new-but-similar
//! items.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CombinedRankWeights {
    pub usage: f32,
    pub similarity: f32,
    pub quality: f32,
}

impl Default for CombinedRankWeights {
    fn default() -> Self {
        Self { usage: 10.0, similarity: 1.0, quality: 0.1 }
    }
}

/// `rank = w_u · usage_count + w_s · similarity + w_q · quality_score`.
pub fn combined_rank(weights: CombinedRankWeights, usage_count: u64, similarity: f32, quality_score: f32) -> f32 {
    weights.usage * usage_count as f32 + weights.similarity * similarity + weights.quality * quality_score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_favor_usage_over_similarity() {
        let weights = CombinedRankWeights::default();
        let proven = combined_rank(weights, 5, 0.8, 0.9);
        let novel = combined_rank(weights, 0, 0.95, 0.9);
        assert!(proven > novel, "a proven artifact with slightly lower similarity should outrank a brand-new one");
    }
}
