//! Scoring functions for recommendation candidates
//!
//! Every criterion is normalised to [0, 1] before weighting.

use crate::error::ConfigError;
use crate::types::{Candidate, ScoreBreakdown, ScoreWeights};
use serde::{Deserialize, Serialize};

/// Tunable normalisation constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceCeilings {
    /// DPS that scores 1.0.
    pub dps_ceiling: f64,
    /// Effective health pool that scores 1.0.
    pub ehp_ceiling: f64,
    /// Popularity rank that scores 0.5 (rank 1 always scores 1.0).
    pub popularity_half_rank: f64,
    /// Support gems tolerated before ease starts dropping.
    pub ease_baseline_supports: usize,
}

impl Default for ReferenceCeilings {
    fn default() -> Self {
        Self {
            dps_ceiling: 5_000_000.0,
            ehp_ceiling: 100_000.0,
            popularity_half_rank: 10.0,
            ease_baseline_supports: 4,
        }
    }
}

impl ReferenceCeilings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("dps_ceiling", self.dps_ceiling),
            ("ehp_ceiling", self.ehp_ceiling),
            ("popularity_half_rank", self.popularity_half_rank),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NonPositive(name));
            }
        }
        Ok(())
    }
}

fn clamp01(x: f64) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0) as f32
    }
}

pub fn dps_score(dps: f64, ceilings: &ReferenceCeilings) -> f32 {
    clamp01(dps / ceilings.dps_ceiling)
}

pub fn survivability_score(ehp: f64, ceilings: &ReferenceCeilings) -> f32 {
    clamp01(ehp / ceilings.ehp_ceiling)
}

/// `1 - cost / budget`; a zero budget fits nothing.
pub fn budget_fit_score(cost: f64, budget_max: f64) -> f32 {
    if budget_max <= 0.0 {
        return 0.0;
    }
    clamp01(1.0 - cost / budget_max)
}

/// `1 / (1 + (rank - 1) / half_rank)`
pub fn popularity_score(rank: u32, ceilings: &ReferenceCeilings) -> f32 {
    let excess = rank.max(1) as f64 - 1.0;
    clamp01(1.0 / (1.0 + excess / ceilings.popularity_half_rank))
}

/// `1 / (1 + supports beyond baseline)`
pub fn ease_score(support_count: usize, ceilings: &ReferenceCeilings) -> f32 {
    let extra = support_count.saturating_sub(ceilings.ease_baseline_supports);
    clamp01(1.0 / (1.0 + extra as f64))
}

/// Per-criterion scores of one candidate; `weighted` and `penalty` are left
/// for the caller.
pub fn criteria(candidate: &Candidate, budget_max: f64, ceilings: &ReferenceCeilings) -> ScoreBreakdown {
    let stats = candidate.effective_stats();
    ScoreBreakdown {
        dps: dps_score(stats.dps, ceilings),
        survivability: survivability_score(stats.ehp, ceilings),
        budget_fit: budget_fit_score(candidate.estimated_cost, budget_max),
        popularity: popularity_score(candidate.popularity_rank, ceilings),
        ease: ease_score(candidate.draft.support_skills.len(), ceilings),
        weighted: 0.0,
        penalty: 1.0,
    }
}

/// Compute base score from weighted criterion scores
pub fn weighted_sum(b: &ScoreBreakdown, weights: &ScoreWeights) -> f32 {
    weights.dps * b.dps
        + weights.survivability * b.survivability
        + weights.budget_fit * b.budget_fit
        + weights.popularity * b.popularity
        + weights.ease * b.ease
}
