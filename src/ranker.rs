//! Multi-criteria ranking with near-duplicate removal and a skill-diversity
//! pass

use crate::error::ConfigError;
use crate::scoring::{criteria, weighted_sum, ReferenceCeilings};
use crate::types::{Candidate, ScoreBreakdown, ScoreWeights, ScoredRecommendation};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Ranker {
    weights: ScoreWeights,
    unvalidated_penalty: f32,
    ceilings: ReferenceCeilings,
}

impl Ranker {
    pub fn new(
        weights: ScoreWeights,
        unvalidated_penalty: f32,
        ceilings: ReferenceCeilings,
    ) -> Result<Self, ConfigError> {
        weights.validate()?;
        ceilings.validate()?;
        if !(0.0..=1.0).contains(&unvalidated_penalty) {
            return Err(ConfigError::InvalidPenalty(unvalidated_penalty));
        }
        Ok(Self {
            weights,
            unvalidated_penalty,
            ceilings,
        })
    }

    pub fn score(&self, candidate: &Candidate, budget_max: f64) -> ScoreBreakdown {
        let mut breakdown = criteria(candidate, budget_max, &self.ceilings);
        breakdown.weighted = weighted_sum(&breakdown, &self.weights);
        breakdown.penalty = if candidate.validated {
            1.0
        } else {
            self.unvalidated_penalty
        };
        breakdown
    }

    /// Candidates that never went through validation are skipped.
    pub fn rank(
        &self,
        candidates: Vec<Candidate>,
        budget_max: f64,
        max_recommendations: usize,
    ) -> Vec<ScoredRecommendation> {
        let total = candidates.len();
        let mut scored: Vec<ScoredRecommendation> = candidates
            .into_iter()
            .filter(Candidate::validation_attempted)
            .map(|candidate| {
                let breakdown = self.score(&candidate, budget_max);
                let score = breakdown.weighted * breakdown.penalty;
                ScoredRecommendation {
                    explanation: explain_candidate(&candidate, &breakdown, score),
                    candidate,
                    score,
                    score_breakdown: breakdown,
                }
            })
            .collect();
        if scored.len() < total {
            debug!("Skipped {} candidates that were never validated", total - scored.len());
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.candidate.popularity_rank.cmp(&b.candidate.popularity_rank))
                .then_with(|| a.candidate.id.cmp(&b.candidate.id))
        });

        // Near-duplicates: keep the higher-scored draft.
        let mut signatures = HashSet::new();
        scored.retain(|rec| {
            let fresh = signatures.insert(rec.candidate.draft.signature());
            if !fresh {
                debug!("Dropping near-duplicate {}", rec.candidate.id);
            }
            fresh
        });

        // Diversity: a repeated main skill goes behind every distinct one.
        let mut seen_skills = HashSet::new();
        let (mut ranked, demoted): (Vec<_>, Vec<_>) = scored
            .into_iter()
            .partition(|rec| seen_skills.insert(rec.candidate.draft.main_skill.to_ascii_lowercase()));
        ranked.extend(demoted);

        ranked.truncate(max_recommendations);
        ranked
    }
}

fn explain_candidate(cand: &Candidate, b: &ScoreBreakdown, final_score: f32) -> String {
    let mut reasons = Vec::new();

    let stats = cand.effective_stats();
    if b.dps > 0.5 {
        reasons.push(format!("strong damage: {:.0} dps", stats.dps));
    }
    if b.survivability > 0.5 {
        reasons.push(format!("tanky: {:.0} ehp", stats.ehp));
    }
    if b.budget_fit > 0.5 {
        reasons.push(format!("well under budget: {:.1}", cand.estimated_cost));
    }
    if b.popularity > 0.5 {
        reasons.push(format!("popular: rank {}", cand.popularity_rank));
    }
    if b.ease < 1.0 {
        reasons.push(format!("complex: {} supports", cand.draft.support_skills.len()));
    }
    if let Some(ref base) = cand.variant_of {
        reasons.push(format!("budget variant of {}", base));
    }
    if cand.budget_relaxed {
        reasons.push("exceeds budget (relaxed fallback)".to_string());
    }
    if !cand.validated {
        reasons.push(format!(
            "unvalidated ({}), x{:.2} penalty",
            cand.validation_error.as_deref().unwrap_or("no oracle answer"),
            b.penalty
        ));
    }

    reasons.push(format!("final score: {:.2}", final_score));

    format!("{} {}: {}", cand.draft.main_skill, cand.draft.class, reasons.join("; "))
}
