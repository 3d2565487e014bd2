//! Candidate generation from retrieval hits, live market data and user
//! constraints

use crate::catalog;
use crate::market::MarketSnapshot;
use crate::types::{BuildRecord, Candidate, DraftConfig, ProviderRecord, Query, RetrievalHit, StatsEstimate};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Heuristic DPS retained by a variant after one support is downgraded.
const VARIANT_DPS_FACTOR: f64 = 0.95;

#[derive(Debug, Clone, Default)]
pub struct CandidateGenerator;

impl CandidateGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Deterministic for identical inputs: hits are consumed in the order
    /// given and market data is merged in source-id order.
    pub fn generate(
        &self,
        query: &Query,
        hits: &[RetrievalHit],
        market: &HashMap<String, ProviderRecord>,
        max_candidates: usize,
    ) -> Vec<Candidate> {
        let snapshot = MarketSnapshot::from_records(market);

        let seeds: Vec<Arc<BuildRecord>> = if hits.is_empty() {
            market_seeds(query, &snapshot, max_candidates)
        } else {
            hits.iter()
                .take(max_candidates)
                .map(|hit| hit.build.clone())
                .collect()
        };
        let seeded = seeds.len();

        let mut survivors: Vec<Candidate> = seeds
            .iter()
            .filter_map(|build| draft_candidate(query, build, &snapshot))
            .filter(|cand| within_limits(query, cand))
            .collect();

        if !survivors.is_empty() && survivors.len() < 2 {
            let room = max_candidates.saturating_sub(survivors.len());
            let variants = synthesize_variants(query, &survivors, &snapshot, room);
            survivors.extend(variants);
        }

        info!(
            "Generated {} candidates from {} seeds ({})",
            survivors.len(),
            seeded,
            if hits.is_empty() { "market" } else { "retrieval" }
        );
        survivors
    }
}

/// Market-reported builds ordered by class match, popularity, then id.
fn market_seeds(query: &Query, snapshot: &MarketSnapshot, limit: usize) -> Vec<Arc<BuildRecord>> {
    let mut builds: Vec<&BuildRecord> = snapshot.builds().iter().collect();
    builds.sort_by(|a, b| {
        let a_other = !a.class.eq_ignore_ascii_case(&query.class);
        let b_other = !b.class.eq_ignore_ascii_case(&query.class);
        a_other
            .cmp(&b_other)
            .then_with(|| a.popularity_rank.cmp(&b.popularity_rank))
            .then_with(|| a.id.cmp(&b.id))
    });
    builds
        .into_iter()
        .take(limit)
        .map(|b| Arc::new(b.clone()))
        .collect()
}

/// `None` when neither the market nor the record prices the build.
fn draft_candidate(query: &Query, build: &BuildRecord, snapshot: &MarketSnapshot) -> Option<Candidate> {
    let Some(estimated_cost) = snapshot.build_price(&build.id).or(build.cost) else {
        debug!("Dropping {}: no known price", build.id);
        return None;
    };

    let same_class = build.class.eq_ignore_ascii_case(&query.class);
    let ascendancy = match (&query.ascendancy, same_class) {
        (Some(asc), _) => Some(asc.clone()),
        (None, true) => build.ascendancy.clone(),
        (None, false) => None,
    };

    let keystones: Vec<String> = build
        .keystones
        .iter()
        .filter(|k| catalog::keystone_compatible(k, ascendancy.as_deref()))
        .cloned()
        .collect();
    if keystones.len() != build.keystones.len() || !same_class {
        debug!(
            "Adapted {} from {} to {} ({:?}), dropped {} keystones",
            build.id,
            build.class,
            query.class,
            ascendancy,
            build.keystones.len() - keystones.len()
        );
    }

    Some(Candidate {
        id: format!("cand-{}", build.id),
        derived_from: vec![build.id.clone()],
        variant_of: None,
        draft: DraftConfig {
            class: query.class.clone(),
            ascendancy,
            main_skill: build.main_skill.clone(),
            support_skills: build.support_skills.clone(),
            weapon_type: build.weapon_type.clone(),
            keystones,
        },
        estimated_cost,
        budget_relaxed: false,
        popularity_rank: build.popularity_rank,
        heuristic_stats: StatsEstimate::from_build(build),
        estimated_stats: None,
        validated: false,
        validation_error: None,
    })
}

fn within_limits(query: &Query, cand: &Candidate) -> bool {
    let reject = |reason: &str| {
        debug!("Dropping {}: {}", cand.id, reason);
        false
    };

    if !cand.estimated_cost.is_finite() || cand.estimated_cost > query.budget_max {
        return reject("over budget");
    }
    let c = &query.constraints;
    let stats = &cand.heuristic_stats;
    if c.min_dps.is_some_and(|min| stats.dps < min) {
        return reject("below min_dps");
    }
    if c.min_ehp.is_some_and(|min| stats.ehp < min) {
        return reject("below min_ehp");
    }
    if c.max_complexity
        .is_some_and(|max| cand.draft.support_skills.len() > max)
    {
        return reject("too many supports");
    }
    true
}

/// One variant per downgradable support of the cheapest survivor.
fn synthesize_variants(
    query: &Query,
    survivors: &[Candidate],
    snapshot: &MarketSnapshot,
    room: usize,
) -> Vec<Candidate> {
    let Some(base) = survivors.iter().min_by(|a, b| {
        a.estimated_cost
            .total_cmp(&b.estimated_cost)
            .then_with(|| a.id.cmp(&b.id))
    }) else {
        return Vec::new();
    };

    let mut variants = Vec::new();
    for (slot, gem) in base.draft.support_skills.iter().enumerate() {
        if variants.len() >= room {
            break;
        }
        let Some(alternative) = catalog::budget_alternative(gem) else {
            continue;
        };
        if base
            .draft
            .support_skills
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&alternative))
        {
            continue;
        }

        let mut draft = base.draft.clone();
        draft.support_skills[slot] = alternative.clone();

        let cost = match (snapshot.gem_price(gem), snapshot.gem_price(&alternative)) {
            (Some(old), Some(new)) => (base.estimated_cost - old + new).max(0.0),
            _ => base.estimated_cost,
        };
        let budget_relaxed = cost > query.budget_max;
        if budget_relaxed {
            warn!(
                "Variant of {} costs {:.2} over budget {:.2}; keeping it as a relaxed fallback",
                base.id, cost, query.budget_max
            );
        }

        let mut heuristic_stats = base.heuristic_stats;
        heuristic_stats.dps *= VARIANT_DPS_FACTOR;

        variants.push(Candidate {
            id: format!("{}-v{}", base.id, variants.len() + 1),
            derived_from: base.derived_from.clone(),
            variant_of: Some(base.id.clone()),
            draft,
            estimated_cost: cost,
            budget_relaxed,
            popularity_rank: base.popularity_rank,
            heuristic_stats,
            estimated_stats: None,
            validated: false,
            validation_error: None,
        });
        debug!("Synthesised variant swapping {} -> {}", gem, alternative);
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MarketData;
    use crate::types::{BuildGoal, QueryConstraints};

    fn build(id: &str, class: &str, skill: &str, cost: f64, rank: u32) -> BuildRecord {
        BuildRecord {
            id: id.into(),
            class: class.into(),
            ascendancy: None,
            main_skill: skill.into(),
            support_skills: vec![
                "Empower Support".into(),
                "Awakened Added Fire Damage Support".into(),
                "Faster Attacks Support".into(),
            ],
            weapon_type: "Bow".into(),
            keystones: vec![],
            dps: 1_000_000.0,
            life: 5_000.0,
            energy_shield: 0.0,
            cost: Some(cost),
            popularity_rank: rank,
            embedding_vector: vec![1.0],
        }
    }

    fn hit(build: BuildRecord, similarity: f32) -> RetrievalHit {
        RetrievalHit {
            build: Arc::new(build),
            similarity,
        }
    }

    fn market(source: &str, data: MarketData) -> HashMap<String, ProviderRecord> {
        let mut map = HashMap::new();
        map.insert(
            source.to_string(),
            ProviderRecord {
                source_id: source.to_string(),
                payload: data.into_payload(),
                fetched_at: 0,
                freshness_ttl_ms: 60_000,
            },
        );
        map
    }

    fn ranger(budget: f64) -> Query {
        Query::new("Ranger", BuildGoal::ClearSpeed, budget)
    }

    #[test]
    fn every_candidate_respects_budget_unless_relaxed() {
        let hits = vec![
            hit(build("a", "Ranger", "Lightning Arrow", 4.0, 1), 0.9),
            hit(build("b", "Ranger", "Tornado Shot", 12.0, 2), 0.8),
            hit(build("c", "Ranger", "Ice Shot", 9.0, 3), 0.7),
        ];
        let cands = CandidateGenerator::new().generate(&ranger(10.0), &hits, &HashMap::new(), 8);
        assert_eq!(cands.len(), 2);
        for c in &cands {
            assert!(c.estimated_cost <= 10.0 || c.budget_relaxed);
            assert!(!c.derived_from.is_empty());
        }
    }

    #[test]
    fn market_price_overrides_stored_cost() {
        let hits = vec![hit(build("a", "Ranger", "Lightning Arrow", 4.0, 1), 0.9)];
        let mut data = MarketData::default();
        data.build_prices.insert("a".into(), 25.0);

        let cands = CandidateGenerator::new().generate(&ranger(10.0), &hits, &market("ninja", data), 8);
        assert!(cands.is_empty());
    }

    #[test]
    fn unpriced_builds_are_never_free() {
        let mut mystery = build("mystery", "Ranger", "Rain of Arrows", 0.0, 1);
        mystery.cost = None;
        let mut data = MarketData::default();
        data.builds = vec![mystery.clone()];
        let market = market("poe-ninja", data);
        let gen = CandidateGenerator::new();

        assert!(gen.generate(&ranger(0.0), &[], &market, 8).is_empty());
        assert!(gen.generate(&ranger(10.0), &[], &market, 8).is_empty());
        assert!(gen
            .generate(&ranger(10.0), &[hit(mystery, 0.9)], &HashMap::new(), 8)
            .is_empty());
    }

    #[test]
    fn market_quote_prices_an_unpriced_build() {
        let mut mystery = build("mystery", "Ranger", "Rain of Arrows", 0.0, 1);
        mystery.cost = None;
        let mut data = MarketData::default();
        data.build_prices.insert("mystery".into(), 6.0);
        data.builds = vec![mystery];

        let cands = CandidateGenerator::new().generate(&ranger(10.0), &[], &market("poe-ninja", data), 1);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].estimated_cost, 6.0);
    }

    #[test]
    fn respects_max_candidates_and_hit_order() {
        let hits: Vec<_> = (0..5)
            .map(|i| hit(build(&format!("b{i}"), "Ranger", &format!("Skill {i}"), 1.0, i), 0.9))
            .collect();
        let cands = CandidateGenerator::new().generate(&ranger(10.0), &hits, &HashMap::new(), 3);
        let ids: Vec<_> = cands.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["cand-b0", "cand-b1", "cand-b2"]);
    }

    #[test]
    fn single_survivor_gets_budget_variants() {
        let hits = vec![hit(build("a", "Ranger", "Lightning Arrow", 4.0, 1), 0.9)];
        let mut data = MarketData::default();
        data.gem_prices.insert("Empower Support".into(), 3.0);
        data.gem_prices.insert("Inspiration Support".into(), 0.1);

        let cands = CandidateGenerator::new().generate(&ranger(10.0), &hits, &market("ninja", data), 8);
        assert_eq!(cands.len(), 3);

        let v1 = &cands[1];
        assert_eq!(v1.id, "cand-a-v1");
        assert_eq!(v1.variant_of.as_deref(), Some("cand-a"));
        assert_eq!(v1.derived_from, vec!["a".to_string()]);
        assert!(v1.draft.support_skills.contains(&"Inspiration Support".to_string()));
        assert!((v1.estimated_cost - 1.1).abs() < 1e-9);
        assert!(v1.heuristic_stats.dps < cands[0].heuristic_stats.dps);

        let v2 = &cands[2];
        assert!(v2.draft.support_skills.contains(&"Added Fire Damage Support".to_string()));
        assert!((v2.estimated_cost - 4.0).abs() < 1e-9);
    }

    #[test]
    fn variant_priced_over_budget_is_flagged() {
        let hits = vec![hit(build("a", "Ranger", "Lightning Arrow", 9.0, 1), 0.9)];
        let mut data = MarketData::default();
        data.gem_prices.insert("Empower Support".into(), 1.0);
        data.gem_prices.insert("Inspiration Support".into(), 5.0);

        let cands = CandidateGenerator::new().generate(&ranger(10.0), &hits, &market("ninja", data), 2);
        assert_eq!(cands.len(), 2);
        assert!(cands[1].budget_relaxed);
        assert!(cands[1].estimated_cost > 10.0);
    }

    #[test]
    fn zero_budget_yields_nothing() {
        let hits = vec![hit(build("a", "Ranger", "Lightning Arrow", 0.5, 1), 0.9)];
        let cands = CandidateGenerator::new().generate(&ranger(0.0), &hits, &HashMap::new(), 8);
        assert!(cands.is_empty());
    }

    #[test]
    fn cross_class_hit_is_adapted() {
        let mut witch = build("ek", "Witch", "Ethereal Knives", 2.0, 1);
        witch.ascendancy = Some("Elementalist".into());
        witch.keystones = vec!["Shaper of Flames".into(), "Elemental Overload".into()];

        let query = ranger(10.0).with_ascendancy("Deadeye");
        let cands = CandidateGenerator::new().generate(&query, &[hit(witch, 0.5)], &HashMap::new(), 1);
        let draft = &cands[0].draft;
        assert_eq!(draft.class, "Ranger");
        assert_eq!(draft.ascendancy.as_deref(), Some("Deadeye"));
        assert_eq!(draft.keystones, vec!["Elemental Overload".to_string()]);
        assert_eq!(draft.main_skill, "Ethereal Knives");
    }

    #[test]
    fn constraints_filter_drafts() {
        let mut weak = build("weak", "Ranger", "Split Arrow", 1.0, 1);
        weak.dps = 10_000.0;
        let strong = build("strong", "Ranger", "Tornado Shot", 1.0, 2);
        let hits = vec![hit(weak, 0.9), hit(strong, 0.8)];

        let query = ranger(10.0).with_constraints(QueryConstraints {
            min_dps: Some(500_000.0),
            min_ehp: None,
            max_complexity: None,
        });
        let cands = CandidateGenerator::new().generate(&query, &hits, &HashMap::new(), 8);
        assert!(cands.iter().all(|c| !c.derived_from.contains(&"weak".to_string())));

        let query = ranger(10.0).with_constraints(QueryConstraints {
            max_complexity: Some(2),
            ..Default::default()
        });
        assert!(CandidateGenerator::new()
            .generate(&query, &hits, &HashMap::new(), 8)
            .is_empty());
    }

    #[test]
    fn market_builds_seed_when_retrieval_is_empty() {
        let mut data = MarketData::default();
        data.builds = vec![
            build("witch-1", "Witch", "Arc", 1.0, 1),
            build("ranger-9", "Ranger", "Ice Shot", 1.0, 9),
            build("ranger-2", "Ranger", "Tornado Shot", 1.0, 2),
        ];
        let cands = CandidateGenerator::new().generate(&ranger(10.0), &[], &market("poe-ninja", data), 2);
        let seeds: Vec<_> = cands.iter().map(|c| c.derived_from[0].as_str()).collect();
        assert_eq!(seeds, vec!["ranger-2", "ranger-9"]);
    }

    #[test]
    fn generation_is_deterministic() {
        let hits = vec![
            hit(build("a", "Ranger", "Lightning Arrow", 4.0, 1), 0.9),
            hit(build("b", "Ranger", "Tornado Shot", 5.0, 2), 0.8),
        ];
        let gen = CandidateGenerator::new();
        assert_eq!(
            gen.generate(&ranger(10.0), &hits, &HashMap::new(), 8),
            gen.generate(&ranger(10.0), &hits, &HashMap::new(), 8)
        );
    }
}
