//! Core type definitions for build recommendation

use crate::catalog;
use crate::error::{ConfigError, RequestError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Opaque provider payload, already normalised by its adapter.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Result of one successful provider fetch. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub source_id: String,
    pub payload: Payload,
    pub fetched_at: i64,        // unix millis
    pub freshness_ttl_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Snapshot of one provider's breaker, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub source_id: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<i64>,     // unix millis
    pub next_retry_at: Option<i64>, // unix millis
    pub last_latency_ms: Option<u64>,
    pub last_error: Option<String>,
}

/// Knowledge base entry. Read-only at query time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: String,
    pub class: String,
    #[serde(default)]
    pub ascendancy: Option<String>,
    pub main_skill: String,
    #[serde(default)]
    pub support_skills: Vec<String>,
    #[serde(default)]
    pub weapon_type: String,
    #[serde(default)]
    pub keystones: Vec<String>,
    #[serde(default)]
    pub dps: f64,
    #[serde(default)]
    pub life: f64,
    #[serde(default)]
    pub energy_shield: f64,
    /// Last known price; `None` when no source has priced the build.
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default = "default_popularity_rank")]
    pub popularity_rank: u32,
    #[serde(default)]
    pub embedding_vector: Vec<f32>,
}

fn default_popularity_rank() -> u32 {
    u32::MAX
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildGoal {
    ClearSpeed,
    Bossing,
    Balanced,
    LeagueStart,
    Hardcore,
}

impl BuildGoal {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildGoal::ClearSpeed => "clear_speed",
            BuildGoal::Bossing => "bossing",
            BuildGoal::Balanced => "balanced",
            BuildGoal::LeagueStart => "league_start",
            BuildGoal::Hardcore => "hardcore",
        }
    }
}

impl fmt::Display for BuildGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryConstraints {
    #[serde(default)]
    pub min_dps: Option<f64>,
    #[serde(default)]
    pub min_ehp: Option<f64>,
    /// Maximum number of support gems on the main skill.
    #[serde(default)]
    pub max_complexity: Option<usize>,
}

/// One incoming recommendation request. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub class: String,
    #[serde(default)]
    pub ascendancy: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    pub goal: BuildGoal,
    pub budget_max: f64,
    #[serde(default)]
    pub constraints: QueryConstraints,
}

impl Query {
    pub fn new(class: impl Into<String>, goal: BuildGoal, budget_max: f64) -> Self {
        Self {
            class: class.into(),
            ascendancy: None,
            style: None,
            goal,
            budget_max,
            constraints: QueryConstraints::default(),
        }
    }

    pub fn with_ascendancy(mut self, ascendancy: impl Into<String>) -> Self {
        self.ascendancy = Some(ascendancy.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_constraints(mut self, constraints: QueryConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Check required fields and return a copy with canonical class and
    /// ascendancy spelling.
    pub fn validated(&self) -> Result<Query, RequestError> {
        let class = catalog::canonical_class(&self.class).ok_or_else(|| {
            RequestError::InvalidQuery(format!("unknown class '{}'", self.class))
        })?;

        let ascendancy = match self.ascendancy.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(asc) => Some(
                catalog::canonical_ascendancy(class, asc)
                    .ok_or_else(|| {
                        RequestError::InvalidQuery(format!(
                            "ascendancy '{}' does not belong to {}",
                            asc, class
                        ))
                    })?
                    .to_string(),
            ),
        };

        if !self.budget_max.is_finite() || self.budget_max < 0.0 {
            return Err(RequestError::InvalidQuery(format!(
                "budget_max must be a non-negative number, got {}",
                self.budget_max
            )));
        }

        let c = &self.constraints;
        for (name, value) in [("min_dps", c.min_dps), ("min_ehp", c.min_ehp)] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(RequestError::InvalidQuery(format!(
                        "{} must be a non-negative number, got {}",
                        name, v
                    )));
                }
            }
        }

        Ok(Query {
            class: class.to_string(),
            ascendancy,
            style: self.style.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            goal: self.goal,
            budget_max: self.budget_max,
            constraints: self.constraints.clone(),
        })
    }
}

/// A build returned by nearest-neighbour retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub build: Arc<BuildRecord>,
    pub similarity: f32, // [-1, 1]
}

/// Proposed configuration sent to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftConfig {
    pub class: String,
    pub ascendancy: Option<String>,
    pub main_skill: String,
    pub support_skills: Vec<String>,
    pub weapon_type: String,
    pub keystones: Vec<String>,
}

impl DraftConfig {
    /// Identity used to detect near-identical drafts.
    pub fn signature(&self) -> String {
        let mut supports: Vec<String> =
            self.support_skills.iter().map(|s| s.to_ascii_lowercase()).collect();
        supports.sort();
        let mut keystones: Vec<String> =
            self.keystones.iter().map(|k| k.to_ascii_lowercase()).collect();
        keystones.sort();
        format!(
            "{}|{}|{}|{}|{}",
            self.class.to_ascii_lowercase(),
            self.ascendancy.as_deref().unwrap_or("").to_ascii_lowercase(),
            self.main_skill.to_ascii_lowercase(),
            supports.join(","),
            keystones.join(",")
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsEstimate {
    pub dps: f64,
    pub life: f64,
    pub energy_shield: f64,
    /// Effective health pool.
    pub ehp: f64,
}

impl StatsEstimate {
    pub fn from_build(build: &BuildRecord) -> Self {
        Self {
            dps: build.dps,
            life: build.life,
            energy_shield: build.energy_shield,
            ehp: build.life + build.energy_shield,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: String,
    /// Ids of the builds this candidate was derived from. Never empty.
    pub derived_from: Vec<String>,
    /// Candidate this one is a synthetic variant of.
    pub variant_of: Option<String>,
    pub draft: DraftConfig,
    pub estimated_cost: f64,
    /// Set on synthetic variants whose cost ended up above the budget.
    pub budget_relaxed: bool,
    pub popularity_rank: u32,
    /// Stats carried over from the source build; used when unvalidated.
    pub heuristic_stats: StatsEstimate,
    pub estimated_stats: Option<StatsEstimate>,
    pub validated: bool,
    pub validation_error: Option<String>,
}

impl Candidate {
    /// True once the validator has either succeeded or recorded an error.
    pub fn validation_attempted(&self) -> bool {
        self.validated || self.validation_error.is_some()
    }

    /// Oracle stats when validated, heuristic estimate otherwise.
    pub fn effective_stats(&self) -> &StatsEstimate {
        match (&self.estimated_stats, self.validated) {
            (Some(stats), true) => stats,
            _ => &self.heuristic_stats,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub dps: f32,
    pub survivability: f32,
    pub budget_fit: f32,
    pub popularity: f32,
    pub ease: f32,
    /// Weighted sum before the unvalidated penalty.
    pub weighted: f32,
    /// Multiplier applied to `weighted` (1.0 when validated).
    pub penalty: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecommendation {
    pub candidate: Candidate,
    pub score: f32,
    pub score_breakdown: ScoreBreakdown,
    pub explanation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub dps: f32,
    pub survivability: f32,
    pub budget_fit: f32,
    pub popularity: f32,
    pub ease: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            dps: 0.3,
            survivability: 0.25,
            budget_fit: 0.2,
            popularity: 0.15,
            ease: 0.1,
        }
    }
}

impl ScoreWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("dps", self.dps),
            ("survivability", self.survivability),
            ("budget_fit", self.budget_fit),
            ("popularity", self.popularity),
            ("ease", self.ease),
        ];
        for (name, value) in named {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight { name, value });
            }
        }
        if named.iter().map(|(_, v)| v).sum::<f32>() <= 0.0 {
            return Err(ConfigError::ZeroWeights);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendOptions {
    pub max_recommendations: usize,
    pub max_candidates: usize,
}

impl Default for RecommendOptions {
    fn default() -> Self {
        Self {
            max_recommendations: 5,
            max_candidates: 8,
        }
    }
}

impl RecommendOptions {
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.max_recommendations == 0 {
            return Err(RequestError::InvalidOptions(
                "max_recommendations must be at least 1".to_string(),
            ));
        }
        if self.max_candidates == 0 {
            return Err(RequestError::InvalidOptions(
                "max_candidates must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Response envelope of one recommendation request
#[derive(Debug, Clone, Serialize)]
pub struct RecommendationResult {
    pub request_id: String,
    pub recommendations: Vec<ScoredRecommendation>,
    /// True when the deadline or a cancellation cut work short.
    pub partial: bool,
    pub provider_health: HashMap<String, ProviderHealth>,
    pub provider_errors: HashMap<String, String>,
    pub retrieval_hits: usize,
    pub elapsed_ms: u64,
}
