//! Validator bridge: candidate drafts checked against the external
//! calculation oracle

use crate::context::RequestContext;
use crate::health::{ComponentHealth, LatencyProbe};
use crate::types::{BuildRecord, Candidate, DraftConfig, Payload, StatsEstimate};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Remote calculator computing authoritative stats for a draft.
#[async_trait]
pub trait CalculationOracle: Send + Sync {
    fn name(&self) -> &str;

    async fn calculate(&self, ctx: &RequestContext, draft: &DraftConfig) -> Result<Payload>;
}

#[derive(Debug, Deserialize)]
struct OracleStats {
    #[serde(alias = "total_dps", alias = "combined_dps")]
    dps: f64,
    #[serde(default)]
    life: f64,
    #[serde(default)]
    energy_shield: f64,
    #[serde(default)]
    ehp: Option<f64>,
}

/// Decode an oracle answer. EHP defaults to life + energy shield.
pub fn decode_stats(payload: &Payload) -> Result<StatsEstimate> {
    let raw: OracleStats = serde_json::from_value(serde_json::Value::Object(payload.clone()))?;
    let stats = StatsEstimate {
        dps: raw.dps,
        life: raw.life,
        energy_shield: raw.energy_shield,
        ehp: raw.ehp.unwrap_or(raw.life + raw.energy_shield),
    };
    if [stats.dps, stats.life, stats.energy_shield, stats.ehp]
        .iter()
        .any(|v| !v.is_finite() || *v < 0.0)
    {
        anyhow::bail!("oracle returned out-of-range stats: {:?}", stats);
    }
    Ok(stats)
}

/// Candidates after one validation batch
#[derive(Debug)]
pub struct BatchOutcome {
    pub candidates: Vec<Candidate>,
    /// Some candidates were left unvalidated by the deadline or a cancellation.
    pub interrupted: bool,
}

pub struct ValidatorBridge {
    oracle: Arc<dyn CalculationOracle>,
    max_concurrency: usize,
    probe: LatencyProbe,
}

impl ValidatorBridge {
    pub fn new(oracle: Arc<dyn CalculationOracle>, max_concurrency: usize) -> Self {
        Self {
            oracle,
            max_concurrency: max_concurrency.max(1),
            probe: LatencyProbe::new(),
        }
    }

    pub fn oracle_health(&self) -> ComponentHealth {
        self.probe.snapshot()
    }

    /// Returns a validated copy of `candidate`; failures end up in
    /// `validation_error` instead of an `Err`.
    pub async fn validate(&self, ctx: &RequestContext, candidate: &Candidate) -> Candidate {
        self.validate_one(ctx, candidate).await.0
    }

    async fn validate_one(&self, ctx: &RequestContext, candidate: &Candidate) -> (Candidate, bool) {
        let mut out = candidate.clone();
        out.validated = false;
        out.estimated_stats = None;

        if ctx.is_cancelled() {
            out.validation_error = Some("request cancelled before validation".to_string());
            return (out, true);
        }

        let started = Instant::now();
        let answer = tokio::select! {
            _ = ctx.cancelled() => {
                out.validation_error = Some("request cancelled during validation".to_string());
                return (out, true);
            }
            res = tokio::time::timeout_at(ctx.deadline(), self.oracle.calculate(ctx, &candidate.draft)) => res,
        };
        let elapsed = started.elapsed();

        let interrupted = match answer {
            Ok(Ok(payload)) => match decode_stats(&payload) {
                Ok(stats) => {
                    self.probe.record(true, elapsed);
                    out.validated = true;
                    out.estimated_stats = Some(stats);
                    out.validation_error = None;
                    false
                }
                Err(e) => {
                    self.probe.record(false, elapsed);
                    warn!("{}: unreadable answer for {}: {:#}", self.oracle.name(), out.id, e);
                    out.validation_error = Some(format!("unreadable oracle response: {:#}", e));
                    false
                }
            },
            Ok(Err(e)) => {
                self.probe.record(false, elapsed);
                warn!("{}: validation of {} failed: {:#}", self.oracle.name(), out.id, e);
                out.validation_error = Some(format!("{:#}", e));
                false
            }
            Err(_) => {
                self.probe.record(false, elapsed);
                debug!("{}: {} not validated before deadline", self.oracle.name(), out.id);
                out.validation_error = Some("oracle did not answer before the request deadline".to_string());
                true
            }
        };
        (out, interrupted)
    }

    /// Validate concurrently (at most `max_concurrency` oracle calls in
    /// flight). Output order matches input order.
    pub async fn validate_batch(&self, ctx: &RequestContext, candidates: Vec<Candidate>) -> BatchOutcome {
        let results: Vec<(Candidate, bool)> = stream::iter(candidates)
            .map(|c| async move { self.validate_one(ctx, &c).await })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let interrupted = results.iter().any(|(_, i)| *i);
        let candidates: Vec<Candidate> = results.into_iter().map(|(c, _)| c).collect();
        info!(
            "Validated {}/{} candidates{}",
            candidates.iter().filter(|c| c.validated).count(),
            candidates.len(),
            if interrupted { " (interrupted)" } else { "" }
        );
        BatchOutcome {
            candidates,
            interrupted,
        }
    }
}

#[derive(Debug, Clone)]
enum OracleBehavior {
    Fixed(StatsEstimate),
    /// Stats looked up by main skill; unknown skills fail.
    Table(HashMap<String, StatsEstimate>),
    Failing,
}

/// In-process oracle for tests and the mock server mode
pub struct MockOracle {
    behavior: OracleBehavior,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockOracle {
    fn with_behavior(behavior: OracleBehavior) -> Self {
        Self {
            behavior,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fixed(stats: StatsEstimate) -> Self {
        Self::with_behavior(OracleBehavior::Fixed(stats))
    }

    pub fn failing() -> Self {
        Self::with_behavior(OracleBehavior::Failing)
    }

    /// Answers with each main skill's best known stats from `builds`.
    pub fn from_builds(builds: &[BuildRecord]) -> Self {
        let mut table: HashMap<String, StatsEstimate> = HashMap::new();
        for build in builds {
            let stats = StatsEstimate::from_build(build);
            table
                .entry(build.main_skill.to_ascii_lowercase())
                .and_modify(|best| {
                    if stats.dps > best.dps {
                        *best = stats;
                    }
                })
                .or_insert(stats);
        }
        Self::with_behavior(OracleBehavior::Table(table))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalculationOracle for MockOracle {
    fn name(&self) -> &str {
        "mock-oracle"
    }

    async fn calculate(&self, _ctx: &RequestContext, draft: &DraftConfig) -> Result<Payload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let stats = match &self.behavior {
            OracleBehavior::Fixed(stats) => *stats,
            OracleBehavior::Table(table) => match table.get(&draft.main_skill.to_ascii_lowercase()) {
                Some(stats) => *stats,
                None => anyhow::bail!("no calculation data for {}", draft.main_skill),
            },
            OracleBehavior::Failing => anyhow::bail!("calculation oracle unavailable"),
        };
        match serde_json::to_value(stats)? {
            serde_json::Value::Object(map) => Ok(map),
            other => anyhow::bail!("unexpected stats encoding: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(id: &str, skill: &str) -> Candidate {
        Candidate {
            id: id.into(),
            derived_from: vec!["b".into()],
            variant_of: None,
            draft: DraftConfig {
                class: "Ranger".into(),
                ascendancy: None,
                main_skill: skill.into(),
                support_skills: vec![],
                weapon_type: "Bow".into(),
                keystones: vec![],
            },
            estimated_cost: 1.0,
            budget_relaxed: false,
            popularity_rank: 1,
            heuristic_stats: StatsEstimate::default(),
            estimated_stats: None,
            validated: false,
            validation_error: None,
        }
    }

    fn stats() -> StatsEstimate {
        StatsEstimate {
            dps: 2_000_000.0,
            life: 5_000.0,
            energy_shield: 1_000.0,
            ehp: 6_000.0,
        }
    }

    #[test]
    fn decodes_alternate_dps_field_names() {
        let payload = json!({"total_dps": 1500.0, "life": 10.0, "energy_shield": 5.0});
        let decoded = decode_stats(payload.as_object().unwrap()).unwrap();
        assert_eq!(decoded.dps, 1500.0);
        assert_eq!(decoded.ehp, 15.0);

        let bad = json!({"dps": -1.0});
        assert!(decode_stats(bad.as_object().unwrap()).is_err());
        assert!(decode_stats(json!({"life": 1.0}).as_object().unwrap()).is_err());
    }

    #[tokio::test]
    async fn success_attaches_stats_without_touching_input() {
        let bridge = ValidatorBridge::new(Arc::new(MockOracle::fixed(stats())), 2);
        let ctx = RequestContext::new(Duration::from_secs(1));
        let input = candidate("c1", "Tornado Shot");

        let out = bridge.validate(&ctx, &input).await;
        assert!(out.validated);
        assert_eq!(out.estimated_stats, Some(stats()));
        assert!(!input.validated);
        assert!(input.estimated_stats.is_none());
    }

    #[tokio::test]
    async fn oracle_failure_marks_candidate_unvalidated() {
        let bridge = ValidatorBridge::new(Arc::new(MockOracle::failing()), 2);
        let ctx = RequestContext::new(Duration::from_secs(1));

        let out = bridge.validate(&ctx, &candidate("c1", "Tornado Shot")).await;
        assert!(!out.validated);
        assert!(out.validation_attempted());
        assert!(out.validation_error.unwrap().contains("unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_oracle_degrades_only_its_candidates() {
        let oracle = Arc::new(MockOracle::fixed(stats()).with_delay(Duration::from_secs(3)));
        let bridge = ValidatorBridge::new(oracle.clone(), 4);
        let ctx = RequestContext::new(Duration::from_secs(1));

        let batch = vec![candidate("c1", "Arc"), candidate("c2", "Spark")];
        let outcome = bridge.validate_batch(&ctx, batch).await;
        assert!(outcome.interrupted);
        assert_eq!(outcome.candidates.len(), 2);
        assert!(outcome
            .candidates
            .iter()
            .all(|c| !c.validated && c.validation_attempted()));
        assert_eq!(oracle.calls(), 2);
    }

    #[tokio::test]
    async fn batch_keeps_order_and_mixes_outcomes() {
        let builds = vec![BuildRecord {
            id: "ts".into(),
            class: "Ranger".into(),
            ascendancy: None,
            main_skill: "Tornado Shot".into(),
            support_skills: vec![],
            weapon_type: "Bow".into(),
            keystones: vec![],
            dps: 3_000_000.0,
            life: 4_000.0,
            energy_shield: 0.0,
            cost: Some(8.0),
            popularity_rank: 1,
            embedding_vector: vec![],
        }];
        let bridge = ValidatorBridge::new(Arc::new(MockOracle::from_builds(&builds)), 1);
        let ctx = RequestContext::new(Duration::from_secs(1));

        let outcome = bridge
            .validate_batch(&ctx, vec![candidate("known", "tornado shot"), candidate("unknown", "Arc")])
            .await;
        assert!(!outcome.interrupted);
        assert_eq!(outcome.candidates[0].id, "known");
        assert!(outcome.candidates[0].validated);
        assert_eq!(outcome.candidates[0].estimated_stats.map(|s| s.ehp), Some(4_000.0));
        assert!(!outcome.candidates[1].validated);
        assert_eq!(bridge.oracle_health().status, crate::health::ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn batch_runs_on_spawned_task() {
        let bridge = Arc::new(ValidatorBridge::new(Arc::new(MockOracle::fixed(stats())), 2));
        let ctx = Arc::new(RequestContext::new(Duration::from_secs(1)));

        let handle = tokio::spawn({
            let bridge = bridge.clone();
            let ctx = ctx.clone();
            async move {
                bridge
                    .validate_batch(&ctx, vec![candidate("c1", "Arc"), candidate("c2", "Spark")])
                    .await
            }
        });
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.candidates.len(), 2);
        assert!(outcome.candidates.iter().all(|c| c.validated));
    }

    #[tokio::test]
    async fn cancelled_request_skips_oracle() {
        let oracle = Arc::new(MockOracle::fixed(stats()));
        let bridge = ValidatorBridge::new(oracle.clone(), 2);
        let ctx = RequestContext::new(Duration::from_secs(1));
        ctx.cancel();

        let outcome = bridge.validate_batch(&ctx, vec![candidate("c1", "Arc")]).await;
        assert!(outcome.interrupted);
        assert_eq!(oracle.calls(), 0);
        assert!(outcome.candidates[0].validation_attempted());
    }
}
