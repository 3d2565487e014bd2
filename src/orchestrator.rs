//! Orchestrator: per-request coordination of aggregation, retrieval,
//! generation, validation and ranking under one deadline

use crate::aggregator::Aggregator;
use crate::candidates::CandidateGenerator;
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::error::{RequestError, RetrievalError};
use crate::health::{ComponentHealth, ComponentStatus};
use crate::provider::ProviderAdapter;
use crate::ranker::Ranker;
use crate::resilience::ResilientProvider;
use crate::retrieval::{Embedder, RetrievalEngine};
use crate::types::{BuildRecord, Query, RecommendOptions, RecommendationResult};
use crate::validator::{CalculationOracle, ValidatorBridge};
use crate::vector_index::VectorIndex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Request lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Received,
    Aggregating,
    Retrieving,
    Generating,
    Validating,
    Ranking,
    Completed,
    Failed,
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStage::Received => "received",
            RequestStage::Aggregating => "aggregating",
            RequestStage::Retrieving => "retrieving",
            RequestStage::Generating => "generating",
            RequestStage::Validating => "validating",
            RequestStage::Ranking => "ranking",
            RequestStage::Completed => "completed",
            RequestStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct StageTracker<'a> {
    request_id: &'a str,
    stage: RequestStage,
}

impl StageTracker<'_> {
    fn advance(&mut self, next: RequestStage) {
        debug!("[{}] {} -> {}", self.request_id, self.stage, next);
        self.stage = next;
    }

    fn fail(&mut self, err: RequestError) -> RequestError {
        warn!("[{}] failed while {}: {}", self.request_id, self.stage, err);
        self.stage = RequestStage::Failed;
        err
    }
}

/// Main recommendation engine (thread-safe via Arc)
pub struct Orchestrator {
    config: EngineConfig,
    aggregator: Aggregator,
    retrieval: RetrievalEngine,
    embedder: Arc<dyn Embedder>,
    generator: CandidateGenerator,
    validator: ValidatorBridge,
    ranker: Ranker,
}

pub type SharedOrchestrator = Arc<Orchestrator>;

impl Orchestrator {
    /// Validate the configuration and load the knowledge base. Nothing is
    /// loaded lazily afterwards.
    pub fn new(
        config: EngineConfig,
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        knowledge_base: Vec<BuildRecord>,
        embedder: Arc<dyn Embedder>,
        oracle: Arc<dyn CalculationOracle>,
    ) -> Result<Self, RequestError> {
        let mut index = VectorIndex::new();
        index.bulk_load(knowledge_base)?;
        Self::with_index(config, adapters, Arc::new(index), embedder, oracle)
    }

    pub fn with_index(
        config: EngineConfig,
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        oracle: Arc<dyn CalculationOracle>,
    ) -> Result<Self, RequestError> {
        config.validate()?;
        let ranker = Ranker::new(
            config.score_weights,
            config.unvalidated_penalty,
            config.reference_ceilings,
        )?;

        let providers = adapters
            .into_iter()
            .map(|adapter| {
                let settings = config.resilience_for(adapter.source_id());
                Arc::new(ResilientProvider::new(adapter, settings))
            })
            .collect::<Vec<_>>();
        info!(
            "Orchestrator ready: {} providers, {} indexed builds, embedder {}, oracle {}",
            providers.len(),
            index.len(),
            embedder.model_id(),
            oracle.name()
        );

        Ok(Self {
            aggregator: Aggregator::new(providers, config.max_outbound_calls),
            retrieval: RetrievalEngine::new(index),
            embedder,
            generator: CandidateGenerator::new(),
            validator: ValidatorBridge::new(oracle, config.max_concurrent_validations),
            ranker,
            config,
        })
    }

    /// Run one request with a fresh context bounded by `request_timeout`.
    pub async fn recommend(
        &self,
        query: &Query,
        options: RecommendOptions,
    ) -> Result<RecommendationResult, RequestError> {
        let ctx = RequestContext::new(self.config.request_timeout());
        self.generate_recommendations(ctx, query, options).await
    }

    /// Main entry point. Only malformed input is an `Err`; degraded
    /// dependencies, deadline expiry and cancellation produce a (possibly
    /// partial, possibly empty) result.
    pub async fn generate_recommendations(
        &self,
        ctx: Arc<RequestContext>,
        query: &Query,
        options: RecommendOptions,
    ) -> Result<RecommendationResult, RequestError> {
        let started = Instant::now();
        let mut stage = StageTracker {
            request_id: ctx.request_id(),
            stage: RequestStage::Received,
        };

        info!(
            "[{}] Recommendation request: class={}, goal={}, budget={}",
            ctx.request_id(),
            query.class,
            query.goal,
            query.budget_max
        );
        if let Err(e) = options.validate() {
            return Err(stage.fail(e));
        }
        let query = match query.validated() {
            Ok(q) => q,
            Err(e) => return Err(stage.fail(e)),
        };
        let mut partial = false;

        stage.advance(RequestStage::Aggregating);
        let market = self.aggregator.fetch_all(&ctx).await;
        partial |= market.deadline_hit;

        stage.advance(RequestStage::Retrieving);
        let hits = if ctx.is_cancelled() || ctx.is_expired() {
            partial = true;
            Vec::new()
        } else {
            match self
                .retrieval
                .retrieve(&ctx, &query, self.embedder.as_ref(), options.max_candidates)
                .await
            {
                Ok(hits) => hits,
                Err(RetrievalError::EmbeddingUnavailable(reason)) => {
                    warn!(
                        "[{}] Proceeding without retrieval context: {}",
                        ctx.request_id(),
                        reason
                    );
                    Vec::new()
                }
                Err(RetrievalError::DeadlineExceeded) | Err(RetrievalError::Cancelled) => {
                    partial = true;
                    Vec::new()
                }
                Err(RetrievalError::Index(e)) => return Err(stage.fail(e.into())),
            }
        };

        stage.advance(RequestStage::Generating);
        let candidates =
            self.generator
                .generate(&query, &hits, &market.records, options.max_candidates);

        stage.advance(RequestStage::Validating);
        let batch = self.validator.validate_batch(&ctx, candidates).await;
        partial |= batch.interrupted;

        stage.advance(RequestStage::Ranking);
        let recommendations =
            self.ranker
                .rank(batch.candidates, query.budget_max, options.max_recommendations);

        partial |= ctx.is_cancelled();
        stage.advance(RequestStage::Completed);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "[{}] Completed: {} recommendations, {} hits, {} provider errors, partial={} ({}ms)",
            ctx.request_id(),
            recommendations.len(),
            hits.len(),
            market.errors.len(),
            partial,
            elapsed_ms
        );

        Ok(RecommendationResult {
            request_id: ctx.request_id().to_string(),
            recommendations,
            partial,
            provider_health: self.aggregator.health(),
            provider_errors: market
                .errors
                .iter()
                .map(|(id, e)| (id.clone(), e.to_string()))
                .collect(),
            retrieval_hits: hits.len(),
            elapsed_ms,
        })
    }

    /// Read-only snapshot; never calls a dependency.
    pub fn health_check(&self) -> BTreeMap<String, ComponentHealth> {
        let mut report: BTreeMap<String, ComponentHealth> = self
            .aggregator
            .health()
            .iter()
            .map(|(id, h)| (format!("provider:{}", id), ComponentHealth::from(h)))
            .collect();

        let index = self.retrieval.index();
        report.insert(
            "vector_index".to_string(),
            ComponentHealth {
                status: if index.is_empty() {
                    ComponentStatus::Degraded
                } else {
                    ComponentStatus::Healthy
                },
                latency_ms: None,
            },
        );
        report.insert("embedder".to_string(), self.retrieval.embedder_health());
        report.insert("oracle".to_string(), self.validator.oracle_health());
        report
    }
}
