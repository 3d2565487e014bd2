//! Retrieval engine: query → text → embedding → nearest historical builds

use crate::context::RequestContext;
use crate::error::RetrievalError;
use crate::health::{ComponentHealth, LatencyProbe};
use crate::types::{BuildRecord, Query, RetrievalHit};
use crate::vector_index::VectorIndex;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Turns text into a fixed-length vector. The dimension must stay the same
/// for every call within one deployment.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic feature-hashing embedder (signed bag of words).
///
/// Used in mock mode and tests, and to embed a knowledge base offline when no
/// embedding service is available.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let slot = (h % self.dimension as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[slot] += sign;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        "feature-hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Text fed to the embedder. Field order is fixed (class, ascendancy, style,
/// goal, budget) so equal queries always embed identically.
pub fn describe_query(query: &Query) -> String {
    format!(
        "class: {}; ascendancy: {}; style: {}; goal: {}; budget: {}",
        query.class,
        query.ascendancy.as_deref().unwrap_or("any"),
        query.style.as_deref().unwrap_or("any"),
        query.goal.as_str().replace('_', " "),
        query.budget_max
    )
}

/// Text used when embedding a knowledge-base build with the same embedder.
pub fn describe_build(build: &BuildRecord) -> String {
    format!(
        "class: {}; ascendancy: {}; style: {} {} {}; keystones: {}",
        build.class,
        build.ascendancy.as_deref().unwrap_or("any"),
        build.main_skill,
        build.weapon_type,
        build.support_skills.join(" "),
        build.keystones.join(" ")
    )
}

pub struct RetrievalEngine {
    index: Arc<VectorIndex>,
    embedder_probe: LatencyProbe,
}

impl RetrievalEngine {
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self {
            index,
            embedder_probe: LatencyProbe::new(),
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn embedder_health(&self) -> ComponentHealth {
        self.embedder_probe.snapshot()
    }

    /// Top-`k` similar builds for `query`. The embedding call is bounded by
    /// the request deadline and aborted on cancellation.
    pub async fn retrieve(
        &self,
        ctx: &RequestContext,
        query: &Query,
        embedder: &dyn Embedder,
        k: usize,
    ) -> Result<Vec<RetrievalHit>, RetrievalError> {
        let text = describe_query(query);
        debug!("Embedding query with {}: {}", embedder.model_id(), text);

        let started = Instant::now();
        let embedded = tokio::select! {
            _ = ctx.cancelled() => return Err(RetrievalError::Cancelled),
            res = tokio::time::timeout_at(ctx.deadline(), embedder.embed(&text)) => res,
        };

        let vector = match embedded {
            Ok(Ok(vector)) => {
                self.embedder_probe.record(true, started.elapsed());
                vector
            }
            Ok(Err(e)) => {
                self.embedder_probe.record(false, started.elapsed());
                warn!("Embedder {} failed: {:#}", embedder.model_id(), e);
                return Err(RetrievalError::EmbeddingUnavailable(format!("{:#}", e)));
            }
            Err(_) => {
                self.embedder_probe.record(false, started.elapsed());
                return Err(RetrievalError::DeadlineExceeded);
            }
        };

        let hits = self.index.query(&vector, k)?;
        debug!(
            "Retrieved {} builds (best similarity {:?})",
            hits.len(),
            hits.first().map(|h| h.similarity)
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildGoal;
    use std::time::Duration;

    struct SlowEmbedder;

    #[async_trait]
    impl Embedder for SlowEmbedder {
        fn model_id(&self) -> &str {
            "slow"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![1.0])
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn model_id(&self) -> &str {
            "broken"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            anyhow::bail!("connection refused")
        }
    }

    fn kb(embedder: &HashingEmbedder) -> Arc<VectorIndex> {
        let builds = [
            ("la-deadeye", "Ranger", "Deadeye", "Lightning Arrow", "Bow", 3),
            ("ts-deadeye", "Ranger", "Deadeye", "Tornado Shot", "Bow", 1),
            ("ek-elem", "Witch", "Elementalist", "Ethereal Knives", "Wand", 2),
        ];
        let mut index = VectorIndex::new();
        for (id, class, asc, skill, weapon, rank) in builds {
            let mut record = BuildRecord {
                id: id.into(),
                class: class.into(),
                ascendancy: Some(asc.into()),
                main_skill: skill.into(),
                support_skills: vec![],
                weapon_type: weapon.into(),
                keystones: vec![],
                dps: 0.0,
                life: 0.0,
                energy_shield: 0.0,
                cost: Some(1.0),
                popularity_rank: rank,
                embedding_vector: vec![],
            };
            record.embedding_vector = embedder.vectorize(&describe_build(&record));
            index.insert(record).unwrap();
        }
        Arc::new(index)
    }

    #[test]
    fn query_description_has_fixed_field_order() {
        let q = Query::new("Ranger", BuildGoal::ClearSpeed, 10.0).with_ascendancy("Deadeye");
        assert_eq!(
            describe_query(&q),
            "class: Ranger; ascendancy: Deadeye; style: any; goal: clear speed; budget: 10"
        );
    }

    #[tokio::test]
    async fn identical_queries_return_identical_hits() {
        let embedder = HashingEmbedder::new(64);
        let engine = RetrievalEngine::new(kb(&embedder));
        let ctx = RequestContext::new(Duration::from_secs(1));
        let q = Query::new("Ranger", BuildGoal::ClearSpeed, 10.0).with_ascendancy("Deadeye");

        let first = engine.retrieve(&ctx, &q, &embedder, 3).await.unwrap();
        let second = engine.retrieve(&ctx, &q, &embedder, 3).await.unwrap();
        let ids = |hits: &[RetrievalHit]| {
            hits.iter()
                .map(|h| (h.build.id.clone(), h.similarity))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.len(), 3);
        assert_ne!(first[0].build.class, "Witch");
        assert_eq!(engine.embedder_health().status, crate::health::ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn embedder_failure_is_reported() {
        let engine = RetrievalEngine::new(kb(&HashingEmbedder::new(64)));
        let ctx = RequestContext::new(Duration::from_secs(1));
        let q = Query::new("Witch", BuildGoal::Bossing, 5.0);

        let err = engine.retrieve(&ctx, &q, &BrokenEmbedder, 3).await.unwrap_err();
        assert!(matches!(err, RetrievalError::EmbeddingUnavailable(msg) if msg.contains("refused")));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_embedder_is_cut_at_deadline() {
        let engine = RetrievalEngine::new(kb(&HashingEmbedder::new(64)));
        let ctx = RequestContext::new(Duration::from_secs(2));
        let q = Query::new("Witch", BuildGoal::Bossing, 5.0);

        let err = engine.retrieve(&ctx, &q, &SlowEmbedder, 3).await.unwrap_err();
        assert!(matches!(err, RetrievalError::DeadlineExceeded));
        assert!(ctx.is_expired());
    }
}
