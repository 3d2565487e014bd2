//! Concurrent fan-out across all wrapped providers

use crate::context::RequestContext;
use crate::error::ProviderError;
use crate::resilience::ResilientProvider;
use crate::types::{ProviderHealth, ProviderRecord};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Partial results of one fan-out
#[derive(Debug, Default)]
pub struct AggregateOutcome {
    pub records: HashMap<String, ProviderRecord>,
    pub errors: HashMap<String, ProviderError>,
    /// At least one provider was abandoned at the request deadline.
    pub deadline_hit: bool,
}

/// Owns one resilience wrapper per provider for the life of the process.
pub struct Aggregator {
    providers: Vec<Arc<ResilientProvider>>,
    outbound: Arc<Semaphore>,
}

impl Aggregator {
    /// `max_outbound` caps concurrent provider calls across all requests.
    pub fn new(providers: Vec<Arc<ResilientProvider>>, max_outbound: usize) -> Self {
        Self {
            providers,
            outbound: Arc::new(Semaphore::new(max_outbound.max(1))),
        }
    }

    /// Query every provider concurrently. A provider still running at the
    /// deadline is left to finish in the background (it may still refresh its
    /// cache and health) but its answer is not part of this outcome.
    pub async fn fetch_all(&self, ctx: &Arc<RequestContext>) -> AggregateOutcome {
        let start = Instant::now();
        let deadline = ctx.deadline();

        let mut tasks = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let provider = provider.clone();
            let outbound = self.outbound.clone();
            let ctx = ctx.clone();
            let source_id = provider.source_id().to_string();

            let handle = tokio::spawn(async move {
                let _permit = tokio::select! {
                    permit = outbound.acquire_owned() => permit
                        .map_err(|e| ProviderError::Internal(e.to_string()))?,
                    _ = ctx.cancelled() => return Err(ProviderError::Cancelled),
                };
                provider.call(&ctx).await
            });

            tasks.push(async move {
                let res = tokio::time::timeout_at(deadline, handle).await;
                (source_id, res)
            });
        }

        let results = futures::future::join_all(tasks).await;

        let mut outcome = AggregateOutcome::default();
        for (source_id, res) in results {
            match res {
                Ok(Ok(Ok(record))) => {
                    debug!("Provider {} answered", source_id);
                    outcome.records.insert(source_id, record);
                }
                Ok(Ok(Err(e))) => {
                    if e.counts_as_failure() {
                        warn!("Provider {} unavailable: {}", source_id, e);
                    } else {
                        debug!("Provider {} skipped: {}", source_id, e);
                    }
                    outcome.errors.insert(source_id, e);
                }
                Ok(Err(join_err)) => {
                    warn!("Provider {} task failed: {}", source_id, join_err);
                    outcome
                        .errors
                        .insert(source_id, ProviderError::Internal(join_err.to_string()));
                }
                Err(_) => {
                    warn!("Provider {} abandoned at request deadline", source_id);
                    outcome.deadline_hit = true;
                    outcome.errors.insert(source_id, ProviderError::DeadlineExceeded);
                }
            }
        }

        info!(
            "Aggregated {} providers: {} ok, {} failed in {}ms",
            self.providers.len(),
            outcome.records.len(),
            outcome.errors.len(),
            start.elapsed().as_millis()
        );

        outcome
    }

    pub fn health(&self) -> HashMap<String, ProviderHealth> {
        self.providers
            .iter()
            .map(|p| (p.source_id().to_string(), p.health()))
            .collect()
    }
}
