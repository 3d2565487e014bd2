//! Resilience wrapper: circuit breaker + rate limiter + short-TTL cache around
//! one provider adapter
//!
//! Call order: breaker check (fail fast, no token spent) → token acquisition
//! bounded by the request deadline → fresh cache hit → real fetch.

use crate::circuit_breaker::{unix_millis, Admission, CircuitBreaker, CircuitBreakerConfig};
use crate::context::RequestContext;
use crate::error::ProviderError;
use crate::provider::ProviderAdapter;
use crate::rate_limiter::TokenBucket;
use crate::types::{CircuitState, ProviderHealth, ProviderRecord};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResilienceSettings {
    pub breaker: CircuitBreakerConfig,
    pub rate_limit_per_minute: u32,
    pub cache_ttl: Duration,
    pub call_timeout: Duration,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            rate_limit_per_minute: 60,
            cache_ttl: Duration::from_secs(300),
            call_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    record: ProviderRecord,
    stored_at: Instant,
}

#[derive(Debug)]
struct ProviderState {
    breaker: CircuitBreaker,
    cache: Option<CacheEntry>,
    last_latency: Option<Duration>,
    last_error: Option<String>,
}

pub struct ResilientProvider {
    adapter: Arc<dyn ProviderAdapter>,
    settings: ResilienceSettings,
    state: Mutex<ProviderState>,
    limiter: TokenBucket,
}

/// Hands the half-open trial slot back if the call ends without an outcome.
struct TrialSlot<'a> {
    provider: &'a ResilientProvider,
    armed: bool,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.provider.lock().breaker.release_trial();
        }
    }
}

impl ResilientProvider {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, settings: ResilienceSettings) -> Self {
        let breaker = CircuitBreaker::new(adapter.source_id(), settings.breaker);
        Self {
            limiter: TokenBucket::per_minute(settings.rate_limit_per_minute),
            state: Mutex::new(ProviderState {
                breaker,
                cache: None,
                last_latency: None,
                last_error: None,
            }),
            adapter,
            settings,
        }
    }

    pub fn source_id(&self) -> &str {
        self.adapter.source_id()
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn call(&self, ctx: &RequestContext) -> Result<ProviderRecord, ProviderError> {
        let admission = self.lock().breaker.admit(Instant::now());
        let admission = admission.map_err(|retry_in| {
            debug!("{}: circuit open, failing fast", self.source_id());
            ProviderError::CircuitOpen {
                retry_in_ms: retry_in.as_millis() as u64,
            }
        })?;
        let mut slot = TrialSlot {
            provider: self,
            armed: admission == Admission::Trial,
        };

        self.limiter.acquire(ctx).await?;

        if let Some(record) = self.fresh_cached(Instant::now()) {
            debug!("{}: serving cached record", self.source_id());
            return Ok(record);
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            _ = ctx.cancelled() => return Err(ProviderError::Cancelled),
            res = tokio::time::timeout(self.settings.call_timeout, self.adapter.fetch(ctx)) => res,
        };
        let finished = Instant::now();

        let mut state = self.lock();
        slot.armed = false;
        state.last_latency = Some(finished - started);

        match outcome {
            Ok(Ok(payload)) => {
                let record = ProviderRecord {
                    source_id: self.source_id().to_string(),
                    payload,
                    fetched_at: unix_millis(),
                    freshness_ttl_ms: self.settings.cache_ttl.as_millis() as u64,
                };
                state.cache = Some(CacheEntry {
                    record: record.clone(),
                    stored_at: finished,
                });
                state.last_error = None;
                state.breaker.record_success(admission);
                Ok(record)
            }
            Ok(Err(e)) => {
                let err = ProviderError::Transient(format!("{:#}", e));
                warn!("{}: {}", self.source_id(), err);
                state.last_error = Some(err.to_string());
                state.breaker.record_failure(admission, finished);
                Err(err)
            }
            Err(_) => {
                let err = ProviderError::CallTimeout(self.settings.call_timeout.as_millis() as u64);
                warn!("{}: {}", self.source_id(), err);
                state.last_error = Some(err.to_string());
                state.breaker.record_failure(admission, finished);
                Err(err)
            }
        }
    }

    fn fresh_cached(&self, now: Instant) -> Option<ProviderRecord> {
        let state = self.lock();
        state
            .cache
            .as_ref()
            .filter(|entry| now.saturating_duration_since(entry.stored_at) < self.settings.cache_ttl)
            .map(|entry| entry.record.clone())
    }

    pub fn has_fresh_cache(&self) -> bool {
        self.fresh_cached(Instant::now()).is_some()
    }

    pub fn state(&self) -> CircuitState {
        self.lock().breaker.state()
    }

    pub fn health(&self) -> ProviderHealth {
        let state = self.lock();
        ProviderHealth {
            source_id: self.source_id().to_string(),
            state: state.breaker.state(),
            consecutive_failures: state.breaker.consecutive_failures(),
            opened_at: state.breaker.opened_at_unix_ms(),
            next_retry_at: state.breaker.next_retry_at_unix_ms(),
            last_latency_ms: state.last_latency.map(|d| d.as_millis() as u64),
            last_error: state.last_error.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn available_tokens(&self) -> f64 {
        self.limiter.available_tokens()
    }
}
