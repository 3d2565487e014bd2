//! Engine configuration: optional JSON file plus `BUILDSMITH_*` environment
//! overrides

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::ConfigError;
use crate::resilience::ResilienceSettings;
use crate::scoring::ReferenceCeilings;
use crate::types::ScoreWeights;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Per-provider tuning; unset fields fall back to the engine-wide values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderOverride {
    pub rate_limit_per_minute: Option<u32>,
    pub cache_ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub rate_limit_per_minute: u32,
    pub cache_ttl_ms: u64,
    pub provider_call_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// System-wide cap on concurrent outbound provider calls.
    pub max_outbound_calls: usize,
    pub max_concurrent_validations: usize,
    pub score_weights: ScoreWeights,
    pub unvalidated_penalty: f32,
    pub reference_ceilings: ReferenceCeilings,
    pub providers: HashMap<String, ProviderOverride>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_ms: 30_000,
            rate_limit_per_minute: 60,
            cache_ttl_ms: 300_000,
            provider_call_timeout_ms: 10_000,
            request_timeout_ms: 15_000,
            max_outbound_calls: 16,
            max_concurrent_validations: 4,
            score_weights: ScoreWeights::default(),
            unvalidated_penalty: 0.7,
            reference_ceilings: ReferenceCeilings::default(),
            providers: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// `BUILDSMITH_CONFIG` (if set) names the base file; individual variables
    /// override it.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("BUILDSMITH_CONFIG") {
            Ok(path) => {
                info!("Loading engine config from {}", path);
                Self::from_json_file(path)?
            }
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        override_from(&lookup, "BUILDSMITH_FAILURE_THRESHOLD", &mut self.failure_threshold)?;
        override_from(&lookup, "BUILDSMITH_RECOVERY_TIMEOUT_MS", &mut self.recovery_timeout_ms)?;
        override_from(&lookup, "BUILDSMITH_RATE_LIMIT_PER_MINUTE", &mut self.rate_limit_per_minute)?;
        override_from(&lookup, "BUILDSMITH_CACHE_TTL_MS", &mut self.cache_ttl_ms)?;
        override_from(&lookup, "BUILDSMITH_PROVIDER_CALL_TIMEOUT_MS", &mut self.provider_call_timeout_ms)?;
        override_from(&lookup, "BUILDSMITH_REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms)?;
        override_from(&lookup, "BUILDSMITH_MAX_OUTBOUND_CALLS", &mut self.max_outbound_calls)?;
        override_from(&lookup, "BUILDSMITH_MAX_CONCURRENT_VALIDATIONS", &mut self.max_concurrent_validations)?;
        override_from(&lookup, "BUILDSMITH_UNVALIDATED_PENALTY", &mut self.unvalidated_penalty)?;
        Ok(())
    }

    /// Fatal misconfiguration, checked once before any request is served.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.score_weights.validate()?;
        self.reference_ceilings.validate()?;
        if !(0.0..=1.0).contains(&self.unvalidated_penalty) {
            return Err(ConfigError::InvalidPenalty(self.unvalidated_penalty));
        }
        let positive = [
            ("failure_threshold", self.failure_threshold as u64),
            ("provider_call_timeout_ms", self.provider_call_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("max_outbound_calls", self.max_outbound_calls as u64),
            ("max_concurrent_validations", self.max_concurrent_validations as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::NonPositive(name));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn resilience_for(&self, source_id: &str) -> ResilienceSettings {
        let over = self.providers.get(source_id).cloned().unwrap_or_default();
        ResilienceSettings {
            breaker: CircuitBreakerConfig {
                failure_threshold: self.failure_threshold,
                recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            },
            rate_limit_per_minute: over.rate_limit_per_minute.unwrap_or(self.rate_limit_per_minute),
            cache_ttl: Duration::from_millis(over.cache_ttl_ms.unwrap_or(self.cache_ttl_ms)),
            call_timeout: Duration::from_millis(self.provider_call_timeout_ms),
        }
    }
}

fn override_from<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: '{}'", key, raw))?;
    }
    Ok(())
}
