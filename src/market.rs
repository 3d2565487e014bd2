//! Decoding of normalised provider payloads into typed market data

use crate::types::{BuildRecord, Payload, ProviderRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Common shape every adapter normalises its source into.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    /// build id → estimated cost (same currency as `Query::budget_max`)
    #[serde(default)]
    pub build_prices: HashMap<String, f64>,
    /// support gem name → cost
    #[serde(default)]
    pub gem_prices: HashMap<String, f64>,
    /// Builds currently reported by the source (no embeddings)
    #[serde(default)]
    pub builds: Vec<BuildRecord>,
}

impl MarketData {
    pub fn into_payload(self) -> Payload {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Payload::new(),
        }
    }
}

/// The one boundary where an opaque payload becomes typed data.
pub fn decode_payload(payload: &Payload) -> Result<MarketData, serde_json::Error> {
    serde_json::from_value(serde_json::Value::Object(payload.clone()))
}

/// Market view merged across all providers that answered this request.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    build_prices: HashMap<String, f64>,
    gem_prices: HashMap<String, f64>,
    builds: Vec<BuildRecord>,
}

impl MarketSnapshot {
    /// Merge records in source-id order so the result does not depend on
    /// arrival order. Prices quoted by several sources are averaged.
    pub fn from_records(records: &HashMap<String, ProviderRecord>) -> Self {
        let ordered: BTreeMap<&String, &ProviderRecord> = records.iter().collect();

        let mut build_quotes: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut gem_quotes: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut builds: Vec<BuildRecord> = Vec::new();

        for (source_id, record) in ordered {
            let data = match decode_payload(&record.payload) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Skipping undecodable payload from {}: {}", source_id, e);
                    continue;
                }
            };
            for (id, price) in data.build_prices {
                if price.is_finite() && price >= 0.0 {
                    build_quotes.entry(id).or_default().push(price);
                }
            }
            for (gem, price) in data.gem_prices {
                if price.is_finite() && price >= 0.0 {
                    gem_quotes.entry(gem.to_ascii_lowercase()).or_default().push(price);
                }
            }
            for build in data.builds {
                if !builds.iter().any(|b| b.id == build.id) {
                    builds.push(build);
                }
            }
        }

        Self {
            build_prices: build_quotes.into_iter().map(|(k, v)| (k, mean(&v))).collect(),
            gem_prices: gem_quotes.into_iter().map(|(k, v)| (k, mean(&v))).collect(),
            builds,
        }
    }

    pub fn build_price(&self, build_id: &str) -> Option<f64> {
        self.build_prices.get(build_id).copied()
    }

    pub fn gem_price(&self, gem: &str) -> Option<f64> {
        self.gem_prices.get(&gem.to_ascii_lowercase()).copied()
    }

    pub fn builds(&self) -> &[BuildRecord] {
        &self.builds
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
