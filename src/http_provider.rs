//! HTTP market adapter that normalises a remote market API into
//! [`MarketData`]

use crate::context::RequestContext;
use crate::market::MarketData;
use crate::provider::ProviderAdapter;
use crate::types::{BuildRecord, Payload};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Response from the remote market service
#[derive(Debug, Deserialize)]
struct MarketResponse {
    #[serde(default)]
    builds: Vec<RemoteBuild>,
    #[serde(default)]
    gems: Vec<RemoteGem>,
}

#[derive(Debug, Deserialize)]
struct RemoteBuild {
    id: String,
    class: String,
    #[serde(default)]
    ascendancy: Option<String>,
    main_skill: String,
    #[serde(default, alias = "supports")]
    support_skills: Vec<String>,
    #[serde(default)]
    weapon_type: String,
    #[serde(default)]
    keystones: Vec<String>,
    #[serde(default)]
    dps: f64,
    #[serde(default)]
    life: f64,
    #[serde(default)]
    energy_shield: f64,
    #[serde(default, alias = "chaos_value")]
    price: Option<f64>,
    #[serde(default)]
    rank: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RemoteGem {
    name: String,
    #[serde(alias = "chaos_value")]
    price: f64,
}

/// Market adapter backed by a JSON HTTP API
pub struct HttpProvider {
    source_id: String,
    base_url: String,
    league: String,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(source_id: impl Into<String>, base_url: impl Into<String>, league: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            base_url: base_url.into(),
            league: league.into(),
            client: reqwest::Client::new(),
        }
    }

    fn market_url(&self) -> String {
        format!(
            "{}/api/market?league={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.league)
        )
    }

    fn normalize(resp: MarketResponse) -> MarketData {
        let mut data = MarketData::default();
        for (position, remote) in resp.builds.into_iter().enumerate() {
            if let Some(price) = remote.price {
                data.build_prices.insert(remote.id.clone(), price);
            }
            data.builds.push(BuildRecord {
                id: remote.id,
                class: remote.class,
                ascendancy: remote.ascendancy,
                main_skill: remote.main_skill,
                support_skills: remote.support_skills,
                weapon_type: remote.weapon_type,
                keystones: remote.keystones,
                dps: remote.dps,
                life: remote.life,
                energy_shield: remote.energy_shield,
                cost: remote.price,
                // Sources list builds by popularity when they omit a rank.
                popularity_rank: remote.rank.unwrap_or(position as u32 + 1),
                embedding_vector: Vec::new(),
            });
        }
        for gem in resp.gems {
            data.gem_prices.insert(gem.name, gem.price);
        }
        data
    }
}

#[async_trait]
impl ProviderAdapter for HttpProvider {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch(&self, _ctx: &RequestContext) -> Result<Payload> {
        let url = self.market_url();
        debug!("Fetching market data from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to call market source {}", self.source_id))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Market source {} error ({}): {}", self.source_id, status, body);
        }

        let market: MarketResponse = response
            .json()
            .await
            .context("Failed to parse market response")?;
        let data = Self::normalize(market);
        debug!(
            "{}: {} builds, {} gem prices",
            self.source_id,
            data.builds.len(),
            data.gem_prices.len()
        );
        Ok(data.into_payload())
    }
}
