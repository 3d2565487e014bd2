//! HTTP client for the external calculation oracle
use crate::context::RequestContext;
use crate::types::{DraftConfig, Payload};
use crate::validator::CalculationOracle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
struct CalculateRequest<'a> {
    request_id: &'a str,
    draft: &'a DraftConfig,
}

#[derive(Debug, Clone)]
pub struct HttpOracle {
    base_url: String,
    client: reqwest::Client,
}

impl HttpOracle {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Health check
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl CalculationOracle for HttpOracle {
    fn name(&self) -> &str {
        "http-oracle"
    }

    async fn calculate(&self, ctx: &RequestContext, draft: &DraftConfig) -> Result<Payload> {
        let url = format!("{}/calculate", self.base_url);
        debug!("Calculating {} {} via {}", draft.class, draft.main_skill, url);

        let response = self
            .client
            .post(&url)
            .timeout(ctx.remaining())
            .json(&CalculateRequest {
                request_id: ctx.request_id(),
                draft,
            })
            .send()
            .await
            .context("Failed to call calculation oracle")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Oracle error {}: {}", status, body);
        }

        let stats: Payload = response
            .json()
            .await
            .context("Failed to parse oracle response")?;
        Ok(stats)
    }
}
