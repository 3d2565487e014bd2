//! HTTP embedding service client

use crate::retrieval::Embedder;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(alias = "vector")]
    embedding: Vec<f32>,
    #[serde(default)]
    model: Option<String>,
}

/// Embedder backed by a remote `/embed` endpoint
pub struct HttpEmbedder {
    service_url: String,
    model: Option<String>,
    model_id: String,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(service_url: impl Into<String>, model: Option<String>) -> Self {
        let service_url = service_url.into();
        let model_id = match &model {
            Some(m) => format!("http:{}", m),
            None => format!("http:{}", service_url),
        };
        Self {
            service_url,
            model,
            model_id,
            client: reqwest::Client::new(),
        }
    }

    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.service_url.trim_end_matches('/'));
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embed", self.service_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                text,
                model: self.model.as_deref(),
            })
            .send()
            .await
            .context("Failed to call embedding service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding service error ({}): {}", status, body);
        }

        let embedded: EmbedResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;
        if embedded.embedding.is_empty() {
            anyhow::bail!("Embedding service returned an empty vector");
        }
        debug!(
            "Embedded {} chars into {} dims (model {:?})",
            text.len(),
            embedded.embedding.len(),
            embedded.model
        );
        Ok(embedded.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_unset_model() {
        let body = serde_json::to_value(EmbedRequest {
            text: "class: Witch",
            model: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"text": "class: Witch"}));
    }

    #[test]
    fn response_accepts_vector_alias() {
        let resp: EmbedResponse = serde_json::from_str(r#"{"vector": [0.5, 0.25]}"#).unwrap();
        assert_eq!(resp.embedding, vec![0.5, 0.25]);
        assert_eq!(
            HttpEmbedder::new("http://127.0.0.1:8090", Some("minilm".into())).model_id(),
            "http:minilm"
        );
    }

    #[tokio::test]
    #[ignore] // Requires running embedding service
    async fn test_embedder_integration() {
        let embedder = HttpEmbedder::new("http://127.0.0.1:8090", None);
        assert!(embedder.health_check().await.is_ok());
        assert!(!embedder.embed("class: Ranger").await.unwrap().is_empty());
    }
}
