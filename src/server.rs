//! HTTP server for build recommendations

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::health::{ComponentHealth, ComponentStatus};
use crate::orchestrator::Orchestrator;
use crate::types::{Query, RecommendOptions, RecommendationResult};

/// HTTP request body
#[derive(Debug, Deserialize)]
pub struct RecommendRequestHttp {
    pub query: Query,
    pub max_recommendations: Option<usize>,
    pub max_candidates: Option<usize>,
}

impl RecommendRequestHttp {
    fn options(&self) -> RecommendOptions {
        let defaults = RecommendOptions::default();
        RecommendOptions {
            max_recommendations: self.max_recommendations.unwrap_or(defaults.max_recommendations),
            max_candidates: self.max_candidates.unwrap_or(defaults.max_candidates),
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub service: String,
    pub version: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

async fn recommend_handler(
    State(engine): State<Arc<Orchestrator>>,
    Json(req): Json<RecommendRequestHttp>,
) -> Result<Json<RecommendationResult>, (StatusCode, Json<ErrorResponse>)> {
    info!(
        "Received recommendation request: class={}, goal={}, budget={}",
        req.query.class, req.query.goal, req.query.budget_max
    );

    match engine.recommend(&req.query, req.options()).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            let status = if e.is_client_error() {
                StatusCode::BAD_REQUEST
            } else {
                error!("Recommendation failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            };
            Err((
                status,
                Json(ErrorResponse {
                    error: "Recommendation failed".to_string(),
                    details: Some(e.to_string()),
                }),
            ))
        }
    }
}

/// Overall status is the worst provider-independent component; a down
/// provider only degrades the service.
fn overall_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
    let mut status = ComponentStatus::Healthy;
    for (id, health) in components {
        match health.status {
            ComponentStatus::Down if !id.starts_with("provider:") => return ComponentStatus::Down,
            ComponentStatus::Down | ComponentStatus::Degraded => status = ComponentStatus::Degraded,
            ComponentStatus::Healthy | ComponentStatus::Unknown => {}
        }
    }
    status
}

async fn health_handler(State(engine): State<Arc<Orchestrator>>) -> Json<HealthResponse> {
    let components = engine.health_check();
    Json(HealthResponse {
        status: overall_status(&components),
        service: "buildsmith".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        components,
    })
}

/// Create and configure the HTTP server
pub fn create_router(engine: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/recommendations", post(recommend_handler))
        .with_state(engine)
}

/// Run the HTTP server
pub async fn run_server(engine: Arc<Orchestrator>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!("Starting buildsmith server on {}", addr);

    let app = create_router(engine);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
