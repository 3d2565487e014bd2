//! Buildsmith - Resilient build recommendation core
//!
//! Recommends character builds by combining:
//! - Concurrent aggregation of flaky market sources behind per-provider
//!   circuit breakers, rate limits and short-TTL caches
//! - Nearest-neighbour retrieval over a precomputed knowledge base
//! - Candidate validation against an external calculation oracle
//! - Weighted multi-criteria ranking with a skill-diversity pass

pub mod types;
pub mod error;
pub mod context;
pub mod catalog;
pub mod provider;
pub mod market;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod resilience;
pub mod aggregator;
pub mod vector_index;
pub mod retrieval;
pub mod candidates;
pub mod validator;
pub mod scoring;
pub mod ranker;
pub mod health;
pub mod config;
pub mod orchestrator;
pub mod http_provider;
pub mod embedding_client; // remote Embedder
pub mod oracle_client;    // remote CalculationOracle
pub mod server;

pub use types::*;
pub use error::{ConfigError, IndexError, ProviderError, RequestError, RetrievalError};
pub use context::RequestContext;
pub use provider::{MockProvider, ProviderAdapter};
pub use aggregator::{AggregateOutcome, Aggregator};
pub use resilience::{ResilienceSettings, ResilientProvider};
pub use vector_index::VectorIndex;
pub use retrieval::{Embedder, HashingEmbedder, RetrievalEngine};
pub use candidates::CandidateGenerator;
pub use validator::{CalculationOracle, MockOracle, ValidatorBridge};
pub use ranker::Ranker;
pub use health::{ComponentHealth, ComponentStatus};
pub use config::EngineConfig;
pub use orchestrator::{Orchestrator, RequestStage, SharedOrchestrator};
pub use http_provider::HttpProvider;
pub use embedding_client::HttpEmbedder;
pub use oracle_client::HttpOracle;
