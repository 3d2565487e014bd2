//! Provider adapters: one implementation per external market/meta source

use crate::context::RequestContext;
use crate::types::Payload;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// A single external data source, normalised to the common payload shape
/// (see [`crate::market::MarketData`]).
///
/// Must be safe to call repeatedly and must not keep `ctx` past the call.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch(&self, ctx: &RequestContext) -> Result<Payload>;
}

/// In-process provider for tests and the mock server mode
pub struct MockProvider {
    source_id: String,
    payload: Payload,
    delay: Option<Duration>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn healthy(source_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            source_id: source_id.into(),
            payload,
            delay: None,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(source_id: impl Into<String>) -> Self {
        let provider = Self::healthy(source_id, Payload::new());
        provider.set_failing(true);
        provider
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of times `fetch` was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch(&self, _ctx: &RequestContext) -> Result<Payload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("{}: upstream returned 503", self.source_id);
        }
        Ok(self.payload.clone())
    }
}
