//! Request-scoped context shared by every stage of one recommendation request

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::Instant;

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

/// Owned by the orchestrator and handed down as `&RequestContext` (or a shared
/// `Arc` where a spawned task must outlive the borrow).
#[derive(Debug)]
pub struct RequestContext {
    request_id: String,
    deadline: Instant,
    cancel_tx: watch::Sender<bool>,
}

impl RequestContext {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self::with_deadline(next_request_id(), Instant::now() + timeout))
    }

    pub fn with_deadline(request_id: impl Into<String>, deadline: Instant) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            request_id: request_id.into(),
            deadline,
            cancel_tx,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Remaining budget (`deadline - now`), zero once expired.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

fn next_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("req-{}-{}", millis, REQUEST_SEQ.fetch_add(1, Ordering::Relaxed))
}
