//! Component health snapshots for the health endpoint

use crate::types::{CircuitState, ProviderHealth};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Down,
    /// Not exercised yet.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub latency_ms: Option<u64>,
}

impl From<&ProviderHealth> for ComponentHealth {
    fn from(health: &ProviderHealth) -> Self {
        let status = match health.state {
            CircuitState::Closed => ComponentStatus::Healthy,
            CircuitState::HalfOpen => ComponentStatus::Degraded,
            CircuitState::Open => ComponentStatus::Down,
        };
        Self {
            status,
            latency_ms: health.last_latency_ms,
        }
    }
}

const NO_CALLS: u8 = 0;
const LAST_OK: u8 = 1;
const LAST_FAILED: u8 = 2;

/// Last observed outcome and latency of calls to one collaborator.
/// Lock-free so request paths never contend on it.
#[derive(Debug, Default)]
pub struct LatencyProbe {
    outcome: AtomicU8,
    latency_ms: AtomicU64,
}

impl LatencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, ok: bool, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
        self.outcome
            .store(if ok { LAST_OK } else { LAST_FAILED }, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ComponentHealth {
        match self.outcome.load(Ordering::Relaxed) {
            NO_CALLS => ComponentHealth {
                status: ComponentStatus::Unknown,
                latency_ms: None,
            },
            outcome => ComponentHealth {
                status: if outcome == LAST_OK {
                    ComponentStatus::Healthy
                } else {
                    ComponentStatus::Degraded
                },
                latency_ms: Some(self.latency_ms.load(Ordering::Relaxed)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reports_last_outcome() {
        let probe = LatencyProbe::new();
        assert_eq!(probe.snapshot().status, ComponentStatus::Unknown);

        probe.record(true, Duration::from_millis(12));
        assert_eq!(
            probe.snapshot(),
            ComponentHealth {
                status: ComponentStatus::Healthy,
                latency_ms: Some(12)
            }
        );

        probe.record(false, Duration::from_millis(900));
        assert_eq!(probe.snapshot().status, ComponentStatus::Degraded);
    }

    #[test]
    fn breaker_state_maps_to_status() {
        let mut health = ProviderHealth {
            source_id: "ninja".into(),
            state: CircuitState::Open,
            consecutive_failures: 3,
            opened_at: Some(1),
            next_retry_at: Some(30_001),
            last_latency_ms: Some(40),
            last_error: None,
        };
        assert_eq!(ComponentHealth::from(&health).status, ComponentStatus::Down);
        health.state = CircuitState::HalfOpen;
        assert_eq!(ComponentHealth::from(&health).status, ComponentStatus::Degraded);
        assert_eq!(ComponentHealth::from(&health).latency_ms, Some(40));
    }
}
