//! Per-provider circuit breaker
//!
//! Closed → Open after `failure_threshold` consecutive failures,
//! Open → HalfOpen once `recovery_timeout` has elapsed (one trial call),
//! HalfOpen → Closed on a trial success, HalfOpen → Open on a trial failure.
//!
//! The breaker is a plain state machine; the resilience wrapper owns it behind
//! a mutex so every transition for one provider is serialised.

use crate::types::CircuitState;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of asking the breaker whether a call may proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, normal call.
    Normal,
    /// The single probe call allowed while half-open.
    Trial,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    next_retry_at: Option<Instant>,
    opened_at_unix_ms: Option<i64>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            next_retry_at: None,
            opened_at_unix_ms: None,
            trial_in_flight: false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn opened_at_unix_ms(&self) -> Option<i64> {
        self.opened_at_unix_ms
    }

    pub fn next_retry_at_unix_ms(&self) -> Option<i64> {
        self.opened_at_unix_ms
            .map(|opened| opened + self.config.recovery_timeout.as_millis() as i64)
    }

    /// Decide whether a call may go out. `Err` carries the time left until
    /// the next probe is allowed.
    pub fn admit(&mut self, now: Instant) -> Result<Admission, Duration> {
        match self.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let retry_at = self.next_retry_at.unwrap_or(now);
                if now >= retry_at {
                    self.transition(CircuitState::HalfOpen);
                    self.trial_in_flight = true;
                    Ok(Admission::Trial)
                } else {
                    Err(retry_at - now)
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    Err(Duration::ZERO)
                } else {
                    self.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    /// Give the trial slot back without an outcome (cache hit, rate limit,
    /// cancellation).
    pub fn release_trial(&mut self) {
        self.trial_in_flight = false;
    }

    /// Only the trial call may settle a half-open circuit. Outcomes of
    /// normal calls admitted before the circuit opened are ignored once it
    /// has left Closed.
    pub fn record_success(&mut self, admission: Admission) {
        match (admission, self.state) {
            (Admission::Normal, CircuitState::Closed) => {
                self.consecutive_failures = 0;
            }
            (Admission::Trial, CircuitState::HalfOpen) => {
                self.consecutive_failures = 0;
                self.trial_in_flight = false;
                self.next_retry_at = None;
                self.opened_at_unix_ms = None;
                self.transition(CircuitState::Closed);
            }
            _ => {}
        }
    }

    pub fn record_failure(&mut self, admission: Admission, now: Instant) {
        match (admission, self.state) {
            (Admission::Normal, CircuitState::Closed) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.open(now);
                }
            }
            (Admission::Trial, CircuitState::HalfOpen) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.trial_in_flight = false;
                self.open(now);
            }
            _ => {}
        }
    }

    fn open(&mut self, now: Instant) {
        self.next_retry_at = Some(now + self.config.recovery_timeout);
        self.opened_at_unix_ms = Some(unix_millis());
        warn!(
            "Circuit for {} opened after {} consecutive failures; retry in {:?}",
            self.name, self.consecutive_failures, self.config.recovery_timeout
        );
        self.transition(CircuitState::Open);
    }

    fn transition(&mut self, to: CircuitState) {
        if self.state != to {
            info!("Circuit {}: {} -> {}", self.name, self.state, to);
            self.state = to;
        }
    }
}

pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(10),
            },
        )
    }

    #[test]
    fn opens_exactly_at_threshold() {
        let now = Instant::now();
        let mut cb = breaker(3);

        cb.record_failure(Admission::Normal, now);
        cb.record_failure(Admission::Normal, now);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.admit(now), Ok(Admission::Normal));

        cb.record_failure(Admission::Normal, now);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.opened_at_unix_ms().is_some());
        assert_eq!(cb.admit(now + Duration::from_secs(4)), Err(Duration::from_secs(6)));
    }

    #[test]
    fn success_resets_failure_streak() {
        let now = Instant::now();
        let mut cb = breaker(2);
        cb.record_failure(Admission::Normal, now);
        cb.record_success(Admission::Normal);
        cb.record_failure(Admission::Normal, now);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 1);
    }

    #[test]
    fn half_open_allows_single_trial() {
        let now = Instant::now();
        let mut cb = breaker(1);
        cb.record_failure(Admission::Normal, now);

        let later = now + Duration::from_secs(10);
        assert_eq!(cb.admit(later), Ok(Admission::Trial));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.admit(later), Err(Duration::ZERO));

        cb.release_trial();
        assert_eq!(cb.admit(later), Ok(Admission::Trial));
    }

    #[test]
    fn trial_outcome_decides_next_state() {
        let now = Instant::now();
        let mut cb = breaker(1);
        cb.record_failure(Admission::Normal, now);

        let later = now + Duration::from_secs(11);
        assert_eq!(cb.admit(later), Ok(Admission::Trial));
        cb.record_failure(Admission::Trial, later);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.admit(later + Duration::from_secs(1)).is_err());

        let much_later = later + Duration::from_secs(10);
        assert_eq!(cb.admit(much_later), Ok(Admission::Trial));
        cb.record_success(Admission::Trial);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.next_retry_at_unix_ms(), None);
    }

    #[test]
    fn late_normal_outcomes_do_not_settle_trial() {
        let now = Instant::now();
        let mut cb = breaker(1);
        assert_eq!(cb.admit(now), Ok(Admission::Normal));
        assert_eq!(cb.admit(now), Ok(Admission::Normal));
        cb.record_failure(Admission::Normal, now);
        assert_eq!(cb.state(), CircuitState::Open);

        let later = now + Duration::from_secs(10);
        assert_eq!(cb.admit(later), Ok(Admission::Trial));

        // The other call admitted while closed lands during the trial
        cb.record_success(Admission::Normal);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure(Admission::Normal, later);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.admit(later), Err(Duration::ZERO));
        assert_eq!(cb.consecutive_failures(), 1);

        cb.record_success(Admission::Trial);
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
