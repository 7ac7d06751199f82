//! Circuit breaker around the LLM completion endpoint.
//!
//! After repeated failures the circuit opens and explanation scoring falls
//! back to the heuristic until the recovery timeout has passed.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// How long an open circuit rejects calls (in seconds)
    #[serde(with = "duration_secs")]
    pub recovery_timeout: Duration,

    /// Half-open successes needed to close again
    pub success_threshold: u32,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    Closed { failures: u32 },

    /// Calls are rejected until `recovery_timeout` has elapsed.
    Open { opened_at: Instant },

    /// Probe calls are let through.
    HalfOpen { successes: u32 },
}

/// Per-endpoint circuit breaker.
///
/// Circuits are keyed by endpoint name (provider and model), so one
/// failing model does not block another.
pub struct CircuitBreaker {
    circuits: RwLock<HashMap<String, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether calls to `endpoint` should be skipped right now.
    ///
    /// An open circuit whose timeout has passed moves to half-open and
    /// lets the call through.
    pub fn is_open(&self, endpoint: &str) -> bool {
        let opened_at = match self.circuits.read().get(endpoint) {
            Some(CircuitState::Open { opened_at }) => *opened_at,
            _ => return false,
        };

        if opened_at.elapsed() < self.config.recovery_timeout {
            return true;
        }
        self.half_open(endpoint);
        false
    }

    pub fn record_success(&self, endpoint: &str) {
        let mut circuits = self.circuits.write();
        let next = match circuits.get(endpoint) {
            Some(CircuitState::HalfOpen { successes })
                if successes + 1 < self.config.success_threshold =>
            {
                CircuitState::HalfOpen {
                    successes: successes + 1,
                }
            }
            Some(CircuitState::HalfOpen { .. }) => {
                tracing::info!(endpoint = %endpoint, "circuit closed after recovery");
                CircuitState::Closed { failures: 0 }
            }
            Some(CircuitState::Open { .. }) => return,
            Some(CircuitState::Closed { .. }) | None => CircuitState::Closed { failures: 0 },
        };
        circuits.insert(endpoint.to_string(), next);
    }

    pub fn record_failure(&self, endpoint: &str) {
        let mut circuits = self.circuits.write();
        let next = match circuits.get(endpoint) {
            Some(CircuitState::Closed { failures }) if failures + 1 < self.config.failure_threshold => {
                CircuitState::Closed {
                    failures: failures + 1,
                }
            }
            None if self.config.failure_threshold > 1 => CircuitState::Closed { failures: 1 },
            Some(CircuitState::Closed { .. }) | None => {
                tracing::warn!(
                    endpoint = %endpoint,
                    threshold = self.config.failure_threshold,
                    "circuit opened after repeated failures"
                );
                CircuitState::Open {
                    opened_at: Instant::now(),
                }
            }
            Some(CircuitState::HalfOpen { .. }) => {
                tracing::warn!(endpoint = %endpoint, "circuit reopened, recovery probe failed");
                CircuitState::Open {
                    opened_at: Instant::now(),
                }
            }
            Some(CircuitState::Open { .. }) => return,
        };
        circuits.insert(endpoint.to_string(), next);
    }

    fn half_open(&self, endpoint: &str) {
        let mut circuits = self.circuits.write();
        if let Some(state @ CircuitState::Open { .. }) = circuits.get_mut(endpoint) {
            *state = CircuitState::HalfOpen { successes: 0 };
            tracing::info!(endpoint = %endpoint, "circuit half-open, probing");
        }
    }

    pub fn state(&self, endpoint: &str) -> CircuitState {
        self.circuits
            .read()
            .get(endpoint)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    pub fn reset(&self) {
        self.circuits.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "openrouter:gpt-4o-mini";

    fn breaker(failure_threshold: u32, recovery_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout,
            success_threshold: 2,
        })
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker(3, Duration::from_secs(30));
        cb.record_failure(MODEL);
        cb.record_failure(MODEL);
        assert!(!cb.is_open(MODEL));
        cb.record_failure(MODEL);
        assert!(cb.is_open(MODEL));
    }

    #[test]
    fn test_success_clears_failure_count() {
        let cb = breaker(2, Duration::from_secs(30));
        cb.record_failure(MODEL);
        cb.record_success(MODEL);
        cb.record_failure(MODEL);
        assert_eq!(cb.state(MODEL), CircuitState::Closed { failures: 1 });
    }

    #[test]
    fn test_half_open_recovery() {
        let cb = breaker(1, Duration::ZERO);
        cb.record_failure(MODEL);
        assert!(matches!(cb.state(MODEL), CircuitState::Open { .. }));

        // Zero timeout: the next check probes immediately.
        assert!(!cb.is_open(MODEL));
        assert_eq!(cb.state(MODEL), CircuitState::HalfOpen { successes: 0 });

        cb.record_success(MODEL);
        assert_eq!(cb.state(MODEL), CircuitState::HalfOpen { successes: 1 });
        cb.record_success(MODEL);
        assert_eq!(cb.state(MODEL), CircuitState::Closed { failures: 0 });
    }

    #[test]
    fn test_failed_probe_reopens() {
        let cb = breaker(1, Duration::ZERO);
        cb.record_failure(MODEL);
        assert!(!cb.is_open(MODEL));
        cb.record_failure(MODEL);
        assert!(matches!(cb.state(MODEL), CircuitState::Open { .. }));
    }

    #[test]
    fn test_endpoints_are_independent() {
        let cb = breaker(1, Duration::from_secs(30));
        cb.record_failure(MODEL);
        assert!(cb.is_open(MODEL));
        assert!(!cb.is_open("openrouter:other"));

        cb.reset();
        assert!(!cb.is_open(MODEL));
    }
}
