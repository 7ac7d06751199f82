//! Resilience for the optional LLM path.
//!
//! - Circuit breaker per completion endpoint
//! - Retry with exponential backoff and a per-call timeout (see
//!   [`crate::completion::ResilientCompletion`])

mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
