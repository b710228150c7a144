//! Failure isolation for dependency calls

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerConfig, BreakerError, BreakerStats, CircuitBreaker, CircuitState};
