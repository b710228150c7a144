//! Circuit breaker
//!
//! Wraps calls into a flaky dependency (state storage, broker publish). After
//! `failure_threshold` consecutive failures the breaker opens and rejects calls
//! without running them until `recovery_timeout` has passed; the next call is
//! then a trial that either closes the breaker again or reopens it.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BreakerSettings;
use crate::error::BridgeError;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected until the recovery timeout elapses
    Open,
    /// Recovery timeout elapsed; the next call decides
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Breaker thresholds
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl From<BreakerSettings> for BreakerConfig {
    fn from(settings: BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            recovery_timeout: settings.recovery_timeout(),
        }
    }
}

/// Cumulative counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BreakerStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    /// Calls rejected while open
    pub rejected_calls: u64,
    /// Transitions into OPEN
    pub times_opened: u64,
}

/// Failure of a guarded call
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// Rejected without invoking the wrapped call
    #[error("circuit breaker '{0}' is open")]
    Open(String),

    /// The wrapped call ran and failed
    #[error(transparent)]
    Inner(E),
}

impl From<BreakerError<BridgeError>> for BridgeError {
    fn from(err: BreakerError<BridgeError>) -> Self {
        match err {
            BreakerError::Open(name) => BridgeError::BreakerOpen(name),
            BreakerError::Inner(inner) => inner,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    stats: BreakerStats,
}

/// Circuit breaker for one dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                stats: BreakerStats::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn stats(&self) -> BreakerStats {
        self.inner.lock().stats.clone()
    }

    /// Run `f` through the breaker
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit()?;

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            },
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            },
        }
    }

    fn admit<E>(&self) -> Result<(), BreakerError<E>> {
        let mut inner = self.inner.lock();
        inner.stats.total_calls += 1;

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map_or(Duration::MAX, |opened| opened.elapsed());
            if elapsed < self.config.recovery_timeout {
                inner.stats.rejected_calls += 1;
                return Err(BreakerError::Open(self.name.clone()));
            }
            inner.state = CircuitState::HalfOpen;
            info!("Circuit breaker '{}' half-open, trying one call", self.name);
        }
        Ok(())
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.stats.successful_calls += 1;
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            info!("Circuit breaker '{}' closed", self.name);
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.stats.failed_calls += 1;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                self.open(&mut inner);
            },
            CircuitState::Closed => {
                inner.failure_count += 1;
                debug!(
                    "Circuit breaker '{}' failure {}/{}",
                    self.name, inner.failure_count, self.config.failure_threshold
                );
                if inner.failure_count >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            },
            // A call admitted before another one tripped the breaker
            CircuitState::Open => {},
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.stats.times_opened += 1;
        warn!(
            "Circuit breaker '{}' opened after {} failures, retry in {:?}",
            self.name, inner.failure_count, self.config.recovery_timeout
        );
    }
}
