//! Reconnect backoff
//!
//! Exponential backoff with optional ±25% jitter, used between broker
//! connection attempts.

use rand::Rng;
use std::time::Duration;

/// Backoff policy
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Build from the `mqtt.reconnect_*_secs` settings
    pub fn from_secs(min_secs: u64, max_secs: u64) -> Self {
        Self {
            initial_delay: Duration::from_secs(min_secs),
            max_delay: Duration::from_secs(max_secs.max(min_secs)),
            ..Self::default()
        }
    }
}

/// Attempt counter over a [`ReconnectPolicy`]
#[derive(Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Failed attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Connection established
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Record a failed attempt and return how long to wait before the next
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(30) as i32;
        self.attempt = self.attempt.saturating_add(1);

        // initial_delay * multiplier ^ (attempt - 1)
        let factor = self.policy.backoff_multiplier.powi(exponent);
        let mut delay = self
            .policy
            .initial_delay
            .mul_f64(factor.min(u32::MAX as f64))
            .min(self.policy.max_delay);

        if self.policy.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64).min(self.policy.max_delay);
            }
        }

        delay
    }
}
