//! Retry strategy with exponential backoff for failed sync cycles.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff between failed cycles: `initial_delay * backoff_multiplier^n`,
/// capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Spread each delay over 75%..125% of its nominal value.
    pub jitter: bool,
}

impl RetryConfig {
    /// 2 s, 4 s, 8 s ... up to one minute, no jitter.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt`, counting from 0.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nominal_ms = self.initial_delay.as_secs_f64()
            * 1000.0
            * self.backoff_multiplier.powi(exponent);
        let cap_ms = self.max_delay.as_secs_f64() * 1000.0;

        let mut delay_ms = if nominal_ms.is_finite() {
            nominal_ms.min(cap_ms)
        } else {
            cap_ms
        };
        if self.jitter {
            delay_ms *= 0.75 + rand::random::<f64>() * 0.5;
        }
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What to do after a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another cycle after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Cap reached; the counter has been reset.
    GiveUp { attempts: u32 },
}

/// Consecutive-failure counter owned by the engine.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    failures: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive failures so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Count a failure and decide whether to retry.
    ///
    /// With `max_retries = 3` the first two failures are retried after
    /// `delay_for_attempt(0)` and `delay_for_attempt(1)`; the third abandons.
    pub fn record_failure(&mut self, max_retries: u32, config: &RetryConfig) -> RetryDecision {
        self.failures += 1;
        if self.failures < max_retries {
            RetryDecision::Retry {
                attempt: self.failures,
                delay: config.delay_for_attempt(self.failures - 1),
            }
        } else {
            let attempts = self.failures;
            self.failures = 0;
            RetryDecision::GiveUp { attempts }
        }
    }

    /// Forget past failures.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
