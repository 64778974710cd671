//! Push channel reconnect backoff.

use std::time::Duration;

/// Capped exponential backoff with jitter.
///
/// Attempt `n` (0-based) waits `initial_delay * multiplier^n`, capped at
/// `max_delay`, then scaled by a random factor in `[1 - jitter, 1 + jitter]`
/// and capped again.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the delay to randomize, in `0.0..=1.0`.
    pub jitter: f64,
    /// Give up after this many consecutive failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed delay without jitter, mostly for tests.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
            jitter: 0.0,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay before attempt `attempt`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_secs_f64();
        let cap = self.max_delay.as_secs_f64();
        let exp = attempt.min(64) as i32;
        let raw = initial * self.multiplier.max(1.0).powi(exp);
        Duration::from_secs_f64(raw.min(cap).max(0.0))
    }

    /// Delay before attempt `attempt`, jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.jittered(self.base_delay(attempt), rand::random::<f64>())
    }

    fn jittered(&self, base: Duration, sample: f64) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = 1.0 - jitter + 2.0 * jitter * sample.clamp(0.0, 1.0);
        let secs = (base.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Whether attempt `attempt` (0-based) may still be made.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}
