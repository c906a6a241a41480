//! Exponential reconnect backoff
//!
//! Base delay is `min * 2^attempt`, truncated at `max`. Jitter only ever
//! shortens the base delay, and the applied wait never drops below the
//! previous one, so the waits between two resets are non-decreasing and
//! bounded by `max`.

use rand::Rng;
use std::time::Duration;

use crate::config::TransportConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    jitter: f64,
    reset_after: Duration,
    attempt: u32,
    last_wait: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, jitter: f64, reset_after: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            jitter: jitter.clamp(0.0, 1.0),
            reset_after,
            attempt: 0,
            last_wait: Duration::ZERO,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_min_ms),
            Duration::from_millis(config.backoff_max_ms),
            config.backoff_jitter,
            Duration::from_millis(config.backoff_reset_after_ms),
        )
    }

    /// How long to wait before the next attempt
    pub fn next_wait(&mut self) -> Duration {
        let base = self.next_delay();
        let wait = self.jittered(base).max(self.last_wait).min(self.max);
        self.last_wait = wait;
        wait
    }

    /// Base delay for the next attempt, advancing the attempt counter
    fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let delay = self.min.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// `delay` shortened by a random fraction of up to `jitter`
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter == 0.0 {
            return delay;
        }
        let cut = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay.saturating_sub(delay.mul_f64(cut))
    }

    /// Report the end of a connection that lasted `connected_for`
    ///
    /// A connection that stayed up for the reset period starts the next
    /// backoff sequence from `min` again.
    pub fn connection_lost(&mut self, connected_for: Duration) {
        if connected_for >= self.reset_after {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last_wait = Duration::ZERO;
    }

    /// Failed attempts since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
