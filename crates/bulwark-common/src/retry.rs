//! Exponential backoff with jitter.
//!
//! Used by long-running loops (the lock watcher's reconnect loop) that retry
//! forever and must not hammer a backend that just went away.

use std::time::Duration;

use rand::Rng;

/// Backoff configuration for operations that may fail transiently.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to randomize each delay between 0.5x and 1.5x
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Stateful backoff sequence built from a [`RetryConfig`].
///
/// Call [`Backoff::next_delay`] after each failure and [`Backoff::reset`]
/// after a success.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: RetryConfig,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    /// Start a new sequence
    pub fn new(config: RetryConfig) -> Self {
        let current = config.initial_delay;
        Self {
            config,
            current,
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let base = self.current;

        // Exponential backoff, capped at max_delay
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.config.backoff_multiplier)
                .min(self.config.max_delay.as_secs_f64()),
        );

        if self.config.jitter {
            let jitter = rand::thread_rng().gen_range(0.5..1.5);
            Duration::from_secs_f64(base.as_secs_f64() * jitter)
        } else {
            base
        }
    }

    /// Restart from the initial delay
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempt = 0;
    }
}
