//! Exponential backoff with jitter for reconnects and submit retries.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on the delay between retries.
    pub max_delay: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Symmetric jitter fraction: a delay `d` becomes `d * (1 ± jitter)`.
    pub jitter: f64,
    /// Retry budget; None retries forever.
    pub max_retries: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        // Stream reconnect policy: 1s doubling to a 30s cap, ±25% jitter,
        // never give up.
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
            max_retries: None,
        }
    }
}

impl BackoffConfig {
    /// Bounded policy for order submit retries.
    pub fn submit_retries(max_attempts: u32) -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
            max_retries: Some(max_attempts),
        }
    }
}

/// Backoff state machine. `next_delay` advances; `reset` rearms after a
/// successful attempt.
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial_delay,
            attempt: 0,
            config,
        }
    }

    /// Delay to wait before the next attempt, or None when the retry budget
    /// is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_retries {
            if self.attempt >= max {
                return None;
            }
        }

        let delay = self.jittered(self.current);

        self.attempt += 1;
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.config.multiplier)
                .min(self.config.max_delay.as_secs_f64()),
        );

        Some(delay)
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.config.jitter <= 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.config.jitter..=self.config.jitter);
        Duration::from_secs_f64(base.as_secs_f64() * (1.0 + spread))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current = self.config.initial_delay;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn exhausted(&self) -> bool {
        matches!(self.config.max_retries, Some(max) if self.attempt >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_retries: Option<u32>) -> Backoff {
        Backoff::new(BackoffConfig {
            jitter: 0.0,
            max_retries,
            ..BackoffConfig::default()
        })
    }

    #[test]
    fn doubles_until_cap() {
        let mut backoff = no_jitter(None);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(4)));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn budget_exhausts() {
        let mut backoff = no_jitter(Some(2));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(backoff.exhausted());
    }

    #[test]
    fn reset_rearms() {
        let mut backoff = no_jitter(Some(1));
        backoff.next_delay();
        assert!(backoff.exhausted());
        backoff.reset();
        assert!(!backoff.exhausted());
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn jitter_stays_within_band() {
        let mut backoff = Backoff::new(BackoffConfig {
            jitter: 0.25,
            ..BackoffConfig::default()
        });
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay().unwrap();
            assert!(delay >= Duration::from_millis(750));
            assert!(delay <= Duration::from_millis(1250));
        }
    }
}
