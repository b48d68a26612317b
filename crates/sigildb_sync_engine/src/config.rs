//! Configuration for the sync engine.

use sigildb_core::BATCH_SIZE;
use std::time::Duration;

/// Configuration for one sync session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Keep-alive interval on client sessions and self-bridges.
    pub client_keepalive: Duration,
    /// Keep-alive interval on server sessions with other nodes.
    pub server_keepalive: Duration,
    /// How often the session checks whether its store was closed.
    pub poll_interval: Duration,
    /// Maximum records per outbound batch.
    pub batch_size: usize,
}

impl SessionConfig {
    /// Creates the default session configuration.
    pub fn new() -> Self {
        Self {
            client_keepalive: Duration::from_secs(30),
            server_keepalive: Duration::from_secs(240),
            poll_interval: Duration::from_secs(5),
            batch_size: BATCH_SIZE,
        }
    }

    /// Sets the client and self-bridge keep-alive interval.
    #[must_use]
    pub fn with_client_keepalive(mut self, interval: Duration) -> Self {
        self.client_keepalive = interval;
        self
    }

    /// Sets the server keep-alive interval.
    #[must_use]
    pub fn with_server_keepalive(mut self, interval: Duration) -> Self {
        self.server_keepalive = interval;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the outbound batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for client reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum consecutive failed attempts, `None` to retry forever.
    pub max_attempts: Option<u32>,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates the default policy: 1 s doubling up to five minutes, forever.
    pub fn new() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Limits the number of consecutive failures.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables up to 25% random jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Returns true once `failures` consecutive attempts have failed and
    /// no more are allowed.
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }

    /// Calculates the delay before attempt number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::random::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_builder() {
        let config = SessionConfig::new()
            .with_client_keepalive(Duration::from_secs(1))
            .with_poll_interval(Duration::from_millis(50))
            .with_batch_size(0);

        assert_eq!(config.client_keepalive, Duration::from_secs(1));
        assert_eq!(config.server_keepalive, Duration::from_secs(240));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert!(!config.exhausted(0));
        assert!(config.exhausted(1));
        assert!(!RetryConfig::new().exhausted(u32::MAX));
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new();
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new();
        assert_eq!(config.delay_for_attempt(9), Duration::from_secs(256));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(300));
        assert_eq!(config.delay_for_attempt(1000), Duration::from_secs(300));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let config = RetryConfig::new().with_jitter(true);
        for _ in 0..20 {
            let delay = config.delay_for_attempt(3);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs(5));
        }
    }
}
