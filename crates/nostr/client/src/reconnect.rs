//! Reconnection policies.
//!
//! A relay never reconnects on its own. When a connection drops unexpectedly
//! the pool asks its [`ReconnectPolicy`] how long to wait before each attempt.

use std::time::Duration;

/// Configuration for the default exponential backoff policy
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Whether to reconnect at all
    pub enabled: bool,
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Attempts before giving up (0 = unlimited)
    pub max_attempts: u32,
    /// Backoff multiplier (2.0 doubles each time)
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 0, // Unlimited
            multiplier: 2.0,
        }
    }
}

/// Decides whether and when a disconnected relay is retried.
pub trait ReconnectPolicy: Send + Sync + 'static {
    /// Delay before attempt number `attempt` (1-based), or `None` to give up.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Exponential backoff capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: ReconnectConfig,
}

impl ExponentialBackoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.config.enabled || attempt == 0 {
            return None;
        }
        if self.config.max_attempts > 0 && attempt > self.config.max_attempts {
            return None;
        }

        let exponent = (attempt - 1).min(32) as i32;
        let factor = self.config.multiplier.max(1.0).powi(exponent);
        let delay = self.config.initial_delay.as_secs_f64() * factor;
        let capped = delay.min(self.config.max_delay.as_secs_f64());
        Some(Duration::from_secs_f64(capped))
    }
}

/// Never reconnect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectPolicy for NoReconnect {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}
