use crate::config::StreamConfig;
use std::time::Duration;
use tracing::{error, info, warn};

/// Recovery action to take after a failed connect
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Retry after a delay
    RetryAfterDelay(Duration),
    /// Retry budget exhausted
    GiveUp,
}

/// Reconnect strategy configuration
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Retries allowed after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Growth factor per consecutive failure (1.0 gives a fixed delay)
    pub multiplier: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 20,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 1.5,
        }
    }
}

impl From<&StreamConfig> for RecoveryConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            max_retries: config.max_connect_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            multiplier: config.retry_multiplier,
        }
    }
}

/// Tracks consecutive connect failures and turns them into backoff decisions
#[derive(Debug)]
pub struct RecoveryManager {
    config: RecoveryConfig,
    consecutive_failures: u32,
}

impl RecoveryManager {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
        }
    }

    /// Record a failed attempt and decide what to do next
    pub fn handle_failure(&mut self, component: &str, error: &dyn std::fmt::Display) -> RecoveryAction {
        self.consecutive_failures += 1;

        if self.consecutive_failures > self.config.max_retries {
            error!(
                "Maximum retries ({}) exceeded for {}: {}",
                self.config.max_retries, component, error
            );
            return RecoveryAction::GiveUp;
        }

        let delay = self.calculate_delay(self.consecutive_failures - 1);
        warn!(
            "Scheduling reconnect for {} in {:?} (retry {}/{}): {}",
            component, delay, self.consecutive_failures, self.config.max_retries, error
        );

        RecoveryAction::RetryAfterDelay(delay)
    }

    /// Reset the failure count after a successful connect
    pub fn reset(&mut self, component: &str) {
        if self.consecutive_failures > 0 {
            info!(
                "{} recovered after {} failed attempts",
                component, self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Capped exponential delay for the given zero-based retry index
    pub fn calculate_delay(&self, retry_index: u32) -> Duration {
        let factor = self.config.multiplier.max(1.0).powi(retry_index.min(64) as i32);
        let delay_secs = self.config.base_delay.as_secs_f64() * factor;

        if !delay_secs.is_finite() || delay_secs >= self.config.max_delay.as_secs_f64() {
            self.config.max_delay
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_is_capped() {
        let manager = RecoveryManager::new(RecoveryConfig::default());
        assert_eq!(manager.calculate_delay(0), Duration::from_secs(2));
        assert_eq!(manager.calculate_delay(1), Duration::from_secs(3));
        assert_eq!(manager.calculate_delay(2), Duration::from_millis(4500));
        assert_eq!(manager.calculate_delay(20), Duration::from_secs(30));
        assert_eq!(manager.calculate_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_fixed_delay() {
        let manager = RecoveryManager::new(RecoveryConfig {
            multiplier: 1.0,
            ..RecoveryConfig::default()
        });
        assert_eq!(manager.calculate_delay(0), manager.calculate_delay(5));
    }

    #[test]
    fn test_retry_budget() {
        let mut manager = RecoveryManager::new(RecoveryConfig {
            max_retries: 2,
            ..RecoveryConfig::default()
        });

        assert!(matches!(
            manager.handle_failure("stream", &"refused"),
            RecoveryAction::RetryAfterDelay(_)
        ));
        assert!(matches!(
            manager.handle_failure("stream", &"refused"),
            RecoveryAction::RetryAfterDelay(_)
        ));
        assert_eq!(manager.handle_failure("stream", &"refused"), RecoveryAction::GiveUp);
    }

    #[test]
    fn test_reset_restores_budget() {
        let mut manager = RecoveryManager::new(RecoveryConfig {
            max_retries: 1,
            ..RecoveryConfig::default()
        });

        manager.handle_failure("stream", &"refused");
        manager.reset("stream");
        assert_eq!(manager.consecutive_failures(), 0);
        assert!(matches!(
            manager.handle_failure("stream", &"refused"),
            RecoveryAction::RetryAfterDelay(_)
        ));
    }
}
