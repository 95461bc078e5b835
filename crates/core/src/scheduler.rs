use rand::Rng;
use std::time::Duration;

use crate::classifier::ErrorCategory;
use crate::config::RecoveryConfig;

/// Computes how long to wait before the next recovery attempt
#[derive(Debug, Clone)]
pub struct RecoveryScheduler {
    /// Protocol-error schedule
    protocol_base: Duration,
    protocol_step: Duration,
    protocol_max: Duration,
    /// Base delay for exponential backoff
    base_delay: Duration,
    /// Maximum delay between attempts
    max_delay: Duration,
    /// Backoff multiplier per attempt
    backoff_multiplier: f64,
    /// Jitter factor to add randomness (0.0 to 1.0)
    jitter_factor: f64,
}

impl Default for RecoveryScheduler {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

impl RecoveryScheduler {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            protocol_base: Duration::from_millis(config.protocol_base_delay_ms),
            protocol_step: Duration::from_millis(config.protocol_delay_step_ms),
            protocol_max: Duration::from_millis(config.protocol_max_delay_ms),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
        }
    }

    /// Delay before the 1-indexed `attempt`, without jitter
    pub fn base_delay(&self, category: ErrorCategory, attempt: u32) -> Duration {
        let steps = attempt.saturating_sub(1);

        if category == ErrorCategory::ProtocolError {
            // Usually transient: short linear ramp
            let delay = self.protocol_base + self.protocol_step.saturating_mul(steps);
            return delay.min(self.protocol_max);
        }

        let delay_ms =
            self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(steps.min(64) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Delay before the 1-indexed `attempt`, jittered for non-protocol
    /// categories and never above the cap
    pub fn delay(&self, category: ErrorCategory, attempt: u32) -> Duration {
        let delay = self.base_delay(category, attempt);
        if category == ErrorCategory::ProtocolError || self.jitter_factor == 0.0 {
            return delay;
        }

        // Spread retries of many tiles failing together
        let jitter_ms = (delay.as_millis() as f64 * self.jitter_factor) as u64;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        (delay + jitter).min(self.max_delay)
    }

    /// Sleep until the attempt is due
    pub async fn wait(&self, category: ErrorCategory, attempt: u32) -> Duration {
        let delay = self.delay(category, attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_delays_ramp_linearly() {
        let scheduler = RecoveryScheduler::default();
        let delays: Vec<u128> = (1..=5)
            .map(|n| scheduler.delay(ErrorCategory::ProtocolError, n).as_millis())
            .collect();
        assert_eq!(delays, vec![500, 700, 900, 1100, 1300]);
    }

    #[test]
    fn protocol_delays_stay_within_bounds() {
        let scheduler = RecoveryScheduler::default();
        let mut previous = Duration::ZERO;
        for n in 1..=50 {
            let delay = scheduler.delay(ErrorCategory::ProtocolError, n);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1500));
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn exponential_base_is_non_decreasing_and_capped() {
        let scheduler = RecoveryScheduler::default();
        assert_eq!(
            scheduler.base_delay(ErrorCategory::ServerError, 1),
            Duration::from_millis(1000)
        );
        assert_eq!(
            scheduler.base_delay(ErrorCategory::ServerError, 2),
            Duration::from_millis(1500)
        );
        assert_eq!(
            scheduler.base_delay(ErrorCategory::ServerError, 3),
            Duration::from_millis(2250)
        );

        let mut previous = Duration::ZERO;
        for n in 1..=100 {
            let delay = scheduler.base_delay(ErrorCategory::NetworkIssue, n);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_millis(8000));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_millis(8000));
    }

    #[test]
    fn jittered_delay_never_exceeds_cap() {
        let scheduler = RecoveryScheduler::default();
        for n in 1..=20 {
            for _ in 0..20 {
                let base = scheduler.base_delay(ErrorCategory::ServerError, n);
                let delay = scheduler.delay(ErrorCategory::ServerError, n);
                assert!(delay >= base);
                assert!(delay <= Duration::from_millis(8000));
                assert!(delay.as_millis() <= base.as_millis() * 13 / 10 + 1);
            }
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let config = RecoveryConfig {
            jitter_factor: 0.0,
            ..RecoveryConfig::default()
        };
        let scheduler = RecoveryScheduler::from_config(&config);
        assert_eq!(
            scheduler.delay(ErrorCategory::AccessDenied, 2),
            Duration::from_millis(1500)
        );
    }

    #[tokio::test]
    async fn wait_sleeps_for_the_delay() {
        let config = RecoveryConfig {
            protocol_base_delay_ms: 20,
            protocol_delay_step_ms: 0,
            protocol_max_delay_ms: 20,
            ..RecoveryConfig::default()
        };
        let scheduler = RecoveryScheduler::from_config(&config);
        let start = std::time::Instant::now();
        let delay = scheduler.wait(ErrorCategory::ProtocolError, 1).await;
        assert_eq!(delay, Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
