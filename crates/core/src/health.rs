use serde::Serialize;

use crate::state::{ResourcePhase, ResourceState};

/// Coarse verdict for the whole tile service
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unavailable,
}

/// Point-in-time aggregate over every tracked resource
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServiceHealth {
    pub status: ServiceStatus,
    pub total_resources: usize,
    pub healthy: usize,
    /// Retrying or escalating
    pub retrying: usize,
    /// Subset of `retrying` above the problematic threshold
    pub problematic: usize,
    pub exhausted: usize,
    pub total_errors: u64,
}

/// Read-only aggregation of resource states
#[derive(Debug, Clone, Copy)]
pub struct HealthReporter {
    max_retries: u32,
    problematic_threshold: u32,
}

impl HealthReporter {
    pub fn new(max_retries: u32, problematic_threshold: u32) -> Self {
        Self {
            max_retries,
            problematic_threshold,
        }
    }

    pub fn snapshot<'a, I>(&self, states: I) -> ServiceHealth
    where
        I: IntoIterator<Item = &'a ResourceState>,
    {
        let mut health = ServiceHealth {
            status: ServiceStatus::Healthy,
            total_resources: 0,
            healthy: 0,
            retrying: 0,
            problematic: 0,
            exhausted: 0,
            total_errors: 0,
        };

        for state in states {
            health.total_resources += 1;
            health.total_errors += state.total_errors;
            match state.phase(self.max_retries) {
                ResourcePhase::Healthy => health.healthy += 1,
                ResourcePhase::Retrying | ResourcePhase::Escalating => {
                    health.retrying += 1;
                    if state.consecutive_errors > self.problematic_threshold {
                        health.problematic += 1;
                    }
                }
                ResourcePhase::Exhausted => health.exhausted += 1,
            }
        }

        health.status = if health.total_resources > 0 && health.exhausted == health.total_resources
        {
            ServiceStatus::Unavailable
        } else if health.exhausted > 0 || health.problematic > 0 {
            ServiceStatus::Degraded
        } else {
            ServiceStatus::Healthy
        };
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorCategory;
    use crate::models::{ResourceClass, ResourceDescriptor};
    use crate::state::RecoveryProgress;
    use pretty_assertions::assert_eq;
    use std::time::SystemTime;

    fn resource(id: &str, failures: u32) -> ResourceState {
        let mut s = ResourceState::new(&ResourceDescriptor::new(
            id,
            id,
            ResourceClass::ContinuousForecast,
        ));
        for _ in 0..failures {
            s.record_failure(ErrorCategory::ServerError, SystemTime::now());
        }
        s
    }

    #[test]
    fn empty_table_is_healthy() {
        let health = HealthReporter::new(6, 3).snapshot(std::iter::empty());
        assert_eq!(health.status, ServiceStatus::Healthy);
        assert_eq!(health.total_resources, 0);
    }

    #[test]
    fn counts_each_phase() {
        let mut exhausted = resource("c", 7);
        exhausted.recovery = RecoveryProgress::Exhausted;
        let states = vec![resource("a", 0), resource("b", 2), resource("d", 5), exhausted];

        let health = HealthReporter::new(6, 3).snapshot(&states);
        assert_eq!(
            health,
            ServiceHealth {
                status: ServiceStatus::Degraded,
                total_resources: 4,
                healthy: 1,
                retrying: 2,
                problematic: 1,
                exhausted: 1,
                total_errors: 14,
            }
        );
    }

    #[test]
    fn all_exhausted_is_unavailable() {
        let mut s = resource("a", 7);
        s.recovery = RecoveryProgress::Exhausted;
        let health = HealthReporter::new(6, 3).snapshot([&s]);
        assert_eq!(health.status, ServiceStatus::Unavailable);
    }

    #[test]
    fn mild_retrying_stays_healthy() {
        let states = [resource("a", 1), resource("b", 3)];
        let health = HealthReporter::new(6, 3).snapshot(&states);
        assert_eq!(health.status, ServiceStatus::Healthy);
        assert_eq!(health.retrying, 2);
        assert_eq!(health.problematic, 0);
    }
}
