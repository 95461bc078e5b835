use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::classifier::ErrorCategory;
use crate::models::{ResourceClass, ResourceDescriptor};

/// Escalation progress since the last success
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryProgress {
    /// Number of escalation steps taken
    Attempts(u32),
    /// Retry budget spent; no more automatic attempts until reinitialized
    Exhausted,
}

impl Default for RecoveryProgress {
    fn default() -> Self {
        RecoveryProgress::Attempts(0)
    }
}

/// Phase derived from the counters, not stored
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ResourcePhase {
    Healthy,
    Retrying,
    /// Upper half of the retry budget
    Escalating,
    Exhausted,
}

/// Per-resource failure bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceState {
    pub resource_id: String,
    pub resource_name: String,
    pub resource_class: ResourceClass,
    pub consecutive_errors: u32,
    pub total_errors: u64,
    pub last_error_at: Option<SystemTime>,
    pub recovery: RecoveryProgress,
    pub error_category: Option<ErrorCategory>,
}

impl ResourceState {
    pub fn new(descriptor: &ResourceDescriptor) -> Self {
        Self {
            resource_id: descriptor.id.clone(),
            resource_name: descriptor.name.clone(),
            resource_class: descriptor.class,
            consecutive_errors: 0,
            total_errors: 0,
            last_error_at: None,
            recovery: RecoveryProgress::default(),
            error_category: None,
        }
    }

    pub fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            id: self.resource_id.clone(),
            name: self.resource_name.clone(),
            class: self.resource_class,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.recovery, RecoveryProgress::Exhausted)
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_errors == 0 && !self.is_exhausted()
    }

    pub fn attempts(&self) -> u32 {
        match self.recovery {
            RecoveryProgress::Attempts(n) => n,
            RecoveryProgress::Exhausted => 0,
        }
    }

    pub fn phase(&self, max_retries: u32) -> ResourcePhase {
        if self.is_exhausted() {
            ResourcePhase::Exhausted
        } else if self.consecutive_errors == 0 {
            ResourcePhase::Healthy
        } else if self.consecutive_errors > max_retries / 2 {
            ResourcePhase::Escalating
        } else {
            ResourcePhase::Retrying
        }
    }

    /// Count a classified failure
    pub fn record_failure(&mut self, category: ErrorCategory, at: SystemTime) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.total_errors = self.total_errors.saturating_add(1);
        self.last_error_at = Some(at);
        self.error_category = Some(category);
    }

    /// Take one escalation step. Returns the new attempt number, or `None`
    /// once the budget is spent and the resource became exhausted.
    pub fn advance_recovery(&mut self, max_retries: u32) -> Option<u32> {
        match self.recovery {
            RecoveryProgress::Exhausted => None,
            RecoveryProgress::Attempts(n) if n + 1 > max_retries => {
                self.recovery = RecoveryProgress::Exhausted;
                None
            }
            RecoveryProgress::Attempts(n) => {
                self.recovery = RecoveryProgress::Attempts(n + 1);
                Some(n + 1)
            }
        }
    }

    /// Reset after a successful load
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.recovery = RecoveryProgress::Attempts(0);
    }
}
