//! User-facing notifications with per-resource, per-tier de-duplication.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::classifier::ErrorCategory;
use crate::config::RecoveryConfig;
use crate::models::ResourceClass;
use crate::state::ResourceState;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    pub resource_id: String,
    pub severity: Severity,
    pub message: String,
    pub duration: Duration,
}

/// Receives notifications; how they are rendered is up to the host
pub trait NotificationSink: Send + Sync {
    fn notify(&self, severity: Severity, message: &str, duration: Duration);
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, severity: Severity, message: &str, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        match severity {
            Severity::Error => tracing::error!(duration_ms, "{}", message),
            Severity::Warning => tracing::warn!(duration_ms, "{}", message),
            Severity::Info | Severity::Success => tracing::info!(duration_ms, "{}", message),
        }
    }
}

/// Forwards notifications over a channel, e.g. to a UI task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(Severity, String, Duration)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Severity, String, Duration)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, severity: Severity, message: &str, duration: Duration) {
        // Receiver gone means nobody is displaying anything
        let _ = self.tx.send((severity, message.to_string(), duration));
    }
}

/// Escalation tiers that may each be announced once per unhealthy episode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTier {
    ProtocolNotice,
    ProtocolWarning,
    ServerError,
    Exhausted,
}

/// Which tiers were already shown for a resource
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct NotificationState {
    pub protocol_notice: bool,
    pub protocol_warning: bool,
    pub server_error: bool,
    pub exhausted: bool,
}

impl NotificationState {
    pub fn any(&self) -> bool {
        self.protocol_notice || self.protocol_warning || self.server_error || self.exhausted
    }

    pub fn is_set(&self, tier: NotificationTier) -> bool {
        match tier {
            NotificationTier::ProtocolNotice => self.protocol_notice,
            NotificationTier::ProtocolWarning => self.protocol_warning,
            NotificationTier::ServerError => self.server_error,
            NotificationTier::Exhausted => self.exhausted,
        }
    }

    fn set(&mut self, tier: NotificationTier) {
        match tier {
            NotificationTier::ProtocolNotice => self.protocol_notice = true,
            NotificationTier::ProtocolWarning => self.protocol_warning = true,
            NotificationTier::ServerError => self.server_error = true,
            NotificationTier::Exhausted => self.exhausted = true,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Decides whether a state change deserves a user-visible message
#[derive(Debug, Clone)]
pub struct NotificationGate {
    protocol_notice_at: u32,
    protocol_warning_at: u32,
    server_error_notify_at: u32,
    notice_duration: Duration,
    warning_duration: Duration,
    error_duration: Duration,
    success_duration: Duration,
}

impl Default for NotificationGate {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

impl NotificationGate {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            protocol_notice_at: config.protocol_notice_at,
            protocol_warning_at: config.protocol_warning_at,
            server_error_notify_at: config.server_error_notify_at,
            notice_duration: Duration::from_millis(config.notice_duration_ms),
            warning_duration: Duration::from_millis(config.warning_duration_ms),
            error_duration: Duration::from_millis(config.error_duration_ms),
            success_duration: Duration::from_millis(config.success_duration_ms),
        }
    }

    /// Called after a failure has been counted
    pub fn on_failure(
        &self,
        flags: &mut NotificationState,
        state: &ResourceState,
        category: ErrorCategory,
    ) -> Option<Notification> {
        let errors = state.consecutive_errors;
        let name = &state.resource_name;

        let (tier, severity, duration, message) = match category {
            ErrorCategory::ProtocolError
                if errors >= self.protocol_warning_at
                    && !flags.is_set(NotificationTier::ProtocolWarning) =>
            {
                (
                    NotificationTier::ProtocolWarning,
                    Severity::Warning,
                    self.warning_duration,
                    format!("{name}: connection problems persist, trying alternative ways to load tiles"),
                )
            }
            ErrorCategory::ProtocolError
                if errors == self.protocol_notice_at
                    && !flags.is_set(NotificationTier::ProtocolNotice) =>
            {
                (
                    NotificationTier::ProtocolNotice,
                    Severity::Info,
                    self.notice_duration,
                    format!("{name}: map server connection interrupted, retrying"),
                )
            }
            ErrorCategory::ServerError
                if errors >= self.server_error_notify_at
                    && !flags.is_set(NotificationTier::ServerError) =>
            {
                (
                    NotificationTier::ServerError,
                    Severity::Warning,
                    self.warning_duration,
                    format!("{name}: the map server is reporting errors, retrying with simpler requests"),
                )
            }
            _ => return None,
        };

        flags.set(tier);
        Some(Notification {
            resource_id: state.resource_id.clone(),
            severity,
            message,
            duration,
        })
    }

    /// Final notice once the retry budget is spent
    pub fn on_exhausted(
        &self,
        flags: &mut NotificationState,
        state: &ResourceState,
    ) -> Option<Notification> {
        if flags.is_set(NotificationTier::Exhausted) {
            return None;
        }
        flags.set(NotificationTier::Exhausted);
        Some(Notification {
            resource_id: state.resource_id.clone(),
            severity: Severity::Error,
            message: exhausted_message(state),
            duration: self.error_duration,
        })
    }

    /// Clears the flags; announces the recovery if anything had been shown
    pub fn on_recovered(
        &self,
        flags: &mut NotificationState,
        state: &ResourceState,
    ) -> Option<Notification> {
        let announced = flags.any();
        flags.clear();
        announced.then(|| Notification {
            resource_id: state.resource_id.clone(),
            severity: Severity::Success,
            message: format!("{}: tiles restored", state.resource_name),
            duration: self.success_duration,
        })
    }
}

fn exhausted_message(state: &ResourceState) -> String {
    let name = &state.resource_name;
    match (state.resource_class, state.error_category) {
        (_, Some(ErrorCategory::AccessDenied)) => {
            format!("{name}: access was denied by the map server")
        }
        (_, Some(ErrorCategory::ResourceNotFound)) => {
            format!("{name}: the map server does not provide this layer for the selected time")
        }
        (ResourceClass::LimitedTemporal, _) => {
            format!("{name}: no data is published for the selected time")
        }
        (ResourceClass::Static, _) => {
            format!("{name}: the layer could not be loaded, check the layer configuration")
        }
        (ResourceClass::ContinuousForecast, _) => format!(
            "{name}: forecast tiles are unavailable after {} failed attempts, try again later",
            state.consecutive_errors
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceDescriptor;
    use std::time::SystemTime;

    fn state(class: ResourceClass) -> ResourceState {
        ResourceState::new(&ResourceDescriptor::new("tpeak-layer", "Peak period", class))
    }

    fn fail(
        gate: &NotificationGate,
        flags: &mut NotificationState,
        state: &mut ResourceState,
        category: ErrorCategory,
    ) -> Option<Notification> {
        state.record_failure(category, SystemTime::now());
        gate.on_failure(flags, state, category)
    }

    #[test]
    fn protocol_notice_then_warning() {
        let gate = NotificationGate::default();
        let mut flags = NotificationState::default();
        let mut s = state(ResourceClass::ContinuousForecast);

        let fired: Vec<Option<Severity>> = (0..8)
            .map(|_| {
                fail(&gate, &mut flags, &mut s, ErrorCategory::ProtocolError).map(|n| n.severity)
            })
            .collect();
        assert_eq!(
            fired,
            vec![
                None,
                Some(Severity::Info),
                None,
                Some(Severity::Warning),
                None,
                None,
                None,
                None
            ]
        );
        assert!(flags.protocol_notice && flags.protocol_warning);
    }

    #[test]
    fn server_error_fires_once_at_threshold() {
        let gate = NotificationGate::default();
        let mut flags = NotificationState::default();
        let mut s = state(ResourceClass::ContinuousForecast);

        let count = (0..10)
            .filter_map(|_| fail(&gate, &mut flags, &mut s, ErrorCategory::ServerError))
            .inspect(|n| assert_eq!(n.severity, Severity::Warning))
            .count();
        assert_eq!(count, 1);
        assert!(flags.server_error);
    }

    #[test]
    fn other_categories_never_notify_on_failure() {
        let gate = NotificationGate::default();
        for category in [
            ErrorCategory::ExpectedDataGap,
            ErrorCategory::ConfigurationIssue,
            ErrorCategory::AccessDenied,
            ErrorCategory::ResourceNotFound,
            ErrorCategory::NetworkIssue,
        ] {
            let mut flags = NotificationState::default();
            let mut s = state(ResourceClass::ContinuousForecast);
            for _ in 0..10 {
                assert!(fail(&gate, &mut flags, &mut s, category).is_none());
            }
        }
    }

    #[test]
    fn exhaustion_fires_exactly_once() {
        let gate = NotificationGate::default();
        let mut flags = NotificationState::default();
        let s = state(ResourceClass::Static);
        let first = gate.on_exhausted(&mut flags, &s).unwrap();
        assert_eq!(first.severity, Severity::Error);
        assert!(first.message.contains("configuration"));
        assert!(gate.on_exhausted(&mut flags, &s).is_none());
    }

    #[test]
    fn exhausted_message_is_class_aware() {
        let mut s = state(ResourceClass::ContinuousForecast);
        // lifetime errors from earlier episodes do not count
        s.total_errors = 40;
        s.consecutive_errors = 7;
        assert!(exhausted_message(&s).contains("after 7 failed attempts"));
        s.error_category = Some(ErrorCategory::AccessDenied);
        assert!(exhausted_message(&s).contains("access was denied"));
        assert!(exhausted_message(&state(ResourceClass::LimitedTemporal)).contains("no data"));
    }

    #[test]
    fn recovery_clears_flags_and_announces() {
        let gate = NotificationGate::default();
        let mut flags = NotificationState::default();
        let mut s = state(ResourceClass::ContinuousForecast);
        fail(&gate, &mut flags, &mut s, ErrorCategory::ProtocolError);
        fail(&gate, &mut flags, &mut s, ErrorCategory::ProtocolError);
        assert!(flags.protocol_notice);

        let n = gate.on_recovered(&mut flags, &s).unwrap();
        assert_eq!(n.severity, Severity::Success);
        assert_eq!(flags, NotificationState::default());
        // nothing shown in a quiet episode, nothing announced
        assert!(gate.on_recovered(&mut flags, &s).is_none());
    }

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.notify(Severity::Info, "hello", Duration::from_millis(10));
        let (severity, message, duration) = rx.recv().await.unwrap();
        assert_eq!(severity, Severity::Info);
        assert_eq!(message, "hello");
        assert_eq!(duration, Duration::from_millis(10));
    }
}
