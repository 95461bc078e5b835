//! Failure classification for tile loads.
//!
//! A failed load is described by a small structured [`FailureObservation`]
//! rather than an error string, so classification is a total function over
//! `(ResourceClass, FailureObservation)`.

use serde::{Deserialize, Serialize};

use crate::models::ResourceClass;

/// Error categories driving retry and notification behaviour
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Tile legitimately has no data for an off-cadence timestamp
    ExpectedDataGap,
    /// Static layer failing, usually a layer or style misconfiguration
    ConfigurationIssue,
    /// Request never completed at the HTTP level (usually transient)
    ProtocolError,
    /// HTTP 5xx responses
    ServerError,
    /// HTTP 404 responses
    ResourceNotFound,
    /// HTTP 403 responses
    AccessDenied,
    /// Anything else
    NetworkIssue,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ExpectedDataGap => "expected-data-gap",
            ErrorCategory::ConfigurationIssue => "configuration-issue",
            ErrorCategory::ProtocolError => "protocol-error",
            ErrorCategory::ServerError => "server-error",
            ErrorCategory::ResourceNotFound => "resource-not-found",
            ErrorCategory::AccessDenied => "access-denied",
            ErrorCategory::NetworkIssue => "network-issue",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observed load failure
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureObservation {
    /// HTTP status, when a response was received at all
    pub status: Option<u16>,
    /// The request failed below HTTP (reset, refused, aborted, timed out)
    pub transport_level: bool,
    /// The attempt hit its per-step timeout
    pub timed_out: bool,
}

impl FailureObservation {
    pub fn http_status(status: u16) -> Self {
        Self {
            status: Some(status),
            transport_level: false,
            timed_out: false,
        }
    }

    pub fn transport() -> Self {
        Self {
            status: None,
            transport_level: true,
            timed_out: false,
        }
    }

    /// Timeouts are treated like any other transport failure
    pub fn timeout() -> Self {
        Self {
            status: None,
            transport_level: true,
            timed_out: true,
        }
    }

    /// Build an observation from a reqwest error
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::http_status(status.as_u16()),
            None if err.is_timeout() => Self::timeout(),
            None if err.is_connect() || err.is_request() || err.is_body() => Self::transport(),
            None => Self::default(),
        }
    }
}

/// Classify a failure. Rules are checked in order; the first match wins.
pub fn classify(class: ResourceClass, observation: &FailureObservation) -> ErrorCategory {
    match class {
        ResourceClass::LimitedTemporal => return ErrorCategory::ExpectedDataGap,
        ResourceClass::Static => return ErrorCategory::ConfigurationIssue,
        ResourceClass::ContinuousForecast => {}
    }

    match observation.status {
        None if observation.transport_level => ErrorCategory::ProtocolError,
        Some(status) if status >= 500 => ErrorCategory::ServerError,
        Some(404) => ErrorCategory::ResourceNotFound,
        Some(403) => ErrorCategory::AccessDenied,
        _ => ErrorCategory::NetworkIssue,
    }
}

/// Known, non-actionable conditions: logged, never retried or surfaced
pub fn is_silent(category: ErrorCategory) -> bool {
    matches!(
        category,
        ErrorCategory::ExpectedDataGap | ErrorCategory::ConfigurationIssue
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASSES: [ResourceClass; 3] = [
        ResourceClass::ContinuousForecast,
        ResourceClass::LimitedTemporal,
        ResourceClass::Static,
    ];

    #[test]
    fn limited_temporal_is_always_a_data_gap() {
        for obs in [
            FailureObservation::transport(),
            FailureObservation::http_status(500),
            FailureObservation::http_status(404),
        ] {
            assert_eq!(
                classify(ResourceClass::LimitedTemporal, &obs),
                ErrorCategory::ExpectedDataGap
            );
        }
    }

    #[test]
    fn static_is_always_configuration() {
        assert_eq!(
            classify(ResourceClass::Static, &FailureObservation::http_status(503)),
            ErrorCategory::ConfigurationIssue
        );
    }

    #[test]
    fn transport_failure_without_status_is_protocol_error() {
        let class = ResourceClass::ContinuousForecast;
        assert_eq!(
            classify(class, &FailureObservation::transport()),
            ErrorCategory::ProtocolError
        );
        assert_eq!(
            classify(class, &FailureObservation::timeout()),
            ErrorCategory::ProtocolError
        );
    }

    #[test]
    fn status_codes_map_to_categories() {
        let class = ResourceClass::ContinuousForecast;
        let cases = [
            (500, ErrorCategory::ServerError),
            (502, ErrorCategory::ServerError),
            (599, ErrorCategory::ServerError),
            (404, ErrorCategory::ResourceNotFound),
            (403, ErrorCategory::AccessDenied),
            (400, ErrorCategory::NetworkIssue),
            (200, ErrorCategory::NetworkIssue),
        ];
        for (status, expected) in cases {
            assert_eq!(
                classify(class, &FailureObservation::http_status(status)),
                expected,
                "status {status}"
            );
        }
    }

    #[test]
    fn status_wins_over_transport_flag() {
        let obs = FailureObservation {
            status: Some(503),
            transport_level: true,
            timed_out: false,
        };
        assert_eq!(
            classify(ResourceClass::ContinuousForecast, &obs),
            ErrorCategory::ServerError
        );
    }

    #[test]
    fn no_status_without_transport_flag_is_network_issue() {
        assert_eq!(
            classify(ResourceClass::ContinuousForecast, &FailureObservation::default()),
            ErrorCategory::NetworkIssue
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let observations = [
            FailureObservation::default(),
            FailureObservation::transport(),
            FailureObservation::timeout(),
            FailureObservation::http_status(403),
            FailureObservation::http_status(404),
            FailureObservation::http_status(504),
        ];
        for class in CLASSES {
            for obs in &observations {
                let first = classify(class, obs);
                for _ in 0..5 {
                    assert_eq!(classify(class, obs), first);
                }
            }
        }
    }

    #[test]
    fn silent_categories() {
        assert!(is_silent(ErrorCategory::ExpectedDataGap));
        assert!(is_silent(ErrorCategory::ConfigurationIssue));
        assert!(!is_silent(ErrorCategory::ProtocolError));
        assert!(!is_silent(ErrorCategory::AccessDenied));
    }

    #[test]
    fn category_display_is_kebab_case() {
        assert_eq!(ErrorCategory::ProtocolError.to_string(), "protocol-error");
        assert_eq!(ErrorCategory::ResourceNotFound.to_string(), "resource-not-found");
    }
}
