//! Escalating fetch strategies for a failing tile.
//!
//! Attempts 1-4 rewrite the locator and stay on the standard transport.
//! From attempt 5 on, protocol errors switch transports instead, trying each
//! in turn until one yields an image.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::classifier::{ErrorCategory, FailureObservation};
use crate::config::RecoveryConfig;
use crate::locator::{LocatorVariant, TileLocator};
use crate::transport::{TilePayload, TileTransport, TransportKind};

/// First attempt at which protocol errors substitute the transport
pub const TRANSPORT_ESCALATION_ATTEMPT: u32 = 5;

/// Which endpoint a step talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Primary,
    /// The locator's alternate upstream path
    Fallback,
}

/// One fetch within an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchStep {
    pub variant: LocatorVariant,
    pub transport: TransportKind,
    pub upstream: Upstream,
}

impl FetchStep {
    fn standard(variant: LocatorVariant) -> Self {
        Self {
            variant,
            transport: TransportKind::Standard,
            upstream: Upstream::Primary,
        }
    }
}

/// Steps tried, in order, for a 1-indexed recovery attempt
pub fn steps_for(attempt: u32, category: ErrorCategory) -> Vec<FetchStep> {
    if attempt < TRANSPORT_ESCALATION_ATTEMPT || category != ErrorCategory::ProtocolError {
        return vec![FetchStep::standard(LocatorVariant::for_attempt(attempt))];
    }

    let minimal = LocatorVariant::Minimal;
    vec![
        FetchStep {
            variant: minimal,
            transport: TransportKind::AlternateClient,
            upstream: Upstream::Primary,
        },
        FetchStep {
            variant: minimal,
            transport: TransportKind::RawSocket,
            upstream: Upstream::Primary,
        },
        FetchStep {
            variant: minimal,
            transport: TransportKind::MinimalProtocol,
            upstream: Upstream::Primary,
        },
        FetchStep {
            variant: minimal,
            transport: TransportKind::Standard,
            upstream: Upstream::Fallback,
        },
    ]
}

/// Runs the steps of one recovery attempt
#[derive(Clone)]
pub struct StrategyLadder {
    transport: Arc<dyn TileTransport>,
    protocol_timeout: Duration,
    step_timeout: Duration,
}

impl StrategyLadder {
    pub fn new(transport: Arc<dyn TileTransport>, config: &RecoveryConfig) -> Self {
        Self {
            transport,
            protocol_timeout: config.step_timeout(true),
            step_timeout: config.step_timeout(false),
        }
    }

    /// Plain fetch of the unmodified locator, used for first loads
    pub async fn fetch_original(
        &self,
        locator: &TileLocator,
    ) -> Result<TilePayload, FailureObservation> {
        self.run_step(TransportKind::Standard, &locator.to_url(), self.step_timeout)
            .await
    }

    /// Try every step for `attempt`, stopping at the first usable image.
    /// Each step is derived from `original` alone.
    pub async fn attempt(
        &self,
        original: &TileLocator,
        attempt: u32,
        category: ErrorCategory,
    ) -> Result<TilePayload, FailureObservation> {
        let timeout = if category == ErrorCategory::ProtocolError {
            self.protocol_timeout
        } else {
            self.step_timeout
        };
        let token = cache_token(attempt);
        let mut last_failure = FailureObservation::transport();

        for step in steps_for(attempt, category) {
            let variant = original.variant(step.variant, &token);
            let locator = match step.upstream {
                Upstream::Primary => variant,
                Upstream::Fallback => match variant.on_fallback_base() {
                    Some(locator) => locator,
                    None => {
                        tracing::debug!(attempt, "no alternate upstream configured, skipping");
                        continue;
                    }
                },
            };

            let url = locator.to_url();
            tracing::debug!(
                attempt,
                transport = %step.transport,
                variant = ?step.variant,
                url = %url,
                "recovery step"
            );
            match self.run_step(step.transport, &url, timeout).await {
                Ok(payload) => return Ok(payload),
                Err(observation) => {
                    tracing::debug!(
                        attempt,
                        transport = %step.transport,
                        status = ?observation.status,
                        timed_out = observation.timed_out,
                        "recovery step failed"
                    );
                    last_failure = observation;
                }
            }
        }

        Err(last_failure)
    }

    async fn run_step(
        &self,
        kind: TransportKind,
        url: &str,
        timeout: Duration,
    ) -> Result<TilePayload, FailureObservation> {
        match tokio::time::timeout(timeout, self.transport.fetch(kind, url)).await {
            Ok(result) => result,
            Err(_) => Err(FailureObservation::timeout()),
        }
    }
}

fn cache_token(attempt: u32) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{attempt}-{millis}")
}
