use metrics::{counter, gauge};
use tracing::info;

use crate::classifier::ErrorCategory;
use crate::health::ServiceHealth;

/// Initialize tracing subscriber and metrics exporter
pub fn init_monitoring() -> anyhow::Result<()> {
    init_monitoring_with_json(false)
}

/// Initialize monitoring with option to suppress logging for JSON output
pub fn init_monitoring_with_json(json_output: bool) -> anyhow::Result<()> {
    if json_output {
        // stdout carries the JSON document; keep the log to errors only
        init_tracing_quiet();
    } else {
        init_tracing();
    }

    // Skip metrics exporter in tests or when disabled
    if std::env::var("TILE_RECOVERY_NO_METRICS").is_ok() {
        return Ok(());
    }

    let port = find_available_port(9899).unwrap_or(9909);
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([127, 0, 0, 1], port))
        .install()?;

    if !json_output {
        info!("Metrics endpoint available at http://localhost:{}/metrics", port);
    }
    Ok(())
}

/// Initialize tracing subscriber with default configuration
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tile_recovery_core=debug,tile_probe=info".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}

/// Errors only, no colour
pub fn init_tracing_quiet() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from("error"))
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn find_available_port(start_port: u16) -> Option<u16> {
    (start_port..(start_port + 10))
        .find(|&port| std::net::TcpListener::bind(("127.0.0.1", port)).is_ok())
}

pub fn record_failure(category: ErrorCategory) {
    counter!("tile_recovery_failures_total", "category" => category.as_str()).increment(1);
}

pub fn record_retry(category: ErrorCategory, attempt: u32) {
    counter!("tile_recovery_retries_total", "category" => category.as_str()).increment(1);
    gauge!("tile_recovery_last_attempt").set(attempt as f64);
}

pub fn record_recovered() {
    counter!("tile_recovery_recovered_total").increment(1);
}

pub fn record_exhausted() {
    counter!("tile_recovery_exhausted_total").increment(1);
}

pub fn record_health(health: &ServiceHealth) {
    gauge!("tile_recovery_problematic_resources").set(health.problematic as f64);
    gauge!("tile_recovery_exhausted_resources").set(health.exhausted as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ServiceStatus;

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_failure(ErrorCategory::ProtocolError);
        record_retry(ErrorCategory::ServerError, 3);
        record_recovered();
        record_exhausted();
        record_health(&ServiceHealth {
            status: ServiceStatus::Healthy,
            total_resources: 0,
            healthy: 0,
            retrying: 0,
            problematic: 0,
            exhausted: 0,
            total_errors: 0,
        });
    }

    #[test]
    fn tracing_init_is_repeatable() {
        init_tracing_quiet();
        init_tracing();
    }
}
