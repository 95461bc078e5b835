use colored_json::ToColoredJson;
use serde::Serialize;
use std::time::Duration;
use tabled::{Table, Tabled, settings::Style};
use terminal_size::{Width as TWidth, terminal_size};
use textwrap::fill as tw_fill;

use crate::health::ServiceHealth;
use crate::notify::Severity;
use crate::state::ResourceState;
use crate::transport::TransportKind;

/// How a probed tile ended up
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "outcome")]
pub enum ProbeOutcome {
    /// First request succeeded
    Loaded,
    /// A retry delivered the tile
    Recovered { attempt: u32, transport: TransportKind },
    /// Exhausted, or still failing when the wait ran out
    Failed,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NotificationLine {
    pub severity: Severity,
    pub message: String,
    pub duration_ms: u64,
}

impl From<(Severity, String, Duration)> for NotificationLine {
    fn from((severity, message, duration): (Severity, String, Duration)) -> Self {
        Self {
            severity,
            message,
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Everything the probe learned about one tile
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub url: String,
    #[serde(flatten)]
    pub outcome: ProbeOutcome,
    pub bytes: Option<usize>,
    pub state: Option<ResourceState>,
    pub health: ServiceHealth,
    pub notifications: Vec<NotificationLine>,
}

pub fn calc_message_wrap_columns() -> usize {
    let term_cols = match terminal_size().map(|(w, _)| w) {
        Some(TWidth(n)) if n > 20 => n as usize,
        _ => 100usize,
    };
    term_cols.saturating_sub(20).max(20)
}

pub fn print_pretty_json(report: &ProbeReport) {
    match serde_json::to_string_pretty(report) {
        Ok(s) => match s.to_colored_json_auto() {
            Ok(cs) => println!("{cs}"),
            Err(_) => println!("{s}"),
        },
        Err(e) => eprintln!("failed to serialize report: {e}"),
    }
}

pub fn print_table(report: &ProbeReport) {
    let rows = summary_rows(report);
    let plain = std::env::var("NO_TABLE").ok().as_deref() == Some("1");

    println!("{}:", report.url);
    if plain {
        for r in &rows {
            println!("  {}: {}", r.field, r.value);
        }
    } else {
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    if report.notifications.is_empty() {
        println!("No notifications.");
        return;
    }
    let wrap = calc_message_wrap_columns();
    let lines: Vec<NoteRow> = report
        .notifications
        .iter()
        .map(|n| NoteRow {
            severity: format!("{:?}", n.severity).to_lowercase(),
            message: if n.message.len() > wrap {
                tw_fill(&n.message, wrap)
            } else {
                n.message.clone()
            },
        })
        .collect();
    println!("notifications:");
    if plain {
        for n in &lines {
            println!("  - [{}] {}", n.severity, n.message);
        }
    } else {
        let mut table = Table::new(lines);
        table.with(Style::rounded());
        println!("{table}");
    }
}

#[derive(Clone, Tabled)]
struct SummaryRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Clone, Tabled)]
struct NoteRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn summary_rows(report: &ProbeReport) -> Vec<SummaryRow> {
    let outcome = match report.outcome {
        ProbeOutcome::Loaded => "loaded".to_string(),
        ProbeOutcome::Recovered { attempt, transport } => {
            format!("recovered (attempt {attempt}, {transport})")
        }
        ProbeOutcome::Failed => "failed".to_string(),
    };
    let mut rows = vec![SummaryRow {
        field: "outcome",
        value: outcome,
    }];
    if let Some(bytes) = report.bytes {
        rows.push(SummaryRow {
            field: "bytes",
            value: bytes.to_string(),
        });
    }
    if let Some(state) = &report.state {
        rows.push(SummaryRow {
            field: "total errors",
            value: state.total_errors.to_string(),
        });
        rows.push(SummaryRow {
            field: "consecutive errors",
            value: state.consecutive_errors.to_string(),
        });
        rows.push(SummaryRow {
            field: "category",
            value: state
                .error_category
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
        });
        rows.push(SummaryRow {
            field: "exhausted",
            value: state.is_exhausted().to_string(),
        });
    }
    rows.push(SummaryRow {
        field: "service",
        value: format!("{:?}", report.health.status).to_lowercase(),
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ServiceStatus;

    fn report(outcome: ProbeOutcome) -> ProbeReport {
        ProbeReport {
            url: "http://tiles.example.org/wms".into(),
            outcome,
            bytes: Some(12),
            state: None,
            health: ServiceHealth {
                status: ServiceStatus::Healthy,
                total_resources: 1,
                healthy: 1,
                retrying: 0,
                problematic: 0,
                exhausted: 0,
                total_errors: 0,
            },
            notifications: vec![],
        }
    }

    #[test]
    fn outcome_is_flattened_into_report_json() {
        let value = serde_json::to_value(report(ProbeOutcome::Recovered {
            attempt: 2,
            transport: TransportKind::Standard,
        }))
        .unwrap();
        assert_eq!(value["outcome"], "recovered");
        assert_eq!(value["attempt"], 2);
        assert_eq!(value["transport"], "standard");
        assert_eq!(value["health"]["status"], "healthy");
    }

    #[test]
    fn summary_rows_describe_outcome() {
        let rows = summary_rows(&report(ProbeOutcome::Loaded));
        assert_eq!(rows[0].value, "loaded");
        assert_eq!(rows[1].field, "bytes");
        assert_eq!(rows.last().unwrap().value, "healthy");
    }

    #[test]
    fn notification_line_from_tuple() {
        let line = NotificationLine::from((Severity::Warning, "slow".to_string(), Duration::from_secs(6)));
        assert_eq!(line.duration_ms, 6000);
    }

    #[test]
    fn printing_does_not_panic() {
        let mut r = report(ProbeOutcome::Failed);
        r.notifications.push(NotificationLine {
            severity: Severity::Error,
            message: "x".repeat(300),
            duration_ms: 10,
        });
        print_pretty_json(&r);
        print_table(&r);
    }

    #[test]
    fn wrap_columns_have_a_floor() {
        assert!(calc_message_wrap_columns() >= 20);
    }
}
