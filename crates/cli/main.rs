use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use tile_recovery_core::config::{RecoveryConfig, default_config_path};
use tile_recovery_core::notify::ChannelSink;
use tile_recovery_core::output::{self, NotificationLine, ProbeOutcome, ProbeReport};
use tile_recovery_core::{
    LoadError, RecoveredTile, RecoveryEngine, ResourceClass, ResourceDescriptor, Severity,
    StaticLocators, TileLoader, TileLocator, monitoring,
};

const RESOURCE_ID: &str = "tile";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ClassArg {
    ContinuousForecast,
    LimitedTemporal,
    Static,
}

impl From<ClassArg> for ResourceClass {
    fn from(class: ClassArg) -> Self {
        match class {
            ClassArg::ContinuousForecast => ResourceClass::ContinuousForecast,
            ClassArg::LimitedTemporal => ResourceClass::LimitedTemporal,
            ClassArg::Static => ResourceClass::Static,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "tile-probe",
    version,
    about = "Fetch a map tile and let the recovery engine retry it"
)]
struct Cli {
    /// Tile request URL
    url: String,

    /// Display name used in notifications
    #[arg(long, default_value = "Probed layer")]
    name: String,

    /// How the layer's data behaves over time
    #[arg(long, value_enum, default_value_t = ClassArg::ContinuousForecast)]
    class: ClassArg,

    /// Alternate upstream base URL for the last-resort retry step
    #[arg(long)]
    fallback_base: Option<String>,

    /// Recovery config file (default: user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Give up waiting for recovery after this many seconds
    #[arg(long, default_value_t = 60)]
    wait_secs: u64,

    /// Output format: json or table
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Log engine activity to stderr
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.debug {
        monitoring::init_monitoring()?;
    } else {
        monitoring::init_monitoring_with_json(true)?;
    }

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = RecoveryConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let mut locator = TileLocator::parse(&cli.url)?;
    if let Some(base) = &cli.fallback_base {
        locator = locator.with_fallback_base(base)?;
    }
    let locators = StaticLocators::new();
    locators.insert(RESOURCE_ID, locator);

    let (sink, mut notes) = ChannelSink::new();
    let (tx, mut recovered) = mpsc::unbounded_channel();
    let engine = RecoveryEngine::builder()
        .config(config)
        .sink(Arc::new(sink))
        .locators(Arc::new(locators))
        .on_recovered(move |tile| {
            let _ = tx.send(tile);
        })
        .build()?;

    let loader = TileLoader::new(engine.clone());
    loader.install()?;

    let resource = ResourceDescriptor::new(RESOURCE_ID, &cli.name, cli.class.into());
    let mut seen = Vec::new();
    let (outcome, bytes) = match loader.load(&resource).await {
        Ok(payload) => (ProbeOutcome::Loaded, Some(payload.bytes.len())),
        Err(LoadError::Unavailable { category, .. }) => {
            tracing::info!(category = %category, "failure is not retried");
            (ProbeOutcome::Failed, None)
        }
        Err(LoadError::Deferred { .. }) => {
            let wait = Duration::from_secs(cli.wait_secs);
            match await_recovery(&mut recovered, &mut notes, &mut seen, wait).await {
                Some(tile) => (
                    ProbeOutcome::Recovered {
                        attempt: tile.attempt,
                        transport: tile.payload.transport,
                    },
                    Some(tile.payload.bytes.len()),
                ),
                None => (ProbeOutcome::Failed, None),
            }
        }
        Err(e) => return Err(e.into()),
    };

    while let Ok(note) = notes.try_recv() {
        seen.push(note);
    }
    let report = ProbeReport {
        url: cli.url.clone(),
        outcome,
        bytes,
        state: engine.resource_state(RESOURCE_ID).await,
        health: engine.service_health().await,
        notifications: seen.into_iter().map(NotificationLine::from).collect(),
    };

    match cli.format {
        OutputFormat::Json => output::print_pretty_json(&report),
        OutputFormat::Table => output::print_table(&report),
    }

    if report.outcome == ProbeOutcome::Failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Wait until a retry delivers the tile, the engine gives up, or time runs out.
/// An error notification is only ever sent on exhaustion.
async fn await_recovery(
    recovered: &mut mpsc::UnboundedReceiver<RecoveredTile>,
    notes: &mut mpsc::UnboundedReceiver<(Severity, String, Duration)>,
    seen: &mut Vec<(Severity, String, Duration)>,
    wait: Duration,
) -> Option<RecoveredTile> {
    let deadline = Instant::now() + wait;
    loop {
        tokio::select! {
            tile = recovered.recv() => return tile,
            Some(note) = notes.recv() => {
                let exhausted = note.0 == Severity::Error;
                seen.push(note);
                if exhausted {
                    return None;
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(wait_secs = wait.as_secs(), "gave up waiting for recovery");
                return None;
            }
        }
    }
}
