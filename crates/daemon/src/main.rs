//! Volley - synchronized batch runner
//!
//! Loads a world file, then preps and/or extracts a target with the
//! saturation and extraction planners.

mod config;
mod telemetry;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use volley_core::application::{
    shutdown_channel, BatchExecutor, BatchPlanner, Campaign, ChannelBroker, ExtractionPlanner,
    PassReport, SaturationPlanner, ShutdownToken,
};
use volley_core::port::id_provider::UuidProvider;
use volley_core::port::time_provider::MonotonicTimeProvider;
use volley_core::port::TimeProvider;
use volley_infra_system::{SimulatedWorld, TaskLauncher};

use crate::config::{expand_path, VolleyConfig, DEFAULT_WORLD_PATH};

const DEFAULT_LOG_FILTER: &str = "volley=info";
/// Owner name the executor registers its channel under
const CHANNEL_OWNER: &str = "volley";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Restore the target to minimum instability and maximum value
    Prep,
    /// Extract from an already prepped target
    Extract,
    /// Prep, then extract
    Auto,
}

#[derive(Debug, Parser)]
#[command(name = "volley")]
#[command(about = "Plan and run synchronized job batches", long_about = None)]
#[command(version)]
struct Cli {
    /// Target to work on
    target: String,

    /// World file (nodes and targets)
    #[arg(long, env = "VOLLEY_WORLD_PATH", default_value = DEFAULT_WORLD_PATH)]
    world: String,

    /// JSON file overriding planner and executor settings
    #[arg(long, env = "VOLLEY_CONFIG_PATH")]
    config: Option<String>,

    #[arg(long, value_enum, default_value_t = Mode::Auto)]
    mode: Mode,

    /// Stop extraction after this many passes
    #[arg(long)]
    passes: Option<usize>,

    /// Random worker startup delay, up to this many ms
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging()?;

    info!(
        version = volley_core::VERSION,
        target = %cli.target,
        mode = ?cli.mode,
        "Volley starting"
    );

    let config_path = cli.config.as_deref().map(expand_path);
    let config = VolleyConfig::load(config_path.as_deref().map(Path::new))?;

    let world_path = expand_path(&cli.world);
    let world = Arc::new(
        SimulatedWorld::load(config.planner.model, Path::new(&world_path))
            .with_context(|| format!("Failed to load world {}", world_path))?,
    );

    // Dependency Injection
    let broker = Arc::new(ChannelBroker::new());
    broker.start()?;
    let clock: Arc<dyn TimeProvider> = Arc::new(MonotonicTimeProvider::new());

    // First Ctrl+C stops between passes, a second aborts waiting workers
    let (stop_sender, stop) = shutdown_channel();
    let (abort_sender, abort) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Ctrl+C received, finishing the current pass");
        stop_sender.shutdown();
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second Ctrl+C, aborting waiting workers");
            abort_sender.shutdown();
        }
    });

    let launcher = Arc::new(
        TaskLauncher::new(
            world.clone(),
            broker.clone(),
            clock.clone(),
            config.planner.model,
        )
        .with_startup_jitter(Duration::from_millis(cli.jitter_ms))
        .with_shutdown(abort),
    );
    let mut executor = BatchExecutor::new(launcher, broker.clone(), clock, config.executor);
    executor.bind_channel(CHANNEL_OWNER, Some(&cli.target))?;

    let saturation: Arc<dyn BatchPlanner> = Arc::new(SaturationPlanner::new(config.planner));
    let extraction: Arc<dyn BatchPlanner> = Arc::new(ExtractionPlanner::new(config.planner));
    let mut campaign = Campaign::new(
        saturation,
        world.clone(),
        world.clone(),
        executor,
        Arc::new(UuidProvider),
    )
    .with_report_sink(Arc::new(print_report));

    let outcome = run(&mut campaign, &cli, extraction, &stop).await;

    if let Err(e) = campaign.executor_mut().release_channel(Some(&cli.target)) {
        warn!(error = %e, "Failed to release channel");
    }
    broker.stop()?;

    let reports = outcome?;
    info!(
        passes = reports.len(),
        extracted = %world.total_extracted(),
        "Volley finished"
    );

    telemetry::shutdown();
    Ok(())
}

/// Emit one pass report as a JSON line on stdout
fn print_report(report: &PassReport) {
    match serde_json::to_string(report) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!(pass_id = %report.pass_id, error = %e, "Failed to serialize report"),
    }
}

async fn run(
    campaign: &mut Campaign,
    cli: &Cli,
    extraction: Arc<dyn BatchPlanner>,
    stop: &ShutdownToken,
) -> volley_core::Result<Vec<PassReport>> {
    let mut reports = Vec::new();

    if matches!(cli.mode, Mode::Prep | Mode::Auto) {
        reports.extend(campaign.run_until_prepped(&cli.target, stop).await?);
    }
    if matches!(cli.mode, Mode::Extract | Mode::Auto) && !stop.is_shutdown() {
        campaign.set_planner(extraction);
        reports.extend(
            campaign
                .run_extraction(&cli.target, cli.passes, stop)
                .await?,
        );
    }
    Ok(reports)
}

/// Install the log subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: filter (default: volley=info)
/// - `VOLLEY_LOG_FORMAT`: `json` or `pretty` (default)
/// - `VOLLEY_LOG_DIR`: write daily rolling files there instead of stderr
fn init_logging() -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Invalid log filter")?;
    let json = std::env::var("VOLLEY_LOG_FORMAT")
        .map(|format| format == "json")
        .unwrap_or(false);

    let (writer, guard) = match std::env::var("VOLLEY_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(expand_path(&dir), "volley.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        Err(_) => (BoxMakeWriter::new(std::io::stderr), None),
    };
    let ansi = guard.is_none();

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(telemetry::layer()?);
    if json {
        registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_ansi(ansi).with_writer(writer))
            .try_init()
    }
    .context("Failed to install log subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["volley", "joesguns"]).unwrap();
        assert_eq!(cli.target, "joesguns");
        assert_eq!(cli.mode, Mode::Auto);
        assert_eq!(cli.passes, None);
        assert_eq!(cli.jitter_ms, 0);
    }

    #[test]
    fn test_cli_mode_and_passes() {
        let cli = Cli::try_parse_from([
            "volley",
            "joesguns",
            "--mode",
            "extract",
            "--passes",
            "3",
            "--world",
            "/tmp/world.json",
        ])
        .unwrap();
        assert_eq!(cli.mode, Mode::Extract);
        assert_eq!(cli.passes, Some(3));
        assert_eq!(cli.world, "/tmp/world.json");
    }

    #[test]
    fn test_cli_requires_target() {
        assert!(Cli::try_parse_from(["volley"]).is_err());
        assert!(Cli::try_parse_from(["volley", "joesguns", "--mode", "sideways"]).is_err());
    }
}
