//! HazardLens CLI
//!
//! Runs the hazard analysis orchestrator over a single captured frame, or
//! verifies every configured on-device model against the trusted registry.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use tracing::info;

mod commands;
mod config;

#[derive(Parser, Debug)]
#[command(name = "hazardlens")]
#[command(about = "Construction site hazard analysis", long_about = None)]
struct Cli {
    /// Orchestrator configuration file (YAML)
    #[arg(short, long, global = true, env = "HAZARDLENS_CONFIG")]
    config: Option<PathBuf>,

    /// Backends configuration file (YAML)
    #[arg(short, long, global = true, default_value = "backends.yaml")]
    backends: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print Prometheus metrics to stderr when done
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one frame and print the result as JSON
    Analyze(AnalyzeArgs),

    /// Check every on-device model without loading it
    VerifyModels,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Raw packed RGB8 frame
    #[arg(short, long)]
    pub image: PathBuf,

    #[arg(long)]
    pub width: u32,

    #[arg(long)]
    pub height: u32,

    /// Encoded JPEG original, forwarded to the cloud backend
    #[arg(long)]
    pub jpeg: Option<PathBuf>,

    /// Photo identifier; defaults to the image file stem
    #[arg(long)]
    pub photo_id: Option<String>,

    /// offline, poor, marginal or good
    #[arg(long, default_value = "good", value_parser = config::parse_snake_case::<hazardlens_core::Connectivity>)]
    pub connectivity: hazardlens_core::Connectivity,

    /// e.g. general_construction, roadwork, roofing
    #[arg(long, value_parser = config::parse_snake_case::<hazardlens_core::WorkType>)]
    pub work_type: Option<hazardlens_core::WorkType>,

    /// Route to the cloud backend first
    #[arg(long)]
    pub force_cloud: bool,

    /// Disable on-device fallback when forcing cloud
    #[arg(long)]
    pub no_fallback: bool,

    /// nominal, fair, serious or critical
    #[arg(long, default_value = "nominal", value_parser = config::parse_snake_case::<hazardlens_orchestrator::ThermalState>)]
    pub thermal: hazardlens_orchestrator::ThermalState,

    /// Device memory in MB
    #[arg(long, default_value = "4096")]
    pub memory_mb: u64,

    /// Memory currently available in MB; defaults to --memory-mb
    #[arg(long)]
    pub available_mb: Option<u64>,

    #[arg(long)]
    pub gpu: bool,

    #[arg(long)]
    pub npu: bool,

    /// Battery charge in percent
    #[arg(long)]
    pub battery: Option<u8>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let metrics_handle = if cli.metrics {
        Some(init_metrics()?)
    } else {
        None
    };

    let app = config::AppConfig::load(cli.config.as_deref(), &cli.backends)?;
    info!(
        backends = app.backends.backends.len(),
        trusted_models = app.backends.trusted_models.len(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Analyze(args) => commands::analyze(&app, &args).await?,
        Command::VerifyModels => commands::verify_models(&app).await?,
    }

    if let Some(handle) = metrics_handle {
        eprintln!("{}", handle.render());
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("hazardlens=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hazardlens=info"))
    };

    // stdout carries the JSON result
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "hazardlens_analyses_total",
        "Completed analyses by strategy"
    );
    metrics::describe_counter!(
        "hazardlens_degraded_total",
        "Analyses that returned a degraded result"
    );
    metrics::describe_counter!(
        "hazardlens_backend_attempts_total",
        "Backend attempts by backend and outcome"
    );
    metrics::describe_histogram!(
        "hazardlens_analysis_latency_ms",
        metrics::Unit::Milliseconds,
        "End-to-end analysis latency in milliseconds"
    );
    metrics::describe_counter!(
        "hazardlens_preview_dropped_total",
        "Live preview frames dropped by the rate limiter"
    );

    info!("Metrics exporter initialized");
    Ok(handle)
}
