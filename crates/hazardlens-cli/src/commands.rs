//! Subcommand implementations

use crate::config::AppConfig;
use crate::AnalyzeArgs;
use anyhow::{bail, Context, Result};
use hazardlens_core::{CaptureMetadata, CapturedImage, ImageFormat, RgbFrame};
use hazardlens_orchestrator::{
    Acceleration, AnalysisContext, FeatureFlags, PlatformSnapshot, VerificationOutcome,
};
use std::io::Write;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Analyze one frame and print the SafetyAnalysis as JSON
pub async fn analyze(app: &AppConfig, args: &AnalyzeArgs) -> Result<()> {
    let snapshot = PlatformSnapshot {
        total_memory_mb: args.memory_mb,
        available_memory_mb: args.available_mb.unwrap_or(args.memory_mb),
        thermal: args.thermal,
        battery_percent: args.battery,
        charging: false,
        acceleration: Acceleration {
            gpu: args.gpu,
            npu: args.npu,
        },
    };
    let orchestrator = app.build_orchestrator(snapshot)?;

    let pixels = std::fs::read(&args.image)
        .with_context(|| format!("reading {}", args.image.display()))?;
    let photo_id = args.photo_id.clone().unwrap_or_else(|| {
        args.image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo".to_string())
    });

    let mut image = CapturedImage::new(
        RgbFrame::new(args.width, args.height, pixels),
        CaptureMetadata::new(photo_id),
    );
    if let Some(jpeg) = &args.jpeg {
        let data = std::fs::read(jpeg).with_context(|| format!("reading {}", jpeg.display()))?;
        image = image.with_encoded(ImageFormat::Jpeg, data);
    }

    let mut ctx = AnalysisContext::new(args.connectivity).with_flags(FeatureFlags {
        force_cloud: args.force_cloud,
        on_device_fallback_enabled: !args.no_fallback,
        ..Default::default()
    });
    if let Some(work_type) = args.work_type {
        ctx = ctx.with_work_type(work_type);
    }

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            interrupted().await;
            warn!("Interrupted, cancelling analysis");
            cancel.cancel();
        }
    });
    let result = orchestrator.analyze(image, &ctx, cancel).await;
    watcher.abort();
    let analysis = result?;

    info!(
        hazards = analysis.hazards.len(),
        violations = analysis.violations.len(),
        degraded = analysis.is_degraded,
        "Analysis finished"
    );
    print_json(&analysis)?;
    orchestrator.shutdown().await;
    Ok(())
}

/// Verify every on-device model and print a JSON report
pub async fn verify_models(app: &AppConfig) -> Result<()> {
    let orchestrator = app.build_orchestrator(PlatformSnapshot::default())?;
    let reports = orchestrator.verify_models().await;

    let rejected = reports
        .iter()
        .filter(|r| !matches!(r.outcome, VerificationOutcome::Verified))
        .count();
    print_json(&reports)?;

    if rejected > 0 {
        bail!("{rejected} of {} on-device models failed verification", reports.len());
    }
    info!(models = reports.len(), "All on-device models verified");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed
async fn interrupted() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}
