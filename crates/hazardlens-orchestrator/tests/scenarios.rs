//! End-to-end orchestration scenarios
//!
//! Each test drives a full analysis through strategy selection, execution,
//! fusion and regulation mapping with mock or real backends.

mod common;

use common::*;
use hazardlens_backends::config::DEFAULT_CLASSES;
use hazardlens_backends::{
    sha256_hex, sign_digest, BackendAdapter, DetectionRuntime, DetectionSession, ModelSource,
    ModelSpec, OnDeviceAdapter, ValidatedModel,
};
use hazardlens_core::{
    AnalysisStrategy, AttemptOutcome, BackendError, BackendId, BackendKind, Connectivity,
    HazardType,
};
use hazardlens_orchestrator::{
    AnalysisContext, FeatureFlags, OrchestratorConfig, VerificationOutcome,
};
use hazardlens_telemetry::{event_types, InMemoryAuditSink};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Scenario A: offline, high-end device, visible PPE violation
// =============================================================================

#[tokio::test]
async fn test_offline_high_end_runs_on_device_only() {
    let npu = Arc::new(
        MockAdapter::new("full-npu", BackendKind::OnDeviceNpu)
            .with_min_memory(4096)
            .with_detection(HazardType::MissingHardHat, (0.30, 0.10, 0.45, 0.40), 0.86),
    );
    let cloud = Arc::new(MockAdapter::new("cloud", BackendKind::Cloud));
    let h = harness(high_end(), vec![npu.clone(), cloud.clone()]);

    let analysis = h
        .orchestrator
        .analyze(
            photo("scenario-a"),
            &AnalysisContext::new(Connectivity::Offline),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(analysis.strategy, AnalysisStrategy::OnDeviceOnly);
    assert_eq!(analysis.hazards.len(), 1);
    assert!(analysis.hazards[0].confidence >= 0.7);
    assert_eq!(analysis.network_attempts(), 0);
    assert_eq!(cloud.call_count(), 0);
    assert!(!analysis.is_degraded);

    assert_eq!(analysis.violations.len(), 1);
    assert_eq!(analysis.violations[0].code, "29 CFR 1926.100(a)");
}

// =============================================================================
// Scenario B: good connectivity, high-end device, cross-validated hazard
// =============================================================================

#[tokio::test]
async fn test_hybrid_fuses_overlapping_detections() {
    // IoU of these boxes is 0.6
    let npu = Arc::new(
        MockAdapter::new("full-npu", BackendKind::OnDeviceNpu)
            .with_min_memory(4096)
            .with_detection(HazardType::MissingHardHat, (0.0, 0.0, 0.5, 0.5), 0.6),
    );
    let cloud = Arc::new(
        MockAdapter::new("cloud", BackendKind::Cloud)
            .with_detection(HazardType::MissingHardHat, (0.125, 0.0, 0.625, 0.5), 0.7),
    );
    let h = harness(high_end(), vec![npu.clone(), cloud.clone()]);

    let analysis = h
        .orchestrator
        .analyze(
            photo("scenario-b"),
            &AnalysisContext::new(Connectivity::Good),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(analysis.strategy, AnalysisStrategy::HybridParallel);
    assert_eq!(analysis.hazards.len(), 1);

    let hazard = &analysis.hazards[0];
    assert!((hazard.confidence - 0.85).abs() < 1e-5);
    assert!(hazard.source_backends.contains(&BackendId::new("full-npu")));
    assert!(hazard.source_backends.contains(&BackendId::new("cloud")));
    assert_eq!(npu.call_count(), 1);
    assert_eq!(cloud.call_count(), 1);
    assert_eq!(h.orchestrator.metrics().snapshot().fused_analyses, 1);
}

// =============================================================================
// Scenario C: tampered on-device model
// =============================================================================

struct CountingRuntime {
    loads: AtomicU32,
}

impl DetectionRuntime for CountingRuntime {
    fn load(
        &self,
        _model: &ValidatedModel,
        _spec: &ModelSpec,
        _kind: BackendKind,
    ) -> Result<Arc<dyn DetectionSession>, BackendError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::ModelLoadFailure("not expected in this test".into()))
    }
}

struct TamperedModel {
    _dir: tempfile::TempDir,
    adapter: Arc<OnDeviceAdapter>,
    runtime: Arc<CountingRuntime>,
    audit: Arc<InMemoryAuditSink>,
    validator: Arc<hazardlens_backends::ModelSecurityValidator>,
}

/// A lite model whose file on disk differs from the signed, trusted digest
fn tampered_lite_model() -> TamperedModel {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("construction_safety_lite.safetensors");
    std::fs::write(&path, b"weights with an injected payload").unwrap();

    let trusted_digest = sha256_hex(b"weights as published");
    let audit = Arc::new(InMemoryAuditSink::new());
    let validator = Arc::new(
        hazardlens_backends::ModelSecurityValidator::new(SIGNING_KEY.to_vec(), audit.clone())
            .with_trusted_model("construction_safety_lite", trusted_digest.clone()),
    );

    let spec = ModelSpec {
        model_id: "construction_safety_lite".to_string(),
        source: ModelSource::Local { path },
        signature: sign_digest(SIGNING_KEY, &trusted_digest),
        sha256: trusted_digest,
        input_size: None,
        min_memory_mb: None,
        classes: DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect(),
        version: None,
    };

    let runtime = Arc::new(CountingRuntime {
        loads: AtomicU32::new(0),
    });
    let adapter = Arc::new(OnDeviceAdapter::new(
        BackendId::new("lite-cpu"),
        BackendKind::OnDeviceCpu,
        spec,
        validator.clone(),
        runtime.clone(),
    ));

    TamperedModel {
        _dir: dir,
        adapter,
        runtime,
        audit,
        validator,
    }
}

#[tokio::test]
async fn test_tampered_model_disables_backend_and_falls_back_to_cloud() {
    let model = tampered_lite_model();
    let lite = BackendId::new("lite-cpu");
    let cloud = Arc::new(
        MockAdapter::new("cloud", BackendKind::Cloud)
            .with_detection(HazardType::FallHazard, (0.2, 0.5, 0.6, 0.9), 0.9),
    );
    let h = harness_with_validator(
        mid_range(),
        OrchestratorConfig::default(),
        vec![model.adapter.clone(), cloud.clone()],
        model.audit.clone(),
        model.validator.clone(),
    );
    let ctx = AnalysisContext::new(Connectivity::Good);

    let first = h
        .orchestrator
        .analyze(photo("scenario-c-1"), &ctx, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first.strategy, AnalysisStrategy::CloudOnly);
    assert!(!first.is_degraded);
    assert_eq!(first.hazards.len(), 1);
    assert!(matches!(
        first.attempts[0].outcome,
        AttemptOutcome::SecurityRejected { .. }
    ));
    assert_eq!(first.attempts[0].backend, lite);

    // never loaded, never counted as an invocation
    assert_eq!(model.runtime.loads.load(Ordering::SeqCst), 0);
    assert_eq!(h.orchestrator.monitor().invocation_count(&lite), 0);
    assert!(h.orchestrator.monitor().is_disabled(&lite));
    assert_eq!(model.audit.count(event_types::MODEL_REJECTED), 1);
    assert_eq!(model.audit.count(event_types::BACKEND_DISABLED), 1);
    assert!(model.audit.verify());

    let second = h
        .orchestrator
        .analyze(photo("scenario-c-2"), &ctx, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.strategy, AnalysisStrategy::CloudOnly);
    assert_eq!(second.backends_attempted(), vec![BackendId::new("cloud")]);
    assert_eq!(model.audit.count(event_types::MODEL_REJECTED), 1);
    assert_eq!(cloud.call_count(), 2);
}

#[tokio::test]
async fn test_verify_models_reports_and_disables_tampered_model() {
    let model = tampered_lite_model();
    let cloud = Arc::new(MockAdapter::new("cloud", BackendKind::Cloud));
    let h = harness_with_validator(
        mid_range(),
        OrchestratorConfig::default(),
        vec![model.adapter.clone(), cloud],
        model.audit.clone(),
        model.validator.clone(),
    );

    let reports = h.orchestrator.verify_models().await;
    assert_eq!(reports.len(), 1);
    assert!(matches!(reports[0].outcome, VerificationOutcome::Rejected { .. }));
    assert!(h.orchestrator.monitor().is_disabled(&BackendId::new("lite-cpu")));
    assert!(!model.adapter.is_loading());

    // the very first analysis already skips the rejected backend
    let analysis = h
        .orchestrator
        .analyze(
            photo("after-verify"),
            &AnalysisContext::new(Connectivity::Marginal),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(analysis.strategy, AnalysisStrategy::CloudOnly);
    assert_eq!(analysis.attempts.len(), 1);
}

// =============================================================================
// Scenario D: cloud exceeds its attempt deadline with no on-device fallback
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cloud_timeout_without_fallback_degrades() {
    let lite = Arc::new(
        MockAdapter::new("lite-cpu", BackendKind::OnDeviceCpu)
            .with_detection(HazardType::MissingHardHat, (0.1, 0.1, 0.2, 0.3), 0.9),
    );
    let cloud = Arc::new(
        MockAdapter::new("cloud", BackendKind::Cloud).with_latency(Duration::from_secs(12)),
    );
    let h = harness(high_end(), vec![lite.clone(), cloud.clone()]);

    let ctx = AnalysisContext::new(Connectivity::Good).with_flags(FeatureFlags {
        force_cloud: true,
        on_device_fallback_enabled: false,
        ..Default::default()
    });

    let started = Instant::now();
    let analysis = h
        .orchestrator
        .analyze(photo("scenario-d"), &ctx, CancellationToken::new())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(analysis.is_degraded);
    assert_eq!(analysis.degraded_reason.as_deref(), Some("cloud timeout"));
    assert_eq!(analysis.strategy, AnalysisStrategy::CloudOnly);
    assert!(analysis.hazards.is_empty());
    assert!(elapsed <= Duration::from_secs(8), "took {elapsed:?}");
    assert!(analysis.processing_time_ms <= 8_000);

    assert_eq!(analysis.attempts.len(), 1);
    assert_eq!(analysis.attempts[0].outcome, AttemptOutcome::TimedOut);
    assert_eq!(lite.call_count(), 0);
    assert_eq!(cloud.in_flight(), 0);
    assert_eq!(h.orchestrator.metrics().snapshot().degraded, 1);
}
