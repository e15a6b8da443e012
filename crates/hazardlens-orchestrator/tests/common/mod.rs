//! Mock backends and harness for orchestration tests
//!
//! Provides configurable mock implementations of the BackendAdapter trait
//! for exercising strategy selection, fallback, fusion and cancellation.

#![allow(dead_code)]

use async_trait::async_trait;
use hazardlens_backends::{AdapterError, BackendAdapter, ModelSecurityValidator};
use hazardlens_core::{
    BackendError, BackendId, BackendKind, BoundingBox, CaptureMetadata, CapturedImage,
    DetectionConfig, HazardType, IntegrityStatus, RawDetection, RawDetectionSet, RgbFrame,
    SanitizedImage, SecurityError,
};
use hazardlens_orchestrator::{
    Acceleration, DeviceCapabilityProfiler, HazardOrchestrator, OrchestratorConfig,
    PlatformSnapshot, StaticSignals, ThermalState,
};
use hazardlens_telemetry::InMemoryAuditSink;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const SIGNING_KEY: &[u8] = b"hazardlens-test-signing-key-0001";

/// A configurable mock backend
pub struct MockAdapter {
    id: BackendId,
    kind: BackendKind,
    detections: Vec<RawDetection>,
    min_memory_mb: u64,
    simulated_latency: Option<Duration>,
    call_count: AtomicU32,
    in_flight: AtomicU32,
    released: AtomicBool,
}

impl MockAdapter {
    /// Create a mock that reports nothing
    pub fn new(id: &str, kind: BackendKind) -> Self {
        Self {
            id: BackendId::new(id),
            kind,
            detections: Vec::new(),
            min_memory_mb: 0,
            simulated_latency: None,
            call_count: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            released: AtomicBool::new(false),
        }
    }

    /// Add a detection this backend will report
    pub fn with_detection(
        mut self,
        hazard_type: HazardType,
        bbox: (f32, f32, f32, f32),
        confidence: f32,
    ) -> Self {
        self.detections.push(RawDetection::new(
            format!("{hazard_type:?}"),
            hazard_type,
            BoundingBox::new(bbox.0, bbox.1, bbox.2, bbox.3).unwrap(),
            confidence,
        ));
        self
    }

    pub fn with_min_memory(mut self, min_memory_mb: u64) -> Self {
        self.min_memory_mb = min_memory_mb;
        self
    }

    /// Sleep this long before answering, ignoring the deadline
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.simulated_latency = Some(latency);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Calls currently running
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn was_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }
}

/// Decrements the in-flight counter when the call ends or is dropped
struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackendAdapter for MockAdapter {
    fn id(&self) -> &BackendId {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn min_memory_mb(&self) -> u64 {
        self.min_memory_mb
    }

    fn integrity(&self) -> IntegrityStatus {
        if self.kind.is_on_device() {
            IntegrityStatus::Verified
        } else {
            IntegrityStatus::NotApplicable
        }
    }

    fn is_loading(&self) -> bool {
        self.in_flight() > 0
    }

    async fn analyze(
        &self,
        _image: &SanitizedImage,
        _config: &DetectionConfig,
        _deadline: Instant,
    ) -> Result<RawDetectionSet, AdapterError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some(latency) = self.simulated_latency {
            tokio::time::sleep(latency).await;
        }

        let mut set = RawDetectionSet::new(self.id.clone(), self.kind);
        set.detections = self.detections.clone();
        set.latency_ms = self
            .simulated_latency
            .map(|d| d.as_millis() as u64)
            .unwrap_or(5);
        Ok(set)
    }

    async fn release(&self) {
        self.released.store(true, Ordering::Relaxed);
    }
}

/// A backend that always fails - for testing fallback paths
pub struct FailingAdapter {
    id: BackendId,
    kind: BackendKind,
    error: AdapterError,
    call_count: AtomicU32,
}

impl FailingAdapter {
    pub fn new(id: &str, kind: BackendKind) -> Self {
        Self {
            id: BackendId::new(id),
            kind,
            error: AdapterError::Backend(BackendError::Inference("simulated failure".into())),
            call_count: AtomicU32::new(0),
        }
    }

    pub fn with_error(mut self, error: BackendError) -> Self {
        self.error = AdapterError::Backend(error);
        self
    }

    pub fn with_security_error(mut self, error: SecurityError) -> Self {
        self.error = AdapterError::Security(error);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BackendAdapter for FailingAdapter {
    fn id(&self) -> &BackendId {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn integrity(&self) -> IntegrityStatus {
        if self.kind.is_on_device() {
            IntegrityStatus::Unverified
        } else {
            IntegrityStatus::NotApplicable
        }
    }

    async fn analyze(
        &self,
        _image: &SanitizedImage,
        _config: &DetectionConfig,
        _deadline: Instant,
    ) -> Result<RawDetectionSet, AdapterError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        Err(self.error.clone())
    }

    async fn release(&self) {}
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub orchestrator: Arc<HazardOrchestrator>,
    pub signals: Arc<StaticSignals>,
    pub audit: Arc<InMemoryAuditSink>,
    pub validator: Arc<ModelSecurityValidator>,
}

/// 8 GB device with GPU and NPU
pub fn high_end() -> PlatformSnapshot {
    PlatformSnapshot {
        total_memory_mb: 8192,
        available_memory_mb: 6144,
        thermal: ThermalState::Nominal,
        battery_percent: Some(80),
        charging: false,
        acceleration: Acceleration { gpu: true, npu: true },
    }
}

/// 4 GB device without accelerators
pub fn mid_range() -> PlatformSnapshot {
    PlatformSnapshot {
        total_memory_mb: 4096,
        available_memory_mb: 3072,
        thermal: ThermalState::Nominal,
        battery_percent: Some(80),
        charging: false,
        acceleration: Acceleration::default(),
    }
}

pub fn validator(audit: Arc<InMemoryAuditSink>) -> Arc<ModelSecurityValidator> {
    Arc::new(ModelSecurityValidator::new(SIGNING_KEY.to_vec(), audit))
}

pub fn harness(snapshot: PlatformSnapshot, adapters: Vec<Arc<dyn BackendAdapter>>) -> Harness {
    harness_with(snapshot, OrchestratorConfig::default(), adapters)
}

pub fn harness_with(
    snapshot: PlatformSnapshot,
    config: OrchestratorConfig,
    adapters: Vec<Arc<dyn BackendAdapter>>,
) -> Harness {
    let audit = Arc::new(InMemoryAuditSink::new());
    harness_with_validator(snapshot, config, adapters, audit.clone(), validator(audit))
}

pub fn harness_with_validator(
    snapshot: PlatformSnapshot,
    config: OrchestratorConfig,
    adapters: Vec<Arc<dyn BackendAdapter>>,
    audit: Arc<InMemoryAuditSink>,
    validator: Arc<ModelSecurityValidator>,
) -> Harness {
    let signals = Arc::new(StaticSignals::new(snapshot));
    let profiler = Arc::new(DeviceCapabilityProfiler::new(
        signals.clone(),
        config.profiler.clone(),
    ));
    let orchestrator =
        HazardOrchestrator::new(config, validator.clone(), profiler, adapters).unwrap();
    Harness {
        orchestrator: Arc::new(orchestrator),
        signals,
        audit,
        validator,
    }
}

/// A valid 64x48 raw frame
pub fn photo(photo_id: &str) -> CapturedImage {
    CapturedImage::new(
        RgbFrame::new(64, 48, vec![128u8; 64 * 48 * 3]),
        CaptureMetadata::new(photo_id),
    )
}
