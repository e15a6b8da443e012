//! On-device backend: validated model, lazy load, blocking inference off the reactor

use crate::adapter::{AdapterError, BackendAdapter};
use crate::config::ModelSpec;
use crate::model_loader::ModelSlot;
use crate::runtime::{DetectionRuntime, DetectionSession};
use crate::security::{ModelSecurityValidator, ValidatedModel};
use async_trait::async_trait;
use hazardlens_core::{
    BackendError, BackendId, BackendKind, DetectionConfig, IntegrityStatus, RawDetectionSet,
    SanitizedImage, SecurityError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Adapter for one on-device detector
pub struct OnDeviceAdapter {
    model: Arc<ModelArtifact>,
    slot: ModelSlot<dyn DetectionSession, AdapterError>,
}

/// Everything a background load needs, shared with the adapter
struct ModelArtifact {
    id: BackendId,
    kind: BackendKind,
    spec: ModelSpec,
    validator: Arc<ModelSecurityValidator>,
    runtime: Arc<dyn DetectionRuntime>,
    integrity: Mutex<Integrity>,
}

#[derive(Debug, Clone)]
enum Integrity {
    Unverified,
    Verified,
    Failed(SecurityError),
}

impl ModelArtifact {
    /// Fetch and validate the artifact; a failure sticks for the session
    async fn validated(&self) -> Result<ValidatedModel, AdapterError> {
        if let Integrity::Failed(e) = &*self.integrity.lock() {
            return Err(AdapterError::Security(e.clone()));
        }

        let artifact = self.spec.source.fetch().await?;
        match self.validator.validate_model(
            &self.spec.model_id,
            artifact,
            &self.spec.sha256,
            &self.spec.signature,
        ) {
            Ok(model) => {
                *self.integrity.lock() = Integrity::Verified;
                Ok(model)
            }
            Err(e) => {
                *self.integrity.lock() = Integrity::Failed(e.clone());
                Err(AdapterError::Security(e))
            }
        }
    }

    async fn load_session(self: Arc<Self>) -> Result<Arc<dyn DetectionSession>, AdapterError> {
        let model = self.validated().await?;

        let artifact = self.clone();
        let session =
            tokio::task::spawn_blocking(move || artifact.runtime.load(&model, &artifact.spec, artifact.kind))
                .await
                .map_err(|e| BackendError::ModelLoadFailure(format!("load task failed: {e}")))??;

        info!(backend = %self.id, model_id = %self.spec.model_id, "On-device model ready");
        Ok(session)
    }
}

impl OnDeviceAdapter {
    pub fn new(
        id: BackendId,
        kind: BackendKind,
        spec: ModelSpec,
        validator: Arc<ModelSecurityValidator>,
        runtime: Arc<dyn DetectionRuntime>,
    ) -> Self {
        Self {
            model: Arc::new(ModelArtifact {
                id,
                kind,
                spec,
                validator,
                runtime,
                integrity: Mutex::new(Integrity::Unverified),
            }),
            slot: ModelSlot::new(),
        }
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.model.spec
    }

    /// Whether a model is currently cached
    pub fn is_loaded(&self) -> bool {
        self.slot.is_loaded()
    }

    async fn run(
        &self,
        image: &SanitizedImage,
        config: &DetectionConfig,
    ) -> Result<RawDetectionSet, AdapterError> {
        let started = Instant::now();
        let model = self.model.clone();
        let session = self.slot.get_or_load(|| model.load_session()).await?;

        let frame = image.frame().clone();
        let detect_config = config.clone();
        let worker = session.clone();
        let detections = tokio::task::spawn_blocking(move || worker.detect(&frame, &detect_config))
            .await
            .map_err(|e| BackendError::Inference(format!("inference task failed: {e}")))??;

        let mut set = RawDetectionSet::new(self.model.id.clone(), self.model.kind);
        set.detections = detections;
        set.latency_ms = started.elapsed().as_millis() as u64;
        set.model_version = session.version();
        Ok(set)
    }
}

#[async_trait]
impl BackendAdapter for OnDeviceAdapter {
    fn id(&self) -> &BackendId {
        &self.model.id
    }

    fn kind(&self) -> BackendKind {
        self.model.kind
    }

    fn min_memory_mb(&self) -> u64 {
        self.model.spec.min_memory_mb(self.model.kind)
    }

    fn integrity(&self) -> IntegrityStatus {
        match &*self.model.integrity.lock() {
            Integrity::Unverified => IntegrityStatus::Unverified,
            Integrity::Verified => IntegrityStatus::Verified,
            Integrity::Failed(_) => IntegrityStatus::Failed,
        }
    }

    fn is_loading(&self) -> bool {
        self.slot.is_loading()
    }

    async fn analyze(
        &self,
        image: &SanitizedImage,
        config: &DetectionConfig,
        deadline: Instant,
    ) -> Result<RawDetectionSet, AdapterError> {
        let budget = deadline.saturating_duration_since(Instant::now());
        debug!(backend = %self.model.id, budget_ms = budget.as_millis() as u64, "On-device analyze");

        match tokio::time::timeout_at(deadline, self.run(image, config)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(backend = %self.model.id, "On-device attempt hit its deadline");
                Err(BackendError::InferenceTimeout {
                    backend: self.model.id.clone(),
                    timeout_ms: budget.as_millis() as u64,
                }
                .into())
            }
        }
    }

    async fn verify(&self) -> Result<(), AdapterError> {
        self.model.validated().await.map(|_| ())
    }

    async fn release(&self) {
        if self.slot.evict() {
            debug!(backend = %self.model.id, "Released on-device model");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_loader::ModelSource;
    use crate::security::{sha256_hex, sign_digest};
    use hazardlens_core::{
        BoundingBox, CaptureMetadata, CapturedImage, HazardType, InputLimits, RawDetection,
        RgbFrame,
    };
    use hazardlens_telemetry::{event_types, InMemoryAuditSink};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const KEY: &[u8] = b"on-device-test-key";

    struct FixedSession {
        delay: Duration,
    }

    impl DetectionSession for FixedSession {
        fn detect(
            &self,
            _frame: &RgbFrame,
            _config: &DetectionConfig,
        ) -> Result<Vec<RawDetection>, BackendError> {
            std::thread::sleep(self.delay);
            let b = BoundingBox::new(0.2, 0.1, 0.4, 0.5).map_err(|e| BackendError::Inference(e.to_string()))?;
            Ok(vec![RawDetection::new("no_hard_hat", HazardType::MissingHardHat, b, 0.82)])
        }
    }

    struct CountingRuntime {
        loads: AtomicU32,
        delay: Duration,
    }

    impl DetectionRuntime for CountingRuntime {
        fn load(
            &self,
            _model: &ValidatedModel,
            _spec: &ModelSpec,
            _kind: BackendKind,
        ) -> Result<Arc<dyn DetectionSession>, BackendError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FixedSession { delay: self.delay }))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        adapter: OnDeviceAdapter,
        runtime: Arc<CountingRuntime>,
        audit: Arc<InMemoryAuditSink>,
    }

    fn fixture(tamper: bool, delay: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("construction_safety_lite.safetensors");
        std::fs::write(&path, b"lite-weights").unwrap();

        let hash = sha256_hex(b"lite-weights");
        let declared = if tamper { sha256_hex(b"other-weights") } else { hash.clone() };

        let audit = Arc::new(InMemoryAuditSink::new());
        let validator = Arc::new(
            ModelSecurityValidator::new(KEY, audit.clone())
                .with_trusted_model("construction_safety_lite", hash.clone()),
        );
        let runtime = Arc::new(CountingRuntime {
            loads: AtomicU32::new(0),
            delay,
        });
        let spec = ModelSpec {
            model_id: "construction_safety_lite".to_string(),
            source: ModelSource::Local { path },
            signature: sign_digest(KEY, &declared),
            sha256: declared,
            input_size: None,
            min_memory_mb: None,
            classes: vec![],
            version: None,
        };
        let adapter = OnDeviceAdapter::new(
            BackendId::new("lite-cpu"),
            BackendKind::OnDeviceCpu,
            spec,
            validator,
            runtime.clone(),
        );

        Fixture {
            _dir: dir,
            adapter,
            runtime,
            audit,
        }
    }

    fn image() -> SanitizedImage {
        InputLimits::default()
            .sanitize(CapturedImage::new(
                RgbFrame::new(64, 64, vec![0u8; 64 * 64 * 3]),
                CaptureMetadata::new("photo-1"),
            ))
            .unwrap()
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_analyze_loads_once_and_caches() {
        let f = fixture(false, Duration::ZERO);
        let config = DetectionConfig::default();

        let first = f.adapter.analyze(&image(), &config, deadline()).await.unwrap();
        let second = f.adapter.analyze(&image(), &config, deadline()).await.unwrap();

        assert_eq!(first.detections.len(), 1);
        assert_eq!(second.backend.as_str(), "lite-cpu");
        assert_eq!(f.runtime.loads.load(Ordering::SeqCst), 1);
        assert_eq!(f.adapter.integrity(), IntegrityStatus::Verified);
        assert_eq!(f.adapter.min_memory_mb(), 2048);
    }

    #[tokio::test]
    async fn test_tampered_model_never_loads() {
        let f = fixture(true, Duration::ZERO);

        let err = f
            .adapter
            .analyze(&image(), &DetectionConfig::default(), deadline())
            .await
            .unwrap_err();

        assert!(matches!(err, AdapterError::Security(SecurityError::IntegrityMismatch { .. })));
        assert_eq!(f.adapter.integrity(), IntegrityStatus::Failed);
        assert_eq!(f.runtime.loads.load(Ordering::SeqCst), 0);
        assert_eq!(f.audit.count(event_types::MODEL_REJECTED), 1);

        // failure sticks without re-reading the artifact
        let again = f.adapter.verify().await.unwrap_err();
        assert!(matches!(again, AdapterError::Security(_)));
        assert_eq!(f.audit.count(event_types::MODEL_REJECTED), 1);
    }

    #[tokio::test]
    async fn test_deadline_yields_timeout() {
        let f = fixture(false, Duration::from_millis(300));
        let deadline = Instant::now() + Duration::from_millis(50);

        let err = f
            .adapter
            .analyze(&image(), &DetectionConfig::default(), deadline)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AdapterError::Backend(BackendError::InferenceTimeout { .. })
        ));
        assert!(!f.adapter.is_loading());
    }

    /// Runtime whose load blocks a worker thread for a while
    struct SlowRuntime {
        loads: AtomicU32,
        active: AtomicU32,
        peak: AtomicU32,
        delay: Duration,
    }

    impl DetectionRuntime for SlowRuntime {
        fn load(
            &self,
            _model: &ValidatedModel,
            _spec: &ModelSpec,
            _kind: BackendKind,
        ) -> Result<Arc<dyn DetectionSession>, BackendError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Arc::new(FixedSession { delay: Duration::ZERO }))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timed_out_load_is_joined_not_repeated() {
        let f = fixture(false, Duration::ZERO);
        let runtime = Arc::new(SlowRuntime {
            loads: AtomicU32::new(0),
            active: AtomicU32::new(0),
            peak: AtomicU32::new(0),
            delay: Duration::from_millis(400),
        });
        let adapter = OnDeviceAdapter::new(
            BackendId::new("slow-cpu"),
            BackendKind::OnDeviceCpu,
            f.adapter.spec().clone(),
            f.adapter.model.validator.clone(),
            runtime.clone(),
        );
        let config = DetectionConfig::default();

        let err = adapter
            .analyze(&image(), &config, Instant::now() + Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Backend(BackendError::InferenceTimeout { .. })));
        assert!(adapter.is_loading());
        assert!(!adapter.is_loaded());

        let set = adapter
            .analyze(&image(), &config, Instant::now() + Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(set.detections.len(), 1);
        assert_eq!(runtime.loads.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.peak.load(Ordering::SeqCst), 1);
        assert!(!adapter.is_loading());
        assert!(adapter.is_loaded());
    }

    #[tokio::test]
    async fn test_release_evicts_model() {
        let f = fixture(false, Duration::ZERO);
        f.adapter
            .analyze(&image(), &DetectionConfig::default(), deadline())
            .await
            .unwrap();
        assert!(f.adapter.is_loaded());

        f.adapter.release().await;
        assert!(!f.adapter.is_loaded());

        f.adapter
            .analyze(&image(), &DetectionConfig::default(), deadline())
            .await
            .unwrap();
        assert_eq!(f.runtime.loads.load(Ordering::SeqCst), 2);
    }
}
