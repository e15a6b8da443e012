//! Backend adapter trait and common types

use async_trait::async_trait;
use hazardlens_core::{
    AvailabilityState, BackendDescriptor, BackendError, BackendId, BackendKind, DetectionConfig,
    IntegrityStatus, RawDetectionSet, SanitizedImage, SecurityError,
};
use tokio::time::Instant;

/// Failure of a single adapter call.
///
/// Security failures are kept apart from transient backend failures so the
/// orchestrator can disable the backend instead of retrying it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Security(#[from] SecurityError),
}

/// Trait for all analysis backends
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Stable backend identifier
    fn id(&self) -> &BackendId;

    /// Hardware affinity
    fn kind(&self) -> BackendKind;

    /// Minimum device memory needed to run this backend
    fn min_memory_mb(&self) -> u64 {
        0
    }

    /// Current supply-chain status of the backend's model
    fn integrity(&self) -> IntegrityStatus;

    /// Whether a model load is currently in flight
    fn is_loading(&self) -> bool {
        false
    }

    /// Analyze one image, giving up at `deadline`
    async fn analyze(
        &self,
        image: &SanitizedImage,
        config: &DetectionConfig,
        deadline: Instant,
    ) -> Result<RawDetectionSet, AdapterError>;

    /// Verify the backend's model artifact without loading it
    async fn verify(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Release cached runtime resources (loaded model or network session)
    async fn release(&self);

    /// Snapshot descriptor with the given availability
    fn descriptor(&self, availability: AvailabilityState) -> BackendDescriptor {
        BackendDescriptor {
            id: self.id().clone(),
            kind: self.kind(),
            availability,
            integrity: self.integrity(),
            min_memory_mb: self.min_memory_mb(),
        }
    }
}
