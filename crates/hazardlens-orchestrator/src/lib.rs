//! HazardLens Orchestrator
//!
//! Decides which analysis backends run for a photo and turns their output
//! into one hazard list.
//!
//! Provides:
//! - Device tiering from platform signals ([`DeviceCapabilityProfiler`])
//! - Rolling backend health with cooldown ([`PerformanceMonitor`])
//! - Strategy selection and fallback ordering ([`select_plan`])
//! - Cross-validating fusion ([`ResultFusionEngine`])
//! - The orchestration state machine with deadlines and cancellation ([`HazardOrchestrator`])

pub mod config;
pub mod device;
pub mod fusion;
pub mod orchestrator;
pub mod performance;
pub mod rate_limit;
pub mod strategy;

pub use config::{
    AnalysisContext, BackendWeights, FeatureFlags, FusionConfig, LivePreviewConfig, MonitorConfig,
    OrchestratorConfig, ProfilerConfig,
};
pub use device::{
    Acceleration, DeviceCapabilityProfiler, DeviceProfile, DeviceTier, PlatformSignals,
    PlatformSnapshot, StaticSignals, ThermalState,
};
pub use fusion::{hazard_order, ResultFusionEngine};
pub use orchestrator::{
    AnalysisHandle, HazardOrchestrator, OrchestrationState, VerificationOutcome,
    VerificationReport,
};
pub use performance::{BackendHealth, HealthGrade, PerformanceMonitor, PerformanceRecord};
pub use rate_limit::RateLimiter;
pub use strategy::{rollout_bucket, select_plan, BackendCandidate, ExecutionPlan};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{AnalysisContext, FeatureFlags, OrchestratorConfig};
    pub use crate::device::{DeviceCapabilityProfiler, PlatformSnapshot, StaticSignals};
    pub use crate::orchestrator::{AnalysisHandle, HazardOrchestrator};
}
