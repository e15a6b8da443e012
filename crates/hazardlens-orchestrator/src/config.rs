//! Orchestrator configuration and per-call context

use hazardlens_core::{BackendKind, Connectivity, DetectionConfig, Error, Result, WorkType};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for orchestration; every field has a usable default
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Deadline for a single backend attempt
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Deadline for the whole analysis, across all attempts
    #[serde(default = "default_overall_timeout_ms")]
    pub overall_timeout_ms: u64,

    /// Backend invocations allowed per analysis
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// On-device detections below this confidence also consult the cloud
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: f32,

    #[serde(default)]
    pub fusion: FusionConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub profiler: ProfilerConfig,

    #[serde(default)]
    pub live_preview: LivePreviewConfig,
}

fn default_attempt_timeout_ms() -> u64 {
    5_000
}

fn default_overall_timeout_ms() -> u64 {
    8_000
}

fn default_max_attempts() -> usize {
    3
}

fn default_escalation_threshold() -> f32 {
    0.4
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: default_attempt_timeout_ms(),
            overall_timeout_ms: default_overall_timeout_ms(),
            max_attempts: default_max_attempts(),
            escalation_threshold: default_escalation_threshold(),
            fusion: FusionConfig::default(),
            monitor: MonitorConfig::default(),
            profiler: ProfilerConfig::default(),
            live_preview: LivePreviewConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from an optional YAML file layered with `HAZARDLENS__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("HAZARDLENS")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::config(format!("failed to load orchestrator config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    /// Reject settings that would break the analysis guarantees
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }
        if self.overall_timeout_ms == 0 || self.attempt_timeout_ms == 0 {
            return Err(Error::config("timeouts must be positive"));
        }
        if !(self.fusion.iou_threshold > 0.0 && self.fusion.iou_threshold <= 1.0) {
            return Err(Error::config("fusion.iou_threshold must lie in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.fusion.cross_validation_bonus) {
            return Err(Error::config("fusion.cross_validation_bonus must lie in [0, 1]"));
        }
        let weights = &self.fusion.weights;
        for (name, weight) in [
            ("on_device_cpu", weights.on_device_cpu),
            ("on_device_gpu", weights.on_device_gpu),
            ("on_device_npu", weights.on_device_npu),
            ("cloud", weights.cloud),
        ] {
            if !(weight.is_finite() && weight > 0.0) {
                return Err(Error::config(format!("fusion.weights.{name} must be positive")));
            }
        }
        if !(0.0..=1.0).contains(&self.escalation_threshold) {
            return Err(Error::config("escalation_threshold must lie in [0, 1]"));
        }
        if self.live_preview.rate_per_sec <= 0.0 {
            return Err(Error::config("live_preview.rate_per_sec must be positive"));
        }
        Ok(())
    }
}

/// Cross-validation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Minimum IoU for two detections to be the same hazard
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Added to a hazard confirmed by more than one backend
    #[serde(default = "default_cross_validation_bonus")]
    pub cross_validation_bonus: f32,

    #[serde(default)]
    pub weights: BackendWeights,
}

fn default_iou_threshold() -> f32 {
    0.5
}

fn default_cross_validation_bonus() -> f32 {
    0.15
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            iou_threshold: default_iou_threshold(),
            cross_validation_bonus: default_cross_validation_bonus(),
            weights: BackendWeights::default(),
        }
    }
}

/// Relative trust in each backend kind during fusion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendWeights {
    pub on_device_cpu: f32,
    pub on_device_gpu: f32,
    pub on_device_npu: f32,
    pub cloud: f32,
}

impl Default for BackendWeights {
    fn default() -> Self {
        Self {
            on_device_cpu: 0.8,
            on_device_gpu: 0.9,
            on_device_npu: 1.0,
            cloud: 1.2,
        }
    }
}

impl BackendWeights {
    pub fn for_kind(&self, kind: BackendKind) -> f32 {
        let weight = match kind {
            BackendKind::OnDeviceCpu => self.on_device_cpu,
            BackendKind::OnDeviceGpu => self.on_device_gpu,
            BackendKind::OnDeviceNpu => self.on_device_npu,
            BackendKind::Cloud => self.cloud,
        };
        if weight.is_finite() && weight > 0.0 {
            weight
        } else {
            1.0
        }
    }
}

/// Rolling-window health thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Samples required before a backend can be sent to cooldown
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    #[serde(default = "default_poor_success_rate")]
    pub poor_success_rate: f64,

    #[serde(default = "default_poor_latency_ms")]
    pub poor_latency_ms: u64,

    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_window_size() -> usize {
    20
}

fn default_min_samples() -> usize {
    5
}

fn default_poor_success_rate() -> f64 {
    0.5
}

fn default_poor_latency_ms() -> u64 {
    4_000
}

fn default_cooldown_ms() -> u64 {
    60_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            min_samples: default_min_samples(),
            poor_success_rate: default_poor_success_rate(),
            poor_latency_ms: default_poor_latency_ms(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

/// Device tier thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilerConfig {
    #[serde(default = "default_high_end_memory_mb")]
    pub high_end_memory_mb: u64,

    #[serde(default = "default_mid_range_memory_mb")]
    pub mid_range_memory_mb: u64,

    /// Below this charge (and not charging) the tier is capped at mid-range
    #[serde(default = "default_low_battery_percent")]
    pub low_battery_percent: u8,
}

fn default_high_end_memory_mb() -> u64 {
    6_144
}

fn default_mid_range_memory_mb() -> u64 {
    3_072
}

fn default_low_battery_percent() -> u8 {
    15
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            high_end_memory_mb: default_high_end_memory_mb(),
            mid_range_memory_mb: default_mid_range_memory_mb(),
            low_battery_percent: default_low_battery_percent(),
        }
    }
}

/// Live-preview throttle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivePreviewConfig {
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: f64,

    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_rate_per_sec() -> f64 {
    2.0
}

fn default_burst() -> u32 {
    1
}

impl Default for LivePreviewConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: default_rate_per_sec(),
            burst: default_burst(),
        }
    }
}

/// Feature flags snapshot, read-only for the duration of one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Route every analysis to the cloud when it is reachable
    #[serde(default)]
    pub force_cloud: bool,

    #[serde(default = "default_true")]
    pub cloud_enabled: bool,

    #[serde(default = "default_true")]
    pub hybrid_enabled: bool,

    /// Share of photos (by id bucket) eligible for hybrid analysis
    #[serde(default = "default_rollout")]
    pub hybrid_rollout_percent: u8,

    /// Whether on-device backends may back up a cloud-first plan
    #[serde(default = "default_true")]
    pub on_device_fallback_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_rollout() -> u8 {
    100
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            force_cloud: false,
            cloud_enabled: true,
            hybrid_enabled: true,
            hybrid_rollout_percent: default_rollout(),
            on_device_fallback_enabled: true,
        }
    }
}

/// Everything the caller supplies alongside an image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub connectivity: Connectivity,

    #[serde(default)]
    pub flags: FeatureFlags,

    #[serde(default)]
    pub detection: DetectionConfig,
}

impl AnalysisContext {
    pub fn new(connectivity: Connectivity) -> Self {
        Self {
            connectivity,
            flags: FeatureFlags::default(),
            detection: DetectionConfig::default(),
        }
    }

    pub fn with_work_type(mut self, work_type: WorkType) -> Self {
        self.detection.work_type = work_type;
        self
    }

    pub fn with_flags(mut self, flags: FeatureFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn work_type(&self) -> WorkType {
        self.detection.work_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.attempt_timeout(), Duration::from_secs(5));
        assert_eq!(config.overall_timeout(), Duration::from_secs(8));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.fusion.iou_threshold, 0.5);
        assert_eq!(config.fusion.cross_validation_bonus, 0.15);
        assert_eq!(config.live_preview.rate_per_sec, 2.0);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "attempt_timeout_ms: 3000\nfusion:\n  iou_threshold: 0.6\nmonitor:\n  cooldown_ms: 1000"
        )
        .unwrap();

        let config = OrchestratorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.attempt_timeout_ms, 3000);
        assert_eq!(config.overall_timeout_ms, 8000);
        assert_eq!(config.fusion.iou_threshold, 0.6);
        assert_eq!(config.fusion.cross_validation_bonus, 0.15);
        assert_eq!(config.monitor.cooldown_ms, 1000);
        assert_eq!(config.monitor.window_size, 20);
    }

    #[test]
    fn test_fusion_parameters_validated() {
        assert!(OrchestratorConfig::default().validate().is_ok());

        let mut config = OrchestratorConfig::default();
        config.fusion.cross_validation_bonus = -0.2;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = OrchestratorConfig::default();
        config.fusion.cross_validation_bonus = 1.5;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.fusion.iou_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.fusion.weights.cloud = 0.0;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.fusion.weights.on_device_gpu = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.escalation_threshold = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_bonus_in_file_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "fusion:\n  cross_validation_bonus: -0.5").unwrap();
        assert!(OrchestratorConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "max_attempts: 0").unwrap();
        assert!(OrchestratorConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_weights_fall_back_for_nonsense() {
        let weights = BackendWeights {
            on_device_cpu: -1.0,
            ..Default::default()
        };
        assert_eq!(weights.for_kind(BackendKind::OnDeviceCpu), 1.0);
        assert_eq!(weights.for_kind(BackendKind::Cloud), 1.2);
    }

    #[test]
    fn test_context_builder() {
        let ctx = AnalysisContext::new(Connectivity::Good).with_work_type(WorkType::Roadwork);
        assert_eq!(ctx.work_type(), WorkType::Roadwork);
        assert!(ctx.flags.cloud_enabled);
    }
}
