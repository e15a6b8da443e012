//! Core types for HazardLens

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::error::ValidationError;

/// Stable identifier of an analysis backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    /// Create a new backend identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Hardware affinity of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    OnDeviceCpu,
    OnDeviceGpu,
    OnDeviceNpu,
    Cloud,
}

impl BackendKind {
    /// Whether inference runs on the handset
    pub fn is_on_device(&self) -> bool {
        !matches!(self, Self::Cloud)
    }

    /// Short label used in logs and degraded reasons
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::OnDeviceCpu => "on-device cpu",
            Self::OnDeviceGpu => "on-device gpu",
            Self::OnDeviceNpu => "on-device npu",
            Self::Cloud => "cloud",
        }
    }

    /// Relative resource footprint, lowest first
    pub fn resource_rank(&self) -> u8 {
        match self {
            Self::OnDeviceCpu => 0,
            Self::OnDeviceGpu => 1,
            Self::OnDeviceNpu => 2,
            Self::Cloud => 3,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Circuit-breaker state of a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailabilityState {
    /// Eligible for selection
    Available,
    /// Excluded from primary selection until the cooldown elapses
    Cooldown { remaining_ms: u64 },
    /// Excluded for the rest of the session
    Disabled { reason: String },
}

impl AvailabilityState {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled { .. })
    }
}

/// Result of model supply-chain verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    /// Backend has no local artifact (cloud)
    NotApplicable,
    /// Artifact not yet loaded
    Unverified,
    Verified,
    Failed,
}

/// Point-in-time description of a backend handed to strategy selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub id: BackendId,
    pub kind: BackendKind,
    pub availability: AvailabilityState,
    pub integrity: IntegrityStatus,

    /// Minimum device memory required to run the backend's model
    pub min_memory_mb: u64,
}

/// Network quality reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Offline,
    Poor,
    Marginal,
    Good,
}

/// Kind of work being performed at the photographed site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkType {
    #[default]
    GeneralConstruction,
    HighRiseConstruction,
    Roadwork,
    Electrical,
    Excavation,
    Roofing,
    Demolition,
}

/// Strategy chosen by the orchestrator for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStrategy {
    OnDeviceOnly,
    CloudOnly,
    OnDevicePrimaryWithCloudFallback,
    HybridParallel,
}

impl fmt::Display for AnalysisStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OnDeviceOnly => "ON_DEVICE_ONLY",
            Self::CloudOnly => "CLOUD_ONLY",
            Self::OnDevicePrimaryWithCloudFallback => "ON_DEVICE_PRIMARY_WITH_CLOUD_FALLBACK",
            Self::HybridParallel => "HYBRID_PARALLEL",
        };
        f.write_str(name)
    }
}

/// Severity of an individual hazard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Next level up, saturating at `Critical`
    pub fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

/// Overall site risk on a fixed ordinal scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Moderate,
    High,
    Severe,
}

impl RiskLevel {
    /// Map the worst hazard severity onto the risk scale
    pub fn from_severity(severity: Option<Severity>) -> Self {
        match severity {
            None => Self::Minimal,
            Some(Severity::Low) => Self::Low,
            Some(Severity::Medium) => Self::Moderate,
            Some(Severity::High) => Self::High,
            Some(Severity::Critical) => Self::Severe,
        }
    }
}

/// Regulatory grouping of hazard types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardCategory {
    Ppe,
    Fall,
    Electrical,
    Equipment,
    Excavation,
    Fire,
    General,
}

/// Detected hazard type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardType {
    MissingHardHat,
    MissingSafetyVest,
    /// PPE problem reported without a specific item
    PpeViolation,
    FallHazard,
    ElectricalHazard,
    /// Worker exposure to operating machinery
    HeavyMachinery,
    StruckByVehicle,
    Excavation,
    FireHazard,
    Housekeeping,
}

impl HazardType {
    /// All hazard types, in declaration order
    pub const ALL: [HazardType; 10] = [
        Self::MissingHardHat,
        Self::MissingSafetyVest,
        Self::PpeViolation,
        Self::FallHazard,
        Self::ElectricalHazard,
        Self::HeavyMachinery,
        Self::StruckByVehicle,
        Self::Excavation,
        Self::FireHazard,
        Self::Housekeeping,
    ];

    /// Parse a model class label.
    ///
    /// Returns `None` for classes that are not hazards on their own
    /// (people, worn PPE, cones, barriers) and for unknown labels.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();

        match normalized.as_str() {
            "no_hard_hat" | "no_hardhat" | "missing_hard_hat" | "missing_hardhat" => {
                Some(Self::MissingHardHat)
            }
            "no_safety_vest" | "missing_safety_vest" | "no_vest" => Some(Self::MissingSafetyVest),
            "ppe_violation" | "missing_ppe" => Some(Self::PpeViolation),
            "fall_hazard" | "fall_protection" | "unprotected_edge" => Some(Self::FallHazard),
            "electrical_hazard" | "exposed_wiring" => Some(Self::ElectricalHazard),
            "machinery" | "heavy_machinery" | "excavator" | "crane" => Some(Self::HeavyMachinery),
            "truck" | "vehicle" | "struck_by" | "struck_by_vehicle" => Some(Self::StruckByVehicle),
            "excavation" | "trench" | "open_trench" => Some(Self::Excavation),
            "fire_hazard" | "fire" => Some(Self::FireHazard),
            "housekeeping" | "trip_hazard" | "debris" => Some(Self::Housekeeping),
            _ => None,
        }
    }

    /// Regulatory category this type belongs to
    pub fn category(&self) -> HazardCategory {
        match self {
            Self::MissingHardHat | Self::MissingSafetyVest | Self::PpeViolation => {
                HazardCategory::Ppe
            }
            Self::FallHazard => HazardCategory::Fall,
            Self::ElectricalHazard => HazardCategory::Electrical,
            Self::HeavyMachinery | Self::StruckByVehicle => HazardCategory::Equipment,
            Self::Excavation => HazardCategory::Excavation,
            Self::FireHazard => HazardCategory::Fire,
            Self::Housekeeping => HazardCategory::General,
        }
    }

    /// Category-wide type used when a backend cannot name the specific item
    pub fn is_generic(&self) -> bool {
        matches!(self, Self::PpeViolation | Self::HeavyMachinery)
    }

    /// Whether two detections of these types may describe the same hazard
    pub fn is_compatible_with(&self, other: &HazardType) -> bool {
        self == other
            || (self.category() == other.category() && (self.is_generic() || other.is_generic()))
    }
}

impl fmt::Display for HazardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MissingHardHat => "missing hard hat",
            Self::MissingSafetyVest => "missing safety vest",
            Self::PpeViolation => "PPE violation",
            Self::FallHazard => "fall hazard",
            Self::ElectricalHazard => "electrical hazard",
            Self::HeavyMachinery => "heavy machinery exposure",
            Self::StruckByVehicle => "struck-by vehicle",
            Self::Excavation => "excavation hazard",
            Self::FireHazard => "fire hazard",
            Self::Housekeeping => "housekeeping hazard",
        };
        f.write_str(name)
    }
}

/// Axis-aligned box in normalized image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    /// Create a box, rejecting coordinates outside `[0, 1]` or inverted edges
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Result<Self, ValidationError> {
        let coords = [x_min, y_min, x_max, y_max];
        if coords.iter().any(|c| !c.is_finite() || *c < 0.0 || *c > 1.0) {
            return Err(ValidationError::InvalidBoundingBox(format!(
                "coordinates {coords:?} must lie in [0, 1]"
            )));
        }
        if x_min > x_max || y_min > y_max {
            return Err(ValidationError::InvalidBoundingBox(format!(
                "edges {coords:?} are inverted"
            )));
        }
        Ok(Self {
            x_min,
            y_min,
            x_max,
            y_max,
        })
    }

    /// Build a box from possibly noisy decoder output, clamping into range
    pub fn clamped(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let clamp = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        let (x1, x2) = (clamp(x1), clamp(x2));
        let (y1, y2) = (clamp(y1), clamp(y2));
        Self {
            x_min: x1.min(x2),
            y_min: y1.min(y2),
            x_max: x1.max(x2),
            y_max: y1.max(y2),
        }
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection-over-Union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0);
        let iy = (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0);
        let intersection = ix * iy;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        (intersection / union).clamp(0.0, 1.0)
    }
}

/// Per-request knobs passed to every backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub work_type: WorkType,

    /// Minimum class score a backend should report
    pub confidence_threshold: f32,

    /// Upper bound on detections per backend
    pub max_detections: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            work_type: WorkType::default(),
            confidence_threshold: 0.25,
            max_detections: 50,
        }
    }
}

/// A single detection as reported by one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Class label as emitted by the backend
    pub label: String,
    pub hazard_type: HazardType,
    pub bounding_box: BoundingBox,

    /// Confidence score (0.0-1.0)
    pub confidence: f32,

    /// Severity if the backend grades it; otherwise assigned by regulation rules
    pub severity: Option<Severity>,
}

impl RawDetection {
    /// Create a detection, clamping confidence into `[0, 1]`
    pub fn new(
        label: impl Into<String>,
        hazard_type: HazardType,
        bounding_box: BoundingBox,
        confidence: f32,
    ) -> Self {
        Self {
            label: label.into(),
            hazard_type,
            bounding_box,
            confidence: clamp_confidence(confidence),
            severity: None,
        }
    }

    /// Attach a backend-provided severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Everything one backend returned for one image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetectionSet {
    pub backend: BackendId,
    pub kind: BackendKind,
    pub detections: Vec<RawDetection>,

    /// Backend-side latency in milliseconds
    pub latency_ms: u64,

    /// Model or service version that produced the detections
    pub model_version: Option<String>,
}

impl RawDetectionSet {
    /// Create an empty set for a backend
    pub fn new(backend: BackendId, kind: BackendKind) -> Self {
        Self {
            backend,
            kind,
            detections: Vec::new(),
            latency_ms: 0,
            model_version: None,
        }
    }

    /// Lowest detection confidence in the set, if any
    pub fn min_confidence(&self) -> Option<f32> {
        self.detections
            .iter()
            .map(|d| d.confidence)
            .min_by(|a, b| a.total_cmp(b))
    }
}

/// A canonical hazard after fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hazard {
    pub hazard_type: HazardType,
    pub bounding_box: BoundingBox,

    /// Confidence score (0.0-1.0)
    pub confidence: f32,
    pub severity: Severity,

    /// Backends that detected this hazard
    pub source_backends: BTreeSet<BackendId>,
}

impl Hazard {
    /// Whether more than one backend confirmed this hazard
    pub fn is_cross_validated(&self) -> bool {
        self.source_backends.len() > 1
    }
}

/// Regulatory citation derived from a hazard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulationViolation {
    pub code: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub fine_range: String,
    pub corrective_action: String,
    pub hazard_type: HazardType,
}

/// How a single backend attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded { detections: usize },
    Failed { reason: String },
    TimedOut,
    SecurityRejected { reason: String },
    Cancelled,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Audit record of one backend invocation within an analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub backend: BackendId,
    pub kind: BackendKind,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
}

/// Final, immutable result of analyzing one photo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyAnalysis {
    pub id: Uuid,
    pub photo_id: String,
    pub timestamp: DateTime<Utc>,
    pub work_type: WorkType,
    pub strategy: AnalysisStrategy,
    pub overall_risk_level: RiskLevel,

    /// Worst hazard severity, `None` when no hazards were found
    pub aggregate_severity: Option<Severity>,

    /// Mean confidence of reported hazards (0.0-1.0)
    pub ai_confidence: f32,
    pub processing_time_ms: u64,

    /// Sorted by severity, then confidence, both descending
    pub hazards: Vec<Hazard>,
    pub violations: Vec<RegulationViolation>,
    pub attempts: Vec<AttemptRecord>,
    pub is_degraded: bool,
    pub degraded_reason: Option<String>,
}

impl SafetyAnalysis {
    /// Distinct backends invoked for this analysis, in first-attempt order
    pub fn backends_attempted(&self) -> Vec<BackendId> {
        let mut seen = Vec::new();
        for attempt in &self.attempts {
            if !seen.contains(&attempt.backend) {
                seen.push(attempt.backend.clone());
            }
        }
        seen
    }

    /// Number of attempts that went over the network
    pub fn network_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.kind == BackendKind::Cloud)
            .count()
    }
}

/// Clamp a score into `[0, 1]`, mapping NaN to zero
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
