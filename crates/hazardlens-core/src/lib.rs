//! HazardLens Core
//!
//! Core types, traits, and utilities shared across HazardLens components.
//!
//! This crate provides:
//! - The hazard/analysis data model handed to callers
//! - Backend identity and availability descriptors
//! - Error taxonomy (security, validation, backend, degraded)
//! - Captured image types and input sanitization bounds

pub mod error;
pub mod image;
pub mod types;

pub use error::{BackendError, Error, Result, SecurityError, ValidationError};
pub use image::{
    CaptureMetadata, CapturedImage, EncodedImage, GeoPoint, ImageFormat, InputLimits, RgbFrame,
    SanitizedImage,
};
pub use types::{
    AnalysisStrategy, AttemptOutcome, AttemptRecord, AvailabilityState, BackendDescriptor,
    BackendId, BackendKind, BoundingBox, Connectivity, DetectionConfig, Hazard, HazardCategory,
    HazardType, IntegrityStatus, RawDetection, RawDetectionSet, RegulationViolation, RiskLevel,
    SafetyAnalysis, Severity, WorkType,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{BackendError, Error, Result, SecurityError, ValidationError};
    pub use crate::image::{CapturedImage, SanitizedImage};
    pub use crate::types::{
        AnalysisStrategy, BackendId, BackendKind, BoundingBox, Hazard, HazardType, RawDetection,
        RawDetectionSet, RiskLevel, SafetyAnalysis, Severity, WorkType,
    };
}
