//! Error types for HazardLens

use crate::image::ImageFormat;
use crate::types::{BackendId, BackendKind};

/// Result type alias using HazardLens's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for HazardLens operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Model supply-chain failures (fatal for the affected backend)
    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    /// Malformed caller input, never retried
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Transient backend failures
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// No backend could be selected for the request
    #[error("no eligible backend: {0}")]
    NoEligibleBackend(String),

    /// The caller cancelled the analysis
    #[error("analysis cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Integrity or provenance failure of an on-device model artifact.
///
/// A backend that produces one of these is disabled for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityError {
    #[error("model '{model_id}' hash mismatch: expected {expected}, computed {actual}")]
    IntegrityMismatch {
        model_id: String,
        expected: String,
        actual: String,
    },

    #[error("model '{model_id}' signature is invalid")]
    SignatureInvalid { model_id: String },

    #[error("model '{model_id}' hash {hash} is not in the trusted registry")]
    UntrustedModel { model_id: String, hash: String },

    #[error("model '{model_id}' signature is not valid hex")]
    MalformedSignature { model_id: String },
}

impl SecurityError {
    /// Identifier of the model that failed verification
    pub fn model_id(&self) -> &str {
        match self {
            Self::IntegrityMismatch { model_id, .. }
            | Self::SignatureInvalid { model_id }
            | Self::UntrustedModel { model_id, .. }
            | Self::MalformedSignature { model_id } => model_id,
        }
    }
}

/// Rejected input payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("image payload is empty")]
    EmptyPayload,

    #[error("image dimensions {width}x{height} are outside the accepted range")]
    DimensionsOutOfBounds { width: u32, height: u32 },

    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    PixelBufferMismatch { expected: usize, actual: usize },

    #[error("encoded payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("payload is not a well-formed {0} image")]
    MalformedEncoding(ImageFormat),

    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),
}

/// Transient failure of a single backend attempt.
///
/// All variants trigger the fallback chain; none is surfaced to the caller
/// except as the reason of a degraded result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("model load failed: {0}")]
    ModelLoadFailure(String),

    #[error("backend '{backend}' exceeded its {timeout_ms}ms deadline")]
    InferenceTimeout { backend: BackendId, timeout_ms: u64 },

    #[error("out of memory")]
    OutOfMemory,

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("attempt cancelled")]
    Cancelled,
}

impl BackendError {
    /// Whether the orchestrator may move on to the next backend
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Short human-readable reason used for degraded results
    pub fn degraded_reason(&self, kind: BackendKind) -> String {
        let who = kind.short_name();
        match self {
            Self::InferenceTimeout { .. } => format!("{who} timeout"),
            Self::ModelLoadFailure(msg) => format!("{who} model load failure: {msg}"),
            Self::OutOfMemory => format!("{who} out of memory"),
            Self::NetworkUnavailable(_) => format!("{who} network unavailable"),
            Self::RateLimited { .. } => format!("{who} rate limited"),
            Self::Inference(msg) => format!("{who} inference failure: {msg}"),
            Self::Cancelled => format!("{who} cancelled"),
        }
    }
}
