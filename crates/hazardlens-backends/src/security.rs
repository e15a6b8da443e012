//! Model supply-chain validation
//!
//! An on-device model may only be loaded after three checks pass:
//! 1. The artifact's SHA-256 matches the hash its manifest declares
//! 2. That hash is the one the trusted registry holds for the model id
//! 3. The manifest's HMAC-SHA256 signature over the digest verifies
//!
//! Every outcome is appended to the audit sink.

use bytes::Bytes;
use hazardlens_core::{CapturedImage, InputLimits, SanitizedImage, SecurityError, ValidationError};
use hazardlens_telemetry::{event_types, AuditEvent, AuditSeverity, AuditSink};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex HMAC-SHA256 signature over a hex digest, as found in model manifests
pub fn sign_digest(key: &[u8], digest_hex: &str) -> String {
    let digest = hex::decode(digest_hex).unwrap_or_else(|_| digest_hex.as_bytes().to_vec());
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(&digest);
    hex::encode(mac.finalize().into_bytes())
}

/// A model artifact that passed every check; only constructible by the validator
#[derive(Clone)]
pub struct ValidatedModel {
    model_id: String,
    sha256: String,
    bytes: Bytes,
}

impl ValidatedModel {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

impl fmt::Debug for ValidatedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedModel")
            .field("model_id", &self.model_id)
            .field("sha256", &self.sha256)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Gatekeeper for model artifacts and caller images
pub struct ModelSecurityValidator {
    trusted: HashMap<String, String>,
    signing_key: Vec<u8>,
    limits: InputLimits,
    audit: Arc<dyn AuditSink>,
}

impl ModelSecurityValidator {
    /// Create a validator with an empty trusted registry
    pub fn new(signing_key: impl Into<Vec<u8>>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            trusted: HashMap::new(),
            signing_key: signing_key.into(),
            limits: InputLimits::default(),
            audit,
        }
    }

    /// Register the trusted hash for a model id
    pub fn with_trusted_model(mut self, model_id: impl Into<String>, sha256: impl Into<String>) -> Self {
        self.trusted
            .insert(model_id.into(), sha256.into().to_ascii_lowercase());
        self
    }

    /// Override input bounds
    pub fn with_input_limits(mut self, limits: InputLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Audit sink shared with the rest of the backend layer
    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// Verify an artifact against its declared hash, the registry, and its signature
    pub fn validate_model(
        &self,
        model_id: &str,
        artifact: Bytes,
        expected_hash: &str,
        signature: &str,
    ) -> Result<ValidatedModel, SecurityError> {
        match self.check(model_id, &artifact, expected_hash, signature) {
            Ok(sha256) => {
                info!(model_id, sha256 = %sha256, "Model artifact validated");
                self.audit.append(
                    AuditEvent::new(event_types::MODEL_VALIDATED, format!("sha256 {sha256}"))
                        .with_subject(model_id),
                );
                Ok(ValidatedModel {
                    model_id: model_id.to_string(),
                    sha256,
                    bytes: artifact,
                })
            }
            Err(e) => {
                warn!(model_id, error = %e, "Model artifact rejected");
                self.audit.append(
                    AuditEvent::new(event_types::MODEL_REJECTED, e.to_string())
                        .with_subject(model_id)
                        .with_severity(AuditSeverity::High),
                );
                Err(e)
            }
        }
    }

    fn check(
        &self,
        model_id: &str,
        artifact: &[u8],
        expected_hash: &str,
        signature: &str,
    ) -> Result<String, SecurityError> {
        let actual = sha256_hex(artifact);
        let expected = expected_hash.trim().to_ascii_lowercase();

        if !bool::from(actual.as_bytes().ct_eq(expected.as_bytes())) {
            return Err(SecurityError::IntegrityMismatch {
                model_id: model_id.to_string(),
                expected,
                actual,
            });
        }

        let trusted = self
            .trusted
            .get(model_id)
            .is_some_and(|h| bool::from(h.as_bytes().ct_eq(actual.as_bytes())));
        if !trusted {
            return Err(SecurityError::UntrustedModel {
                model_id: model_id.to_string(),
                hash: actual,
            });
        }

        let signature = hex::decode(signature.trim()).map_err(|_| {
            SecurityError::MalformedSignature {
                model_id: model_id.to_string(),
            }
        })?;

        let digest = Sha256::digest(artifact);
        let mut mac = HmacSha256::new_from_slice(&self.signing_key).map_err(|_| {
            SecurityError::SignatureInvalid {
                model_id: model_id.to_string(),
            }
        })?;
        mac.update(&digest);
        mac.verify_slice(&signature)
            .map_err(|_| SecurityError::SignatureInvalid {
                model_id: model_id.to_string(),
            })?;

        Ok(actual)
    }

    /// Enforce size and format bounds on a caller image
    pub fn sanitize_input(&self, image: CapturedImage) -> Result<SanitizedImage, ValidationError> {
        let photo_id = image.metadata.photo_id.clone();
        self.limits.sanitize(image).map_err(|e| {
            warn!(photo_id = %photo_id, error = %e, "Input image rejected");
            self.audit.append(
                AuditEvent::new(event_types::INPUT_REJECTED, e.to_string())
                    .with_subject(photo_id)
                    .with_severity(AuditSeverity::Warning),
            );
            e
        })
    }
}

impl fmt::Debug for ModelSecurityValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSecurityValidator")
            .field("trusted_models", &self.trusted.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
