//! Backend configuration (YAML)

use crate::endpoint::EndpointPolicy;
use crate::model_loader::ModelSource;
use hazardlens_core::{BackendId, BackendKind, Error, InputLimits, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Class list emitted by the construction-safety detectors, in output order
pub const DEFAULT_CLASSES: [&str; 13] = [
    "person",
    "hard_hat",
    "safety_vest",
    "no_hard_hat",
    "no_safety_vest",
    "machinery",
    "excavator",
    "crane",
    "truck",
    "fall_hazard",
    "electrical_hazard",
    "safety_cone",
    "barrier",
];

/// Shipped detector variants, one per hardware class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// `construction_safety_lite`: CPU, 320 px
    Lite,
    /// `construction_safety_gpu`: GPU, 480 px
    Gpu,
    /// `construction_safety_full`: NPU, 640 px
    Full,
}

impl ModelVariant {
    /// Variant shipped for a backend kind
    pub fn for_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::OnDeviceGpu => Self::Gpu,
            BackendKind::OnDeviceNpu => Self::Full,
            BackendKind::OnDeviceCpu | BackendKind::Cloud => Self::Lite,
        }
    }

    pub fn model_id(&self) -> &'static str {
        match self {
            Self::Lite => "construction_safety_lite",
            Self::Gpu => "construction_safety_gpu",
            Self::Full => "construction_safety_full",
        }
    }

    /// Square input resolution in pixels
    pub fn input_size(&self) -> u32 {
        match self {
            Self::Lite => 320,
            Self::Gpu => 480,
            Self::Full => 640,
        }
    }

    pub fn min_memory_mb(&self) -> u64 {
        match self {
            Self::Lite => 2048,
            Self::Gpu => 3072,
            Self::Full => 4096,
        }
    }
}

/// On-device model artifact and its manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model_id: String,

    #[serde(flatten)]
    pub source: ModelSource,

    /// Declared SHA-256 of the artifact (hex)
    pub sha256: String,

    /// HMAC-SHA256 signature of the digest (hex)
    pub signature: String,

    /// Input resolution; defaults to the variant's
    #[serde(default)]
    pub input_size: Option<u32>,

    /// Memory floor; defaults to the variant's
    #[serde(default)]
    pub min_memory_mb: Option<u64>,

    #[serde(default = "default_classes")]
    pub classes: Vec<String>,

    #[serde(default)]
    pub version: Option<String>,
}

fn default_classes() -> Vec<String> {
    DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect()
}

impl ModelSpec {
    pub fn input_size(&self, kind: BackendKind) -> u32 {
        self.input_size
            .unwrap_or_else(|| ModelVariant::for_kind(kind).input_size())
    }

    pub fn min_memory_mb(&self, kind: BackendKind) -> u64 {
        self.min_memory_mb
            .unwrap_or_else(|| ModelVariant::for_kind(kind).min_memory_mb())
    }
}

/// Remote vision service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSpec {
    pub endpoint: String,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Model name forwarded to the service
    #[serde(default)]
    pub model: Option<String>,
}

/// One configured backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSpec {
    pub id: BackendId,
    pub kind: BackendKind,

    #[serde(default)]
    pub model: Option<ModelSpec>,

    #[serde(default)]
    pub cloud: Option<CloudSpec>,
}

/// Configuration for all backends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Hex-encoded key used to verify model signatures
    #[serde(default)]
    pub signing_key: String,

    /// Trusted registry: model id to SHA-256
    #[serde(default)]
    pub trusted_models: BTreeMap<String, String>,

    #[serde(default)]
    pub backends: Vec<BackendSpec>,

    #[serde(default)]
    pub input_limits: InputLimits,

    #[serde(default)]
    pub endpoint_policy: EndpointPolicy,
}

impl BackendsConfig {
    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid backends config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Decoded signing key
    pub fn signing_key_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(self.signing_key.trim())
            .map_err(|e| Error::config(format!("signing_key is not valid hex: {e}")))
    }

    fn validate(&self) -> Result<()> {
        let mut seen = Vec::new();
        for backend in &self.backends {
            if seen.contains(&&backend.id) {
                return Err(Error::config(format!("duplicate backend id '{}'", backend.id)));
            }
            seen.push(&backend.id);

            match (backend.kind.is_on_device(), &backend.model, &backend.cloud) {
                (true, Some(_), None) | (false, None, Some(_)) => {}
                (true, _, _) => {
                    return Err(Error::config(format!(
                        "on-device backend '{}' needs a model section and no cloud section",
                        backend.id
                    )))
                }
                (false, _, _) => {
                    return Err(Error::config(format!(
                        "cloud backend '{}' needs a cloud section and no model section",
                        backend.id
                    )))
                }
            }
        }
        Ok(())
    }
}
