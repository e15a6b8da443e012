//! HazardLens Backends
//!
//! Analysis backends behind a uniform [`BackendAdapter`] contract.
//!
//! Backends are organized by hardware affinity:
//! - On-device CPU/GPU/NPU: candle inference over a validated model artifact
//! - Cloud: a remote vision service reached over HTTPS
//!
//! Every on-device artifact passes through [`ModelSecurityValidator`]
//! before it can be loaded, and loading is guarded so at most one load is
//! in flight per backend.

pub mod adapter;
pub mod cloud;
pub mod config;
pub mod endpoint;
pub mod factory;
pub mod model_loader;
pub mod on_device;
pub mod runtime;
pub mod security;

pub use adapter::{AdapterError, BackendAdapter};
pub use cloud::CloudVisionAdapter;
pub use config::{BackendSpec, BackendsConfig, CloudSpec, ModelSpec, ModelVariant};
pub use endpoint::{validate_endpoint, EndpointError, EndpointPolicy};
pub use factory::BackendFactory;
pub use model_loader::{ModelSlot, ModelSource};
pub use on_device::OnDeviceAdapter;
pub use runtime::{
    conv_head_network, decode_yolo_output, non_max_suppression, CandleRuntime, DetectionRuntime,
    DetectionSession, NetworkBuilder,
};
pub use security::{sha256_hex, sign_digest, ModelSecurityValidator, ValidatedModel};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::adapter::{AdapterError, BackendAdapter};
    pub use crate::config::{BackendsConfig, ModelSpec};
    pub use crate::factory::BackendFactory;
    pub use crate::runtime::{CandleRuntime, DetectionRuntime};
    pub use crate::security::ModelSecurityValidator;
}
