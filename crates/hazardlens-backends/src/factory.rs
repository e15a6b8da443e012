//! Adapter construction keyed on backend kind

use crate::adapter::BackendAdapter;
use crate::cloud::CloudVisionAdapter;
use crate::config::{BackendSpec, BackendsConfig};
use crate::endpoint::EndpointPolicy;
use crate::on_device::OnDeviceAdapter;
use crate::runtime::DetectionRuntime;
use crate::security::ModelSecurityValidator;
use hazardlens_core::{BackendKind, Error, Result};
use hazardlens_telemetry::{event_types, AuditEvent, AuditSeverity, AuditSink};
use std::sync::Arc;
use tracing::{info, warn};

/// Builds adapters from configuration
pub struct BackendFactory {
    validator: Arc<ModelSecurityValidator>,
    runtime: Arc<dyn DetectionRuntime>,
    endpoint_policy: EndpointPolicy,
}

impl BackendFactory {
    pub fn new(validator: Arc<ModelSecurityValidator>, runtime: Arc<dyn DetectionRuntime>) -> Self {
        Self {
            validator,
            runtime,
            endpoint_policy: EndpointPolicy::default(),
        }
    }

    pub fn with_endpoint_policy(mut self, policy: EndpointPolicy) -> Self {
        self.endpoint_policy = policy;
        self
    }

    /// Validator and factory wired from a backends config
    pub fn from_config(
        config: &BackendsConfig,
        runtime: Arc<dyn DetectionRuntime>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let mut validator = ModelSecurityValidator::new(config.signing_key_bytes()?, audit)
            .with_input_limits(config.input_limits.clone());
        for (model_id, sha256) in &config.trusted_models {
            validator = validator.with_trusted_model(model_id.clone(), sha256.clone());
        }

        Ok(Self::new(Arc::new(validator), runtime)
            .with_endpoint_policy(config.endpoint_policy.clone()))
    }

    pub fn validator(&self) -> &Arc<ModelSecurityValidator> {
        &self.validator
    }

    /// Build one adapter
    pub fn build(&self, spec: &BackendSpec) -> Result<Arc<dyn BackendAdapter>> {
        match spec.kind {
            BackendKind::OnDeviceCpu | BackendKind::OnDeviceGpu | BackendKind::OnDeviceNpu => {
                let model = spec.model.clone().ok_or_else(|| {
                    Error::config(format!("backend '{}' has no model section", spec.id))
                })?;
                Ok(Arc::new(OnDeviceAdapter::new(
                    spec.id.clone(),
                    spec.kind,
                    model,
                    self.validator.clone(),
                    self.runtime.clone(),
                )))
            }
            BackendKind::Cloud => {
                let cloud = spec.cloud.as_ref().ok_or_else(|| {
                    Error::config(format!("backend '{}' has no cloud section", spec.id))
                })?;
                let api_key = cloud
                    .api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok());

                let adapter = CloudVisionAdapter::new(
                    spec.id.clone(),
                    cloud,
                    api_key,
                    &self.endpoint_policy,
                )
                .map_err(|e| {
                    warn!(backend = %spec.id, error = %e, "Cloud endpoint rejected");
                    self.validator.audit().append(
                        AuditEvent::new(event_types::ENDPOINT_REJECTED, e.to_string())
                            .with_subject(spec.id.as_str())
                            .with_severity(AuditSeverity::High),
                    );
                    Error::config(format!("backend '{}': {e}", spec.id))
                })?;
                Ok(Arc::new(adapter))
            }
        }
    }

    /// Build every configured adapter
    pub fn build_all(&self, config: &BackendsConfig) -> Result<Vec<Arc<dyn BackendAdapter>>> {
        let adapters = config
            .backends
            .iter()
            .map(|spec| self.build(spec))
            .collect::<Result<Vec<_>>>()?;
        info!("Built {} backends", adapters.len());
        Ok(adapters)
    }
}
