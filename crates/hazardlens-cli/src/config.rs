//! CLI configuration and runtime assembly

use anyhow::{Context, Result};
use hazardlens_backends::{conv_head_network, BackendFactory, BackendsConfig, CandleRuntime};
use hazardlens_orchestrator::{
    DeviceCapabilityProfiler, HazardOrchestrator, OrchestratorConfig, PlatformSnapshot,
    StaticSignals,
};
use hazardlens_telemetry::TracingAuditSink;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

/// Everything the binary reads from disk
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub orchestrator: OrchestratorConfig,
    pub backends: BackendsConfig,
}

impl AppConfig {
    /// Load the orchestrator config (optional, env-overridable) and the backends file
    pub fn load(config_path: Option<&Path>, backends_path: &Path) -> Result<Self> {
        let orchestrator = OrchestratorConfig::load(config_path)?;

        let backends = if backends_path.exists() {
            BackendsConfig::from_file(backends_path)
                .with_context(|| format!("loading {}", backends_path.display()))?
        } else {
            tracing::warn!(path = %backends_path.display(), "Backends file not found, no backends configured");
            BackendsConfig::default()
        };

        Ok(Self {
            orchestrator,
            backends,
        })
    }

    /// Wire validator, adapters, profiler and orchestrator for one process
    pub fn build_orchestrator(&self, snapshot: PlatformSnapshot) -> Result<Arc<HazardOrchestrator>> {
        let runtime = Arc::new(CandleRuntime::new(conv_head_network()));
        let factory = BackendFactory::from_config(&self.backends, runtime, Arc::new(TracingAuditSink))?;
        let adapters = factory.build_all(&self.backends)?;

        let profiler = Arc::new(DeviceCapabilityProfiler::new(
            Arc::new(StaticSignals::new(snapshot)),
            self.orchestrator.profiler.clone(),
        ));

        let orchestrator = HazardOrchestrator::new(
            self.orchestrator.clone(),
            factory.validator().clone(),
            profiler,
            adapters,
        )?;
        Ok(Arc::new(orchestrator))
    }
}

/// Parse a CLI value through the type's snake_case serde names
pub fn parse_snake_case<T: DeserializeOwned>(value: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.replace('-', "_")))
        .map_err(|_| format!("unrecognized value '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazardlens_core::{Connectivity, WorkType};
    use hazardlens_orchestrator::ThermalState;

    #[test]
    fn test_parse_snake_case_values() {
        assert_eq!(parse_snake_case::<Connectivity>("marginal"), Ok(Connectivity::Marginal));
        assert_eq!(
            parse_snake_case::<WorkType>("high-rise-construction"),
            Ok(WorkType::HighRiseConstruction)
        );
        assert_eq!(parse_snake_case::<ThermalState>("serious"), Ok(ThermalState::Serious));
        assert!(parse_snake_case::<Connectivity>("excellent").is_err());
    }

    #[test]
    fn test_missing_backends_file_yields_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppConfig::load(None, &dir.path().join("absent.yaml")).unwrap();
        assert!(app.backends.backends.is_empty());
        assert_eq!(app.orchestrator.max_attempts, 3);
    }
}
