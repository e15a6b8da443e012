//! Hazard analysis orchestration
//!
//! One call to [`HazardOrchestrator::analyze`] walks the state machine
//! `Idle → Selecting → Executing → (Fallback ↻) → Fusing → Done`, or ends in
//! `Failed` with a degraded result once the attempt budget or the overall
//! deadline runs out. Backend failures never escape as errors; security and
//! validation failures, cancellation and an empty backend set do.

use crate::config::{AnalysisContext, OrchestratorConfig};
use crate::device::DeviceCapabilityProfiler;
use crate::fusion::ResultFusionEngine;
use crate::performance::PerformanceMonitor;
use crate::rate_limit::RateLimiter;
use crate::strategy::{select_plan, BackendCandidate, ExecutionPlan};
use chrono::Utc;
use futures::future::join_all;
use hazardlens_backends::{AdapterError, BackendAdapter, ModelSecurityValidator};
use hazardlens_core::{
    AnalysisStrategy, AttemptOutcome, AttemptRecord, BackendDescriptor, BackendError, BackendId,
    BackendKind, CapturedImage, DetectionConfig, Error, RawDetectionSet, Result, SafetyAnalysis,
    SanitizedImage, SecurityError,
};
use hazardlens_regulations::HazardRegulationMapper;
use hazardlens_telemetry::{event_types, AuditEvent, AuditSeverity, MetricsCollector};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Orchestration state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationState {
    Idle,
    Selecting,
    Executing,
    Fallback,
    Fusing,
    Done,
    Failed,
}

impl fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Selecting => "SELECTING",
            Self::Executing => "EXECUTING",
            Self::Fallback => "FALLBACK",
            Self::Fusing => "FUSING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

struct StateMachine<'a> {
    photo_id: &'a str,
    state: OrchestrationState,
}

impl<'a> StateMachine<'a> {
    fn new(photo_id: &'a str) -> Self {
        Self {
            photo_id,
            state: OrchestrationState::Idle,
        }
    }

    fn to(&mut self, next: OrchestrationState) {
        debug!(photo_id = self.photo_id, from = %self.state, to = %next, "State transition");
        self.state = next;
    }
}

/// Result of verifying one on-device model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    /// Failed supply-chain checks; the backend is now disabled
    Rejected { reason: String },
    /// The artifact could not be read
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub backend: BackendId,
    pub kind: BackendKind,
    #[serde(flatten)]
    pub outcome: VerificationOutcome,
}

struct AttemptResult {
    backend: BackendId,
    kind: BackendKind,
    result: std::result::Result<RawDetectionSet, AdapterError>,
    latency_ms: u64,
}

struct LiveSlot {
    generation: u64,
    token: CancellationToken,
}

/// Coordinates backends for hazard analysis
pub struct HazardOrchestrator {
    config: OrchestratorConfig,
    adapters: Vec<Arc<dyn BackendAdapter>>,
    by_id: HashMap<BackendId, Arc<dyn BackendAdapter>>,
    validator: Arc<ModelSecurityValidator>,
    profiler: Arc<DeviceCapabilityProfiler>,
    monitor: PerformanceMonitor,
    fusion: ResultFusionEngine,
    mapper: HazardRegulationMapper,
    metrics: MetricsCollector,
    preview_limiter: RateLimiter,
    live: Mutex<Option<LiveSlot>>,
    live_generation: Mutex<u64>,
}

impl HazardOrchestrator {
    /// Create an orchestrator over a fixed backend set
    pub fn new(
        config: OrchestratorConfig,
        validator: Arc<ModelSecurityValidator>,
        profiler: Arc<DeviceCapabilityProfiler>,
        adapters: Vec<Arc<dyn BackendAdapter>>,
    ) -> Result<Self> {
        config.validate()?;

        let mut by_id = HashMap::new();
        for adapter in &adapters {
            if by_id.insert(adapter.id().clone(), adapter.clone()).is_some() {
                return Err(Error::config(format!("duplicate backend id '{}'", adapter.id())));
            }
        }

        info!(
            backends = adapters.len(),
            attempt_timeout_ms = config.attempt_timeout_ms,
            overall_timeout_ms = config.overall_timeout_ms,
            "Orchestrator ready"
        );

        Ok(Self {
            monitor: PerformanceMonitor::new(config.monitor.clone()),
            fusion: ResultFusionEngine::new(config.fusion.clone()),
            mapper: HazardRegulationMapper::new(),
            metrics: MetricsCollector::new(),
            preview_limiter: RateLimiter::from_config(&config.live_preview),
            live: Mutex::new(None),
            live_generation: Mutex::new(0),
            config,
            adapters,
            by_id,
            validator,
            profiler,
        })
    }

    pub fn with_mapper(mut self, mapper: HazardRegulationMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn profiler(&self) -> &DeviceCapabilityProfiler {
        &self.profiler
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Descriptor snapshot of every backend
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.adapters
            .iter()
            .map(|a| a.descriptor(self.monitor.availability(a.id())))
            .collect()
    }

    fn candidates(&self) -> Vec<BackendCandidate> {
        self.adapters
            .iter()
            .map(|a| {
                BackendCandidate::new(
                    a.descriptor(self.monitor.availability(a.id())),
                    self.monitor.health_grade(a.id()),
                )
            })
            .collect()
    }

    fn plan(&self, ctx: &AnalysisContext, photo_id: &str) -> Result<ExecutionPlan> {
        let profile = self.profiler.profile();
        let plan = select_plan(&profile, ctx, &self.candidates(), photo_id)?;
        info!(
            photo_id,
            strategy = %plan.strategy,
            tier = ?profile.tier,
            connectivity = ?ctx.connectivity,
            first_wave = ?plan.first_wave,
            fallback = ?plan.fallback_chain,
            "Strategy selected"
        );
        Ok(plan)
    }

    fn waves(&self, plan: &ExecutionPlan, tried: &HashSet<BackendId>) -> VecDeque<Vec<Arc<dyn BackendAdapter>>> {
        let lookup = |ids: &[BackendId]| -> Vec<Arc<dyn BackendAdapter>> {
            ids.iter()
                .filter(|id| !tried.contains(*id))
                .filter_map(|id| self.by_id.get(id).cloned())
                .collect()
        };

        let mut waves = VecDeque::new();
        let first = lookup(&plan.first_wave);
        if !first.is_empty() {
            waves.push_back(first);
        }
        for adapter in lookup(&plan.fallback_chain) {
            waves.push_back(vec![adapter]);
        }
        waves
    }

    /// Disable a backend whose model failed supply-chain checks
    fn disable_backend(&self, backend: &BackendId, err: &SecurityError) {
        error!(backend = %backend, error = %err, "Model security check failed, disabling backend");
        self.monitor.disable(backend, err.to_string());
        self.validator.audit().append(
            AuditEvent::new(event_types::BACKEND_DISABLED, err.to_string())
                .with_subject(backend.as_str())
                .with_severity(AuditSeverity::Critical),
        );
    }

    /// Analyze one captured photo.
    ///
    /// Malformed input is rejected before any backend runs. Cancelling
    /// `cancel` drops every in-flight attempt and yields [`Error::Cancelled`].
    #[instrument(skip_all, fields(photo_id = %image.metadata.photo_id))]
    pub async fn analyze(
        &self,
        image: CapturedImage,
        ctx: &AnalysisContext,
        cancel: CancellationToken,
    ) -> Result<SafetyAnalysis> {
        let started = Instant::now();
        let image = self.validator.sanitize_input(image)?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.run(&image, ctx, started) => Some(result),
        };

        match outcome {
            Some(result) => result,
            None => {
                info!(photo_id = image.photo_id(), "Analysis cancelled");
                self.metrics.record_cancelled();
                Err(Error::Cancelled)
            }
        }
    }

    async fn run(
        &self,
        image: &SanitizedImage,
        ctx: &AnalysisContext,
        started: Instant,
    ) -> Result<SafetyAnalysis> {
        let photo_id = image.photo_id();
        let overall_deadline = started + self.config.overall_timeout();
        let mut machine = StateMachine::new(photo_id);

        machine.to(OrchestrationState::Selecting);
        let plan = self.plan(ctx, photo_id)?;
        let mut strategy = plan.strategy;
        let mut tried: HashSet<BackendId> = HashSet::new();
        let mut waves = self.waves(&plan, &tried);

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut successes: Vec<RawDetectionSet> = Vec::new();
        let mut last_failure: Option<String> = None;
        let mut escalated = false;

        machine.to(OrchestrationState::Executing);
        while let Some(mut wave) = waves.pop_front() {
            let remaining = self.config.max_attempts.saturating_sub(attempts.len());
            if remaining == 0 {
                warn!(photo_id, attempts = attempts.len(), "Attempt budget exhausted");
                break;
            }
            let now = Instant::now();
            if now >= overall_deadline {
                warn!(photo_id, "Overall deadline reached");
                last_failure.get_or_insert_with(|| "overall deadline exceeded".to_string());
                break;
            }
            wave.truncate(remaining);
            let deadline = (now + self.config.attempt_timeout()).min(overall_deadline);

            let results = self.execute_wave(&wave, image, &ctx.detection, deadline).await;

            let mut rejected = false;
            let mut wave_sets = Vec::new();
            for attempt in results {
                tried.insert(attempt.backend.clone());
                let network = attempt.kind == BackendKind::Cloud;
                let outcome = match attempt.result {
                    Ok(set) => {
                        self.monitor.record(&attempt.backend, attempt.latency_ms, true);
                        self.metrics.record_attempt(attempt.backend.as_str(), network, true);
                        info!(
                            backend = %attempt.backend,
                            detections = set.detections.len(),
                            latency_ms = attempt.latency_ms,
                            "Attempt succeeded"
                        );
                        let outcome = AttemptOutcome::Succeeded {
                            detections: set.detections.len(),
                        };
                        wave_sets.push(set);
                        outcome
                    }
                    Err(AdapterError::Backend(e)) => {
                        self.monitor.record(&attempt.backend, attempt.latency_ms, false);
                        self.metrics.record_attempt(attempt.backend.as_str(), network, false);
                        warn!(backend = %attempt.backend, error = %e, "Attempt failed");
                        last_failure = Some(e.degraded_reason(attempt.kind));
                        match e {
                            BackendError::InferenceTimeout { .. } => AttemptOutcome::TimedOut,
                            BackendError::Cancelled => AttemptOutcome::Cancelled,
                            other => AttemptOutcome::Failed {
                                reason: other.to_string(),
                            },
                        }
                    }
                    Err(AdapterError::Security(e)) => {
                        self.metrics.record_attempt(attempt.backend.as_str(), network, false);
                        self.disable_backend(&attempt.backend, &e);
                        last_failure = Some(format!("{} rejected: {e}", attempt.kind.short_name()));
                        rejected = true;
                        AttemptOutcome::SecurityRejected {
                            reason: e.to_string(),
                        }
                    }
                };
                attempts.push(AttemptRecord {
                    backend: attempt.backend,
                    kind: attempt.kind,
                    outcome,
                    latency_ms: attempt.latency_ms,
                });
            }

            let should_escalate = !escalated
                && strategy == AnalysisStrategy::OnDevicePrimaryWithCloudFallback
                && wave_sets.iter().any(|s| {
                    s.kind.is_on_device()
                        && s.min_confidence()
                            .is_some_and(|c| c < self.config.escalation_threshold)
                });
            successes.extend(wave_sets);

            if !successes.is_empty() {
                if should_escalate {
                    if let Some(cloud) = waves
                        .iter()
                        .find(|w| w.iter().any(|a| a.kind() == BackendKind::Cloud))
                        .cloned()
                    {
                        info!(photo_id, "Low-confidence on-device result, consulting cloud");
                        escalated = true;
                        waves = VecDeque::from([cloud]);
                        continue;
                    }
                }
                break;
            }

            if rejected {
                // the disabled backend drops out of the new plan
                machine.to(OrchestrationState::Selecting);
                match self.plan(ctx, photo_id) {
                    Ok(replanned) => {
                        strategy = replanned.strategy;
                        waves = self.waves(&replanned, &tried);
                    }
                    Err(e) => debug!(photo_id, error = %e, "Re-planning found no backend"),
                }
            }

            if !waves.is_empty() {
                machine.to(OrchestrationState::Fallback);
            }
        }

        let processing_time_ms = started.elapsed().as_millis() as u64;

        if successes.is_empty() {
            machine.to(OrchestrationState::Failed);
            let reason = last_failure.unwrap_or_else(|| "no backend attempt succeeded".to_string());
            warn!(photo_id, reason = %reason, attempts = attempts.len(), "Returning degraded result");
            self.metrics
                .record_analysis(processing_time_ms, true, &strategy.to_string());
            return Ok(SafetyAnalysis {
                id: Uuid::new_v4(),
                photo_id: photo_id.to_string(),
                timestamp: Utc::now(),
                work_type: ctx.work_type(),
                strategy,
                overall_risk_level: self.mapper.overall_risk(&[]),
                aggregate_severity: None,
                ai_confidence: 0.0,
                processing_time_ms,
                hazards: Vec::new(),
                violations: Vec::new(),
                attempts,
                is_degraded: true,
                degraded_reason: Some(reason),
            });
        }

        machine.to(OrchestrationState::Fusing);
        if successes.len() > 1 {
            self.metrics.record_fusion();
        }
        let hazards = self.fusion.fuse(&successes, ctx.work_type());
        let violations = self.mapper.map(&hazards, ctx.work_type());
        let ai_confidence = if hazards.is_empty() {
            0.0
        } else {
            hazards.iter().map(|h| h.confidence).sum::<f32>() / hazards.len() as f32
        };

        machine.to(OrchestrationState::Done);
        self.metrics
            .record_analysis(processing_time_ms, false, &strategy.to_string());
        info!(
            photo_id,
            strategy = %strategy,
            hazards = hazards.len(),
            violations = violations.len(),
            processing_time_ms,
            "Analysis complete"
        );

        Ok(SafetyAnalysis {
            id: Uuid::new_v4(),
            photo_id: photo_id.to_string(),
            timestamp: Utc::now(),
            work_type: ctx.work_type(),
            strategy,
            overall_risk_level: self.mapper.overall_risk(&hazards),
            aggregate_severity: self.mapper.aggregate_severity(&hazards),
            ai_confidence,
            processing_time_ms,
            hazards,
            violations,
            attempts,
            is_degraded: false,
            degraded_reason: None,
        })
    }

    /// Run a wave concurrently, each attempt bounded by `deadline`
    async fn execute_wave(
        &self,
        wave: &[Arc<dyn BackendAdapter>],
        image: &SanitizedImage,
        config: &DetectionConfig,
        deadline: Instant,
    ) -> Vec<AttemptResult> {
        join_all(wave.iter().map(|adapter| attempt(adapter.as_ref(), image, config, deadline))).await
    }

    /// Analyze a live-preview frame.
    ///
    /// Frames over the preview rate are dropped and yield `Ok(None)`. An
    /// admitted frame cancels the preview analysis still in flight, which then
    /// also yields `Ok(None)`.
    pub async fn analyze_live(
        &self,
        image: CapturedImage,
        ctx: &AnalysisContext,
    ) -> Result<Option<SafetyAnalysis>> {
        if !self.preview_limiter.try_acquire() {
            self.metrics.record_preview_dropped();
            debug!(photo_id = %image.metadata.photo_id, "Preview frame dropped");
            return Ok(None);
        }

        let token = CancellationToken::new();
        let generation = {
            let mut counter = self.live_generation.lock();
            *counter += 1;
            *counter
        };
        let previous = self.live.lock().replace(LiveSlot {
            generation,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            debug!("Superseding in-flight preview analysis");
            previous.token.cancel();
        }

        let result = self.analyze(image, ctx, token).await;

        {
            let mut live = self.live.lock();
            if live.as_ref().is_some_and(|slot| slot.generation == generation) {
                *live = None;
            }
        }

        match result {
            Ok(analysis) => Ok(Some(analysis)),
            Err(Error::Cancelled) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Verify every on-device model without loading it
    pub async fn verify_models(&self) -> Vec<VerificationReport> {
        let mut reports = Vec::new();
        for adapter in self.adapters.iter().filter(|a| a.kind().is_on_device()) {
            let outcome = match adapter.verify().await {
                Ok(()) => VerificationOutcome::Verified,
                Err(AdapterError::Security(e)) => {
                    self.disable_backend(adapter.id(), &e);
                    VerificationOutcome::Rejected {
                        reason: e.to_string(),
                    }
                }
                Err(AdapterError::Backend(e)) => {
                    warn!(backend = %adapter.id(), error = %e, "Model artifact unavailable");
                    VerificationOutcome::Unavailable {
                        reason: e.to_string(),
                    }
                }
            };
            reports.push(VerificationReport {
                backend: adapter.id().clone(),
                kind: adapter.kind(),
                outcome,
            });
        }
        reports
    }

    /// Platform low-memory signal: evict cached on-device models
    pub async fn on_memory_pressure(&self) {
        info!("Memory pressure, evicting on-device models");
        for adapter in self.adapters.iter().filter(|a| a.kind().is_on_device()) {
            adapter.release().await;
        }
        self.profiler.refresh();
    }

    /// Platform thermal, battery or connectivity callback
    pub fn on_platform_signal(&self) {
        self.profiler.refresh();
    }

    /// Cancel live preview work and release every backend
    pub async fn shutdown(&self) {
        if let Some(slot) = self.live.lock().take() {
            slot.token.cancel();
        }
        for adapter in &self.adapters {
            adapter.release().await;
        }
        info!("Orchestrator shut down");
    }

    /// Run an analysis on its own task
    pub fn spawn_analysis(
        self: &Arc<Self>,
        image: CapturedImage,
        ctx: AnalysisContext,
    ) -> AnalysisHandle {
        let token = CancellationToken::new();
        let this = Arc::clone(self);
        let child = token.clone();
        let task = tokio::spawn(async move { this.analyze(image, &ctx, child).await });
        AnalysisHandle {
            guard: token.drop_guard(),
            task,
        }
    }
}

async fn attempt(
    adapter: &dyn BackendAdapter,
    image: &SanitizedImage,
    config: &DetectionConfig,
    deadline: Instant,
) -> AttemptResult {
    let started = Instant::now();
    let result = match tokio::time::timeout_at(deadline, adapter.analyze(image, config, deadline)).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Backend(BackendError::InferenceTimeout {
            backend: adapter.id().clone(),
            timeout_ms: deadline.saturating_duration_since(started).as_millis() as u64,
        })),
    };
    AttemptResult {
        backend: adapter.id().clone(),
        kind: adapter.kind(),
        result,
        latency_ms: started.elapsed().as_millis() as u64,
    }
}

/// Handle to a spawned analysis.
///
/// Dropping the handle cancels the analysis.
pub struct AnalysisHandle {
    guard: DropGuard,
    task: JoinHandle<Result<SafetyAnalysis>>,
}

impl AnalysisHandle {
    /// Cancel and wait until every in-flight attempt has been dropped
    pub async fn cancel(self) {
        self.guard.disarm().cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Analysis task ended abnormally");
        }
    }

    /// Wait for the result
    pub async fn join(self) -> Result<SafetyAnalysis> {
        self.task
            .await
            .map_err(|e| Error::internal(format!("analysis task failed: {e}")))?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
