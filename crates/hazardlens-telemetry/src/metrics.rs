//! Metrics collection and reporting
//!
//! Every recording call updates both the in-process counters (for snapshots)
//! and the global `metrics` recorder, if one is installed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector for orchestration performance monitoring
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    analyses: AtomicU64,
    degraded: AtomicU64,
    cancelled: AtomicU64,
    backend_attempts: AtomicU64,
    network_attempts: AtomicU64,
    failed_attempts: AtomicU64,
    fused_analyses: AtomicU64,
    preview_dropped: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished analysis
    pub fn record_analysis(&self, latency_ms: u64, degraded: bool, strategy: &str) {
        self.inner.analyses.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);

        metrics::counter!("hazardlens_analyses_total", "strategy" => strategy.to_string())
            .increment(1);
        metrics::histogram!("hazardlens_analysis_latency_ms").record(latency_ms as f64);

        if degraded {
            self.inner.degraded.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("hazardlens_degraded_total").increment(1);
        }
    }

    /// Record one backend attempt
    pub fn record_attempt(&self, backend: &str, network: bool, success: bool) {
        self.inner.backend_attempts.fetch_add(1, Ordering::Relaxed);
        if network {
            self.inner.network_attempts.fetch_add(1, Ordering::Relaxed);
        }
        if !success {
            self.inner.failed_attempts.fetch_add(1, Ordering::Relaxed);
        }

        let outcome = if success { "success" } else { "failure" };
        metrics::counter!(
            "hazardlens_backend_attempts_total",
            "backend" => backend.to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }

    /// Record that results from several backends were fused
    pub fn record_fusion(&self) {
        self.inner.fused_analyses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("hazardlens_fused_total").increment(1);
    }

    /// Record a caller cancellation
    pub fn record_cancelled(&self) {
        self.inner.cancelled.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("hazardlens_cancelled_total").increment(1);
    }

    /// Record a live-preview frame dropped by the rate limiter
    pub fn record_preview_dropped(&self) {
        self.inner.preview_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("hazardlens_preview_dropped_total").increment(1);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            analyses: self.inner.analyses.load(Ordering::Relaxed),
            degraded: self.inner.degraded.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
            backend_attempts: self.inner.backend_attempts.load(Ordering::Relaxed),
            network_attempts: self.inner.network_attempts.load(Ordering::Relaxed),
            failed_attempts: self.inner.failed_attempts.load(Ordering::Relaxed),
            fused_analyses: self.inner.fused_analyses.load(Ordering::Relaxed),
            preview_dropped: self.inner.preview_dropped.load(Ordering::Relaxed),
            total_latency_ms: self.inner.total_latency_ms.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub analyses: u64,
    pub degraded: u64,
    pub cancelled: u64,
    pub backend_attempts: u64,
    pub network_attempts: u64,
    pub failed_attempts: u64,
    pub fused_analyses: u64,
    pub preview_dropped: u64,
    pub total_latency_ms: u64,
}

impl MetricsSnapshot {
    /// Calculate average latency per analysis
    pub fn avg_latency_ms(&self) -> u64 {
        if self.analyses == 0 {
            0
        } else {
            self.total_latency_ms / self.analyses
        }
    }

    /// Fraction of analyses that ended degraded
    pub fn degraded_rate(&self) -> f64 {
        if self.analyses == 0 {
            0.0
        } else {
            self.degraded as f64 / self.analyses as f64
        }
    }
}
