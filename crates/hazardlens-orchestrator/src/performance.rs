//! Rolling per-backend performance tracking with cooldown
//!
//! Each backend has a bounded window of recent invocations. A backend whose
//! window shows a poor success rate or mean latency is put in cooldown and
//! excluded from primary selection until the cooldown elapses. Disabled
//! backends stay disabled for the rest of the session.

use crate::config::MonitorConfig;
use hazardlens_core::{AvailabilityState, BackendId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// One backend invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceRecord {
    pub backend: BackendId,
    pub latency_ms: u64,
    pub success: bool,
    pub timestamp: Instant,
}

/// Coarse health derived from the rolling window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthGrade {
    Poor,
    Fair,
    Good,
    Excellent,
}

#[derive(Debug, Clone)]
enum BreakerState {
    Available,
    Cooldown { until: Instant },
    Disabled { reason: String },
}

#[derive(Debug)]
struct BackendStats {
    window: VecDeque<PerformanceRecord>,
    invocations: u64,
    state: BreakerState,
}

impl BackendStats {
    fn new() -> Self {
        Self {
            window: VecDeque::new(),
            invocations: 0,
            state: BreakerState::Available,
        }
    }

    fn success_rate(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let ok = self.window.iter().filter(|r| r.success).count();
        Some(ok as f64 / self.window.len() as f64)
    }

    fn mean_latency_ms(&self) -> Option<u64> {
        if self.window.is_empty() {
            return None;
        }
        let total: u64 = self.window.iter().map(|r| r.latency_ms).sum();
        Some(total / self.window.len() as u64)
    }

    /// Lift an expired cooldown
    fn settle(&mut self, now: Instant, backend: &BackendId) {
        if let BreakerState::Cooldown { until } = self.state {
            if now >= until {
                info!(backend = %backend, "Backend re-admitted after cooldown");
                self.state = BreakerState::Available;
            }
        }
    }
}

/// Read-only view of one backend's statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub backend: BackendId,
    pub grade: HealthGrade,
    pub availability: AvailabilityState,
    pub samples: usize,
    pub invocations: u64,
    pub success_rate: Option<f64>,
    pub mean_latency_ms: Option<u64>,
}

/// Tracks backend health; the only writer of its own windows
pub struct PerformanceMonitor {
    config: MonitorConfig,
    stats: RwLock<HashMap<BackendId, BackendStats>>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            stats: RwLock::new(HashMap::new()),
        }
    }

    fn cooldown(&self) -> Duration {
        Duration::from_millis(self.config.cooldown_ms)
    }

    /// Record one invocation outcome
    pub fn record(&self, backend: &BackendId, latency_ms: u64, success: bool) {
        let now = Instant::now();
        let mut stats = self.stats.write();
        let entry = stats.entry(backend.clone()).or_insert_with(BackendStats::new);

        if matches!(entry.state, BreakerState::Disabled { .. }) {
            return;
        }
        entry.settle(now, backend);

        entry.invocations += 1;
        entry.window.push_back(PerformanceRecord {
            backend: backend.clone(),
            latency_ms,
            success,
            timestamp: now,
        });
        while entry.window.len() > self.config.window_size.max(1) {
            entry.window.pop_front();
        }

        if !matches!(entry.state, BreakerState::Available)
            || entry.window.len() < self.config.min_samples
        {
            return;
        }

        let success_rate = entry.success_rate().unwrap_or(1.0);
        let mean_latency = entry.mean_latency_ms().unwrap_or(0);
        if success_rate < self.config.poor_success_rate || mean_latency > self.config.poor_latency_ms
        {
            warn!(
                backend = %backend,
                success_rate,
                mean_latency_ms = mean_latency,
                cooldown_ms = self.config.cooldown_ms,
                "Backend entering cooldown"
            );
            entry.state = BreakerState::Cooldown {
                until: now + self.cooldown(),
            };
            // fresh evidence after re-admission
            entry.window.clear();
        }
    }

    /// Grade from the rolling window; backends without samples grade `Good`
    pub fn health_grade(&self, backend: &BackendId) -> HealthGrade {
        let stats = self.stats.read();
        let Some(entry) = stats.get(backend) else {
            return HealthGrade::Good;
        };
        if matches!(entry.state, BreakerState::Disabled { .. }) {
            return HealthGrade::Poor;
        }
        self.grade(entry)
    }

    fn grade(&self, entry: &BackendStats) -> HealthGrade {
        let (Some(rate), Some(latency)) = (entry.success_rate(), entry.mean_latency_ms()) else {
            return HealthGrade::Good;
        };
        let poor_latency = self.config.poor_latency_ms;

        if rate >= 0.95 && latency <= poor_latency / 4 {
            HealthGrade::Excellent
        } else if rate >= 0.8 && latency <= poor_latency / 2 {
            HealthGrade::Good
        } else if rate >= self.config.poor_success_rate && latency <= poor_latency {
            HealthGrade::Fair
        } else {
            HealthGrade::Poor
        }
    }

    pub fn is_in_cooldown(&self, backend: &BackendId) -> bool {
        matches!(self.availability(backend), AvailabilityState::Cooldown { .. })
    }

    pub fn is_disabled(&self, backend: &BackendId) -> bool {
        self.availability(backend).is_disabled()
    }

    /// Current state, re-admitting the backend if its cooldown has expired
    pub fn availability(&self, backend: &BackendId) -> AvailabilityState {
        let now = Instant::now();
        let mut stats = self.stats.write();
        let Some(entry) = stats.get_mut(backend) else {
            return AvailabilityState::Available;
        };
        entry.settle(now, backend);

        match &entry.state {
            BreakerState::Available => AvailabilityState::Available,
            BreakerState::Cooldown { until } => AvailabilityState::Cooldown {
                remaining_ms: until.saturating_duration_since(now).as_millis() as u64,
            },
            BreakerState::Disabled { reason } => AvailabilityState::Disabled {
                reason: reason.clone(),
            },
        }
    }

    /// Disable a backend for the rest of the session
    pub fn disable(&self, backend: &BackendId, reason: impl Into<String>) {
        let reason = reason.into();
        let mut stats = self.stats.write();
        let entry = stats.entry(backend.clone()).or_insert_with(BackendStats::new);
        if !matches!(entry.state, BreakerState::Disabled { .. }) {
            warn!(backend = %backend, reason = %reason, "Backend disabled for session");
        }
        entry.state = BreakerState::Disabled { reason };
    }

    /// Invocations recorded since the session began
    pub fn invocation_count(&self, backend: &BackendId) -> u64 {
        self.stats
            .read()
            .get(backend)
            .map(|s| s.invocations)
            .unwrap_or(0)
    }

    /// Snapshot of every tracked backend
    pub fn snapshot(&self) -> Vec<BackendHealth> {
        let ids: Vec<BackendId> = self.stats.read().keys().cloned().collect();
        let mut health: Vec<BackendHealth> = ids
            .into_iter()
            .map(|id| {
                let availability = self.availability(&id);
                let grade = self.health_grade(&id);
                let stats = self.stats.read();
                let entry = stats.get(&id);
                BackendHealth {
                    grade,
                    availability,
                    samples: entry.map(|e| e.window.len()).unwrap_or(0),
                    invocations: entry.map(|e| e.invocations).unwrap_or(0),
                    success_rate: entry.and_then(|e| e.success_rate()),
                    mean_latency_ms: entry.and_then(|e| e.mean_latency_ms()),
                    backend: id,
                }
            })
            .collect();
        health.sort_by(|a, b| a.backend.cmp(&b.backend));
        health
    }
}
