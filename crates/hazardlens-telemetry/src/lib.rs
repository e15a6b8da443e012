//! HazardLens Telemetry
//!
//! Audit and metrics functionality for HazardLens.
//!
//! Provides:
//! - The append-only audit event contract consumed by the external audit collaborator
//! - A hash-chained in-memory trail for tamper detection
//! - Orchestration counters and latency metrics

pub mod audit;
pub mod metrics;

pub use audit::{
    event_types, AuditEvent, AuditSeverity, AuditSink, AuditTrail, InMemoryAuditSink,
    TracingAuditSink,
};
pub use metrics::{MetricsCollector, MetricsSnapshot};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::audit::{AuditEvent, AuditSink, InMemoryAuditSink};
    pub use crate::metrics::MetricsCollector;
}
