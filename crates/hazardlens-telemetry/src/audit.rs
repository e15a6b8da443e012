//! Security audit trail
//!
//! Validation outcomes are emitted as append-only [`AuditEvent`]s
//! (event type, detail, timestamp) to whatever [`AuditSink`] the host
//! application wires in.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Event type names emitted by HazardLens
pub mod event_types {
    pub const MODEL_VALIDATED: &str = "model_validated";
    pub const MODEL_REJECTED: &str = "model_rejected";
    pub const BACKEND_DISABLED: &str = "backend_disabled";
    pub const INPUT_REJECTED: &str = "input_rejected";
    pub const ENDPOINT_REJECTED: &str = "endpoint_rejected";
}

/// Append-only destination for audit events
pub trait AuditSink: Send + Sync {
    /// Append one event; must not block on I/O
    fn append(&self, event: AuditEvent);
}

/// Audit trail with hash-chained events for tamper detection
#[derive(Debug, Default)]
pub struct AuditTrail {
    events: Vec<AuditEvent>,
    chain_hash: Option<String>,
}

impl AuditTrail {
    /// Create a new audit trail
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event to the audit trail
    pub fn add_event(&mut self, mut event: AuditEvent) {
        event.previous_hash = self.chain_hash.clone();

        let hash = compute_hash(&event);
        event.hash = Some(hash.clone());

        self.chain_hash = Some(hash);
        self.events.push(event);
    }

    /// Verify the integrity of the audit trail
    pub fn verify(&self) -> bool {
        let mut prev_hash: Option<String> = None;

        for event in &self.events {
            if event.previous_hash != prev_hash {
                return false;
            }

            if event.hash.as_deref() != Some(compute_hash(event).as_str()) {
                return false;
            }

            prev_hash = event.hash.clone();
        }

        true
    }

    /// Get all events
    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }
}

fn compute_hash(event: &AuditEvent) -> String {
    let mut hasher = Sha256::new();

    hasher.update(event.event_type.as_bytes());
    hasher.update(event.detail.as_bytes());
    if let Some(ref subject) = event.subject {
        hasher.update(subject.as_bytes());
    }
    hasher.update(event.timestamp.to_rfc3339().as_bytes());
    if let Some(ref prev) = event.previous_hash {
        hasher.update(prev.as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

/// A single audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event type/category
    pub event_type: String,

    /// Human-readable detail
    pub detail: String,

    /// Backend or model the event concerns
    pub subject: Option<String>,

    pub timestamp: DateTime<Utc>,
    pub severity: AuditSeverity,

    /// Hash of this event, set when chained
    pub hash: Option<String>,

    /// Hash of previous event (for chaining)
    pub previous_hash: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event
    pub fn new(event_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            detail: detail.into(),
            subject: None,
            timestamp: Utc::now(),
            severity: AuditSeverity::Info,
            hash: None,
            previous_hash: None,
        }
    }

    /// Set the subject (backend or model id)
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set severity
    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    High,
    Critical,
}

/// Sink that keeps a verifiable trail in memory
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    trail: Mutex<AuditTrail>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events
    pub fn events(&self) -> Vec<AuditEvent> {
        self.trail.lock().events().to_vec()
    }

    /// Number of events of a given type
    pub fn count(&self, event_type: &str) -> usize {
        self.trail
            .lock()
            .events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Verify the hash chain
    pub fn verify(&self) -> bool {
        self.trail.lock().verify()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn append(&self, event: AuditEvent) {
        self.trail.lock().add_event(event);
    }
}

/// Sink that forwards events to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append(&self, event: AuditEvent) {
        let subject = event.subject.as_deref().unwrap_or("-");
        match event.severity {
            AuditSeverity::Info => info!(
                target: "hazardlens::audit",
                event_type = %event.event_type,
                subject,
                "{}",
                event.detail
            ),
            _ => warn!(
                target: "hazardlens::audit",
                event_type = %event.event_type,
                subject,
                severity = ?event.severity,
                "{}",
                event.detail
            ),
        }
    }
}
