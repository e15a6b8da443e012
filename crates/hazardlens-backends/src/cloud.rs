//! Cloud vision backend
//!
//! Sends the photo as base64 JSON to a configured HTTPS endpoint and reads
//! back labelled, normalized boxes. The HTTP session is created on first use
//! and dropped on release.

use crate::adapter::{AdapterError, BackendAdapter};
use crate::config::CloudSpec;
use crate::endpoint::{validate_endpoint, EndpointError, EndpointPolicy};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hazardlens_core::{
    BackendError, BackendId, BackendKind, BoundingBox, DetectionConfig, HazardType,
    IntegrityStatus, RawDetection, RawDetectionSet, SanitizedImage, Severity, WorkType,
};
use parking_lot::Mutex;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    image: ImagePayload<'a>,
    work_type: WorkType,
    confidence_threshold: f32,
    max_detections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ImagePayload<'a> {
    /// `jpeg`, `png`, or `rgb8` for raw frames
    format: &'a str,
    width: u32,
    height: u32,
    data: String,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    detections: Vec<CloudDetection>,
}

#[derive(Debug, Deserialize)]
struct CloudDetection {
    label: String,
    confidence: f32,
    /// `[x_min, y_min, x_max, y_max]`, normalized
    #[serde(rename = "box")]
    bbox: [f32; 4],
    #[serde(default)]
    severity: Option<Severity>,
}

/// Adapter for a remote vision service
pub struct CloudVisionAdapter {
    id: BackendId,
    endpoint: Url,
    api_key: Option<String>,
    model: Option<String>,
    session: Mutex<Option<Client>>,
}

impl CloudVisionAdapter {
    /// Create an adapter; the endpoint is validated against `policy`
    pub fn new(
        id: BackendId,
        spec: &CloudSpec,
        api_key: Option<String>,
        policy: &EndpointPolicy,
    ) -> Result<Self, EndpointError> {
        let endpoint = validate_endpoint(&spec.endpoint, policy)?;
        Ok(Self {
            id,
            endpoint,
            api_key,
            model: spec.model.clone(),
            session: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Whether an HTTP session is currently held
    pub fn has_session(&self) -> bool {
        self.session.lock().is_some()
    }

    fn client(&self) -> Result<Client, BackendError> {
        let mut session = self.session.lock();
        if let Some(client) = session.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .user_agent(concat!("hazardlens/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::NetworkUnavailable(format!("cannot create session: {e}")))?;
        *session = Some(client.clone());
        Ok(client)
    }

    fn payload<'a>(&'a self, image: &SanitizedImage, config: &DetectionConfig) -> DetectRequest<'a> {
        let frame = image.frame();
        let image = match image.encoded() {
            Some(encoded) => ImagePayload {
                format: match encoded.format {
                    hazardlens_core::ImageFormat::Jpeg => "jpeg",
                    hazardlens_core::ImageFormat::Png => "png",
                },
                width: frame.width,
                height: frame.height,
                data: STANDARD.encode(&encoded.data),
            },
            None => ImagePayload {
                format: "rgb8",
                width: frame.width,
                height: frame.height,
                data: STANDARD.encode(&frame.pixels),
            },
        };

        DetectRequest {
            image,
            work_type: config.work_type,
            confidence_threshold: config.confidence_threshold,
            max_detections: config.max_detections,
            model: self.model.as_deref(),
        }
    }

    async fn request(
        &self,
        image: &SanitizedImage,
        config: &DetectionConfig,
        deadline: Instant,
    ) -> Result<RawDetectionSet, BackendError> {
        let started = Instant::now();
        let client = self.client()?;
        let timeout = deadline.saturating_duration_since(started);

        let mut request = client
            .post(self.endpoint.clone())
            .timeout(timeout)
            .json(&self.payload(image, config));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e, timeout))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1000));
            return Err(BackendError::RateLimited { retry_after_ms });
        }
        if status.is_server_error() {
            return Err(BackendError::NetworkUnavailable(format!("service returned {status}")));
        }
        if !status.is_success() {
            return Err(BackendError::Inference(format!("service returned {status}")));
        }

        let body: DetectResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;

        let mut set = RawDetectionSet::new(self.id.clone(), BackendKind::Cloud);
        set.detections = body
            .detections
            .into_iter()
            .filter_map(|d| {
                let hazard_type = HazardType::from_label(&d.label)?;
                let [x1, y1, x2, y2] = d.bbox;
                let det = RawDetection::new(
                    d.label,
                    hazard_type,
                    BoundingBox::clamped(x1, y1, x2, y2),
                    d.confidence,
                );
                Some(match d.severity {
                    Some(severity) => det.with_severity(severity),
                    None => det,
                })
            })
            .take(config.max_detections)
            .collect();
        set.latency_ms = started.elapsed().as_millis() as u64;
        set.model_version = body.model_version;

        debug!(
            backend = %self.id,
            detections = set.detections.len(),
            latency_ms = set.latency_ms,
            "Cloud analysis complete"
        );
        Ok(set)
    }

    fn transport_error(&self, e: reqwest::Error, timeout: std::time::Duration) -> BackendError {
        if e.is_timeout() {
            BackendError::InferenceTimeout {
                backend: self.id.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else if e.is_connect() || e.is_request() {
            BackendError::NetworkUnavailable(e.to_string())
        } else {
            BackendError::Inference(e.to_string())
        }
    }
}

#[async_trait]
impl BackendAdapter for CloudVisionAdapter {
    fn id(&self) -> &BackendId {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    fn integrity(&self) -> IntegrityStatus {
        IntegrityStatus::NotApplicable
    }

    async fn analyze(
        &self,
        image: &SanitizedImage,
        config: &DetectionConfig,
        deadline: Instant,
    ) -> Result<RawDetectionSet, AdapterError> {
        let budget = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout_at(deadline, self.request(image, config, deadline)).await {
            Ok(result) => result.map_err(|e| {
                warn!(backend = %self.id, error = %e, "Cloud attempt failed");
                AdapterError::Backend(e)
            }),
            Err(_) => {
                warn!(backend = %self.id, "Cloud attempt hit its deadline");
                Err(BackendError::InferenceTimeout {
                    backend: self.id.clone(),
                    timeout_ms: budget.as_millis() as u64,
                }
                .into())
            }
        }
    }

    async fn release(&self) {
        if self.session.lock().take().is_some() {
            debug!(backend = %self.id, "Dropped cloud session");
        }
    }
}
