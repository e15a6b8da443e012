//! Candle inference runtime for on-device detectors
//!
//! The network architecture is injected as a [`NetworkBuilder`]; this module
//! owns device placement, preprocessing, and decoding of YOLO-layout output
//! (`[1, 4 + classes, anchors]`, boxes as centre/size in input pixels).

use crate::config::ModelSpec;
use crate::security::ValidatedModel;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, VarBuilder};
use hazardlens_core::{
    BackendError, BackendKind, BoundingBox, DetectionConfig, HazardType, RawDetection, RgbFrame,
};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// IoU above which same-type boxes from one model are suppressed
pub const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Builds the detector network from validated weights
pub type NetworkBuilder = Arc<
    dyn Fn(VarBuilder<'static>, &ModelSpec) -> candle_core::Result<Box<dyn Module + Send + Sync>>
        + Send
        + Sync,
>;

/// A loaded model ready to run
pub trait DetectionSession: Send + Sync {
    /// Run detection on one frame (blocking)
    fn detect(
        &self,
        frame: &RgbFrame,
        config: &DetectionConfig,
    ) -> Result<Vec<RawDetection>, BackendError>;

    /// Model version reported in results
    fn version(&self) -> Option<String> {
        None
    }
}

/// Turns validated weights into a session for a given hardware kind
pub trait DetectionRuntime: Send + Sync {
    /// Load a model (blocking)
    fn load(
        &self,
        model: &ValidatedModel,
        spec: &ModelSpec,
        kind: BackendKind,
    ) -> Result<Arc<dyn DetectionSession>, BackendError>;
}

/// Candle-backed runtime
#[derive(Clone)]
pub struct CandleRuntime {
    builder: NetworkBuilder,
}

impl CandleRuntime {
    pub fn new(builder: NetworkBuilder) -> Self {
        Self { builder }
    }

    /// Device for a backend kind; accelerators fall back to CPU when absent
    fn device_for(kind: BackendKind) -> Result<Device, BackendError> {
        let device = match kind {
            BackendKind::OnDeviceCpu | BackendKind::Cloud => Ok(Device::Cpu),
            BackendKind::OnDeviceGpu => Device::cuda_if_available(0),
            BackendKind::OnDeviceNpu => Self::metal_or_cpu(),
        };
        device.map_err(|e| BackendError::ModelLoadFailure(format!("device unavailable: {e}")))
    }

    /// Metal is only compiled in with the `metal` feature
    fn metal_or_cpu() -> candle_core::Result<Device> {
        if candle_core::utils::metal_is_available() {
            Device::new_metal(0)
        } else {
            Ok(Device::Cpu)
        }
    }
}

impl DetectionRuntime for CandleRuntime {
    fn load(
        &self,
        model: &ValidatedModel,
        spec: &ModelSpec,
        kind: BackendKind,
    ) -> Result<Arc<dyn DetectionSession>, BackendError> {
        let device = Self::device_for(kind)?;
        let vb = VarBuilder::from_buffered_safetensors(model.bytes().to_vec(), DType::F32, &device)
            .map_err(load_error)?;
        let network = (self.builder)(vb, spec).map_err(load_error)?;

        info!(
            model_id = model.model_id(),
            device = ?device,
            input_size = spec.input_size(kind),
            "Loaded detector"
        );

        Ok(Arc::new(CandleSession {
            network,
            device,
            input_size: spec.input_size(kind),
            classes: spec.classes.clone(),
            version: spec.version.clone(),
        }))
    }
}

struct CandleSession {
    network: Box<dyn Module + Send + Sync>,
    device: Device,
    input_size: u32,
    classes: Vec<String>,
    version: Option<String>,
}

impl CandleSession {
    /// RGB8 HWC frame to a `[1, 3, S, S]` tensor scaled to `[0, 1]`
    fn preprocess(&self, frame: &RgbFrame) -> candle_core::Result<Tensor> {
        let data: Vec<f32> = frame.pixels.iter().map(|&p| p as f32 / 255.0).collect();
        let size = self.input_size as usize;
        Tensor::from_vec(
            data,
            (frame.height as usize, frame.width as usize, 3),
            &self.device,
        )?
        .permute((2, 0, 1))?
        .unsqueeze(0)?
        .upsample_nearest2d(size, size)
    }

    fn forward(&self, frame: &RgbFrame) -> candle_core::Result<(Vec<f32>, usize)> {
        let input = self.preprocess(frame)?;
        let output = self.network.forward(&input)?.squeeze(0)?;
        let channels = output.dim(0)?;
        let flat = output.contiguous()?.flatten_all()?.to_vec1::<f32>()?;
        Ok((flat, channels))
    }
}

impl DetectionSession for CandleSession {
    fn detect(
        &self,
        frame: &RgbFrame,
        config: &DetectionConfig,
    ) -> Result<Vec<RawDetection>, BackendError> {
        let (output, channels) = self.forward(frame).map_err(inference_error)?;
        let detections =
            decode_yolo_output(&output, channels, &self.classes, self.input_size, config);
        debug!(count = detections.len(), "Decoded detections");
        Ok(detections)
    }

    fn version(&self) -> Option<String> {
        self.version.clone()
    }
}

/// Decode channel-major YOLO output into hazard detections.
///
/// Rows 0..4 hold `cx, cy, w, h` in input pixels; the remaining rows hold
/// one score per class. Classes that are not hazards on their own are
/// dropped before suppression.
pub fn decode_yolo_output(
    output: &[f32],
    channels: usize,
    classes: &[String],
    input_size: u32,
    config: &DetectionConfig,
) -> Vec<RawDetection> {
    if channels <= 4 || output.len() % channels != 0 {
        return Vec::new();
    }
    let anchors = output.len() / channels;
    let num_classes = (channels - 4).min(classes.len());
    let at = |c: usize, a: usize| output[c * anchors + a];
    let scale = input_size.max(1) as f32;

    let mut detections = Vec::new();
    for a in 0..anchors {
        let best = (0..num_classes)
            .map(|k| (k, at(4 + k, a)))
            .max_by(|x, y| x.1.total_cmp(&y.1));
        let Some((class, score)) = best else { continue };
        if score.is_nan() || score < config.confidence_threshold {
            continue;
        }

        let label = &classes[class];
        let Some(hazard_type) = HazardType::from_label(label) else {
            continue;
        };

        let (cx, cy, w, h) = (at(0, a), at(1, a), at(2, a), at(3, a));
        let bounding_box = BoundingBox::clamped(
            (cx - w / 2.0) / scale,
            (cy - h / 2.0) / scale,
            (cx + w / 2.0) / scale,
            (cy + h / 2.0) / scale,
        );
        detections.push(RawDetection::new(label.clone(), hazard_type, bounding_box, score));
    }

    let mut kept = non_max_suppression(detections, NMS_IOU_THRESHOLD);
    kept.truncate(config.max_detections);
    kept
}

/// Per-type non-maximum suppression, highest confidence first
pub fn non_max_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = kept.iter().any(|k| {
            k.hazard_type == det.hazard_type && k.bounding_box.iou(&det.bounding_box) > iou_threshold
        });
        if !suppressed {
            kept.push(det);
        }
    }
    kept
}

/// A single 1x1 convolution head named `head`.
///
/// Suitable for compact detectors exported with their backbone folded into
/// the head weights, and for exercising the runtime end to end.
pub fn conv_head_network() -> NetworkBuilder {
    Arc::new(|vb: VarBuilder<'static>, spec: &ModelSpec| {
        let conv = candle_nn::conv2d(3, 4 + spec.classes.len(), 1, Conv2dConfig::default(), vb.pp("head"))?;
        Ok(Box::new(ConvHead { conv }) as Box<dyn Module + Send + Sync>)
    })
}

struct ConvHead {
    conv: Conv2d,
}

impl Module for ConvHead {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        // [1, 4 + C, S, S] -> [1, 4 + C, S * S]
        self.conv.forward(xs)?.flatten_from(2)
    }
}

fn load_error(e: candle_core::Error) -> BackendError {
    if is_oom(&e) {
        BackendError::OutOfMemory
    } else {
        BackendError::ModelLoadFailure(e.to_string())
    }
}

fn inference_error(e: candle_core::Error) -> BackendError {
    if is_oom(&e) {
        BackendError::OutOfMemory
    } else {
        BackendError::Inference(e.to_string())
    }
}

fn is_oom(e: &candle_core::Error) -> bool {
    e.to_string().to_ascii_lowercase().contains("out of memory")
}
