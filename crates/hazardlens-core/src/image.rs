//! Captured photo types and input sanitization

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

const JPEG_SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Container format of an encoded photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// MIME type for upload
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => f.write_str("JPEG"),
            Self::Png => f.write_str("PNG"),
        }
    }
}

/// Decoded frame in packed RGB8 layout, row-major
#[derive(Debug, Clone)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

impl RgbFrame {
    pub fn new(width: u32, height: u32, pixels: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            pixels: pixels.into(),
        }
    }

    /// Expected buffer length for the frame dimensions
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Compressed photo as produced by the camera, used for cloud upload
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub format: ImageFormat,
    pub data: Bytes,
}

/// WGS84 capture location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Metadata supplied by the capture subsystem
#[derive(Debug, Clone)]
pub struct CaptureMetadata {
    pub photo_id: String,
    pub captured_at: DateTime<Utc>,
    pub location: Option<GeoPoint>,
}

impl CaptureMetadata {
    pub fn new(photo_id: impl Into<String>) -> Self {
        Self {
            photo_id: photo_id.into(),
            captured_at: Utc::now(),
            location: None,
        }
    }
}

/// A photo as handed over by the capture subsystem, not yet trusted
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub frame: RgbFrame,
    pub encoded: Option<EncodedImage>,
    pub metadata: CaptureMetadata,
}

impl CapturedImage {
    /// Create a captured image from a decoded frame
    pub fn new(frame: RgbFrame, metadata: CaptureMetadata) -> Self {
        Self {
            frame,
            encoded: None,
            metadata,
        }
    }

    /// Attach the encoded original
    pub fn with_encoded(mut self, format: ImageFormat, data: impl Into<Bytes>) -> Self {
        self.encoded = Some(EncodedImage {
            format,
            data: data.into(),
        });
        self
    }
}

/// Size and format bounds enforced before any backend sees an image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputLimits {
    #[serde(default = "default_min_dimension")]
    pub min_dimension: u32,

    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    #[serde(default = "default_max_encoded_bytes")]
    pub max_encoded_bytes: usize,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            min_dimension: default_min_dimension(),
            max_dimension: default_max_dimension(),
            max_encoded_bytes: default_max_encoded_bytes(),
        }
    }
}

fn default_min_dimension() -> u32 {
    32
}

fn default_max_dimension() -> u32 {
    8192
}

fn default_max_encoded_bytes() -> usize {
    20 * 1024 * 1024
}

impl InputLimits {
    /// Check a captured image against the limits
    pub fn sanitize(&self, image: CapturedImage) -> Result<SanitizedImage, ValidationError> {
        let frame = &image.frame;
        let in_range = |d: u32| d >= self.min_dimension && d <= self.max_dimension;
        if !in_range(frame.width) || !in_range(frame.height) {
            return Err(ValidationError::DimensionsOutOfBounds {
                width: frame.width,
                height: frame.height,
            });
        }

        if frame.pixels.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }

        if frame.pixels.len() != frame.expected_len() {
            return Err(ValidationError::PixelBufferMismatch {
                expected: frame.expected_len(),
                actual: frame.pixels.len(),
            });
        }

        if let Some(encoded) = &image.encoded {
            self.check_encoded(encoded)?;
        }

        Ok(SanitizedImage { inner: image })
    }

    fn check_encoded(&self, encoded: &EncodedImage) -> Result<(), ValidationError> {
        let data = &encoded.data;
        if data.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }
        if data.len() > self.max_encoded_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size: data.len(),
                max: self.max_encoded_bytes,
            });
        }

        let well_formed = match encoded.format {
            ImageFormat::Jpeg => data.starts_with(&JPEG_SOI) && data.ends_with(&JPEG_EOI),
            ImageFormat::Png => data.starts_with(&PNG_SIGNATURE),
        };
        if !well_formed {
            return Err(ValidationError::MalformedEncoding(encoded.format));
        }

        Ok(())
    }
}

/// An image that passed [`InputLimits::sanitize`]; only constructible there
#[derive(Debug, Clone)]
pub struct SanitizedImage {
    inner: CapturedImage,
}

impl SanitizedImage {
    pub fn frame(&self) -> &RgbFrame {
        &self.inner.frame
    }

    pub fn encoded(&self) -> Option<&EncodedImage> {
        self.inner.encoded.as_ref()
    }

    pub fn metadata(&self) -> &CaptureMetadata {
        &self.inner.metadata
    }

    pub fn photo_id(&self) -> &str {
        &self.inner.metadata.photo_id
    }
}
