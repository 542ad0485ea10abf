//! Still-image encoding of captured frames

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capture::{CaptureError, CapturedFrame};

/// Output container for encoded frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Jpeg => write!(f, "jpeg"),
            ImageFormat::Png => write!(f, "png"),
        }
    }
}

/// Encode capability used by the snapshot accessors
pub trait FrameEncoder: Send + Sync {
    /// Encodes `frame`; `quality` (1-100) applies to lossy formats only
    fn encode(
        &self,
        frame: &CapturedFrame,
        format: ImageFormat,
        quality: u8,
    ) -> Result<Bytes, CaptureError>;
}

/// [`FrameEncoder`] backed by the `image` codecs
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterEncoder;

impl FrameEncoder for RasterEncoder {
    fn encode(
        &self,
        frame: &CapturedFrame,
        format: ImageFormat,
        quality: u8,
    ) -> Result<Bytes, CaptureError> {
        let mut buf = Vec::with_capacity(frame.data.len() / 8);

        let result = match format {
            ImageFormat::Jpeg => JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
                .write_image(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8),
            ImageFormat::Png => PngEncoder::new(&mut buf).write_image(
                &frame.data,
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            ),
        };
        result.map_err(|e| CaptureError::Encode(format!("{}: {}", format, e)))?;

        Ok(Bytes::from(buf))
    }
}
