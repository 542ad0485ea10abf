//! Decoded frame type

use chrono::{DateTime, Utc};
use std::time::Instant;

/// Bytes per pixel of the packed RGB8 layout
pub const RGB_BYTES_PER_PIXEL: usize = 3;

/// A decoded RGB8 raster plus its arrival time
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGB8 rows (`width * 3` bytes each)
    pub data: Vec<u8>,
    /// Monotonic arrival time, used for rate estimation
    pub arrived_at: Instant,
    /// Wall-clock arrival time, reported to clients
    pub captured_at: DateTime<Utc>,
}

impl CapturedFrame {
    /// Wraps a packed RGB8 buffer stamped with the current time.
    ///
    /// Returns `None` when the buffer length doesn't match the dimensions.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        if data.len() != Self::expected_len(width, height) {
            return None;
        }

        Some(Self {
            width,
            height,
            data,
            arrived_at: Instant::now(),
            captured_at: Utc::now(),
        })
    }

    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * RGB_BYTES_PER_PIXEL
    }
}
