//! Camera transport capability
//!
//! The capture loop only sees these traits: open a target, pull decoded
//! frames from the resulting handle, release it. The GStreamer-backed
//! implementation lives in [`gst`].

pub mod gst;

pub use self::gst::{GstTransport, GstTransportConfig};

use crate::capture::{CaptureError, CapturedFrame};

/// Opens camera sessions
pub trait Transport: Send + Sync {
    /// Connects to `target`.
    ///
    /// Implementations keep at most one decoded frame buffered so a slow
    /// reader always gets the freshest picture rather than a backlog.
    fn open(&self, target: &str) -> Result<Box<dyn StreamHandle>, CaptureError>;
}

/// An open camera session, owned exclusively by the capture loop
pub trait StreamHandle: Send {
    /// Blocks for the next decoded frame, bounded by the transport's read timeout
    fn read(&mut self) -> Result<CapturedFrame, CaptureError>;

    /// Tears the session down
    fn release(self: Box<Self>);
}
