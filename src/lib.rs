//! Self-healing network camera capture
//!
//! This library keeps the freshest decoded frame of a network camera
//! available to many concurrent readers:
//! - A dedicated capture thread with exponential reconnect backoff
//! - Copy-in/copy-out frame and status store behind a single lock
//! - Sliding-window frame rate estimation
//! - GStreamer transport and `image`-based JPEG/PNG encoding
//! - An axum HTTP/WebSocket surface (snapshot, MJPEG feed, status, reconnect)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtsp_watcher::{
//!     CaptureError, EngineConfig, GstTransport, GstTransportConfig, RasterEncoder,
//!     StreamCaptureEngine,
//! };
//!
//! let transport = GstTransport::new(GstTransportConfig::default())?;
//! let engine = StreamCaptureEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(transport),
//!     Arc::new(RasterEncoder),
//! )?;
//! engine.start()?;
//! // ... later
//! let jpeg = engine.get_jpeg();
//! engine.stop();
//! # Ok::<(), CaptureError>(())
//! ```

pub mod capture;
pub mod config;
pub mod encode;
pub mod transport;
pub mod web;

// Re-exports for convenience
pub use capture::{
    BackoffPolicy, BackoffScheduler, CaptureError, CapturedFrame, ConnectionState, EngineConfig,
    FpsEstimator, SharedFrameState, StreamCaptureEngine, StreamStatus,
};
pub use config::{Config, ConfigError};
pub use encode::{FrameEncoder, ImageFormat, RasterEncoder};
pub use transport::{GstTransport, GstTransportConfig, StreamHandle, Transport};
