//! Stream capture engine
//!
//! A dedicated thread keeps a camera session open, reconnecting with
//! exponential backoff, and publishes the newest decoded frame plus
//! connection status. Readers only ever receive copies.

mod backoff;
mod fps;
mod frame;
mod state;
mod worker;

pub use backoff::{BackoffPolicy, BackoffScheduler};
pub use fps::{FpsEstimator, FPS_WINDOW};
pub use frame::{CapturedFrame, RGB_BYTES_PER_PIXEL};
pub use state::{ConnectionState, SharedFrameState};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use gstreamer as gst;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::encode::{FrameEncoder, ImageFormat};
use crate::transport::Transport;
use worker::{CaptureLoop, LoopControl, Shared};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("cannot open {target}: {reason}")]
    ConnectionOpen { target: String, reason: String },

    #[error("frame read failed: {0}")]
    FrameRead(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("GStreamer error: {0}")]
    Gst(#[from] gst::glib::Error),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Camera URL the engine starts with
    pub target: String,
    pub backoff: BackoffPolicy,
    /// How long `stop()` waits for the capture thread
    pub stop_grace: Duration,
    /// Quality used by [`StreamCaptureEngine::get_jpeg`]
    pub jpeg_quality: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target: "rtsp://localhost:8554/cam".to_string(),
            backoff: BackoffPolicy::default(),
            stop_grace: Duration::from_secs(5),
            jpeg_quality: 80,
        }
    }
}

/// Flat status view handed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub connected: bool,
    /// Rounded to one decimal
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub reconnect_attempts: u32,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub rtsp_url: String,
    pub error: Option<String>,
}

impl StreamStatus {
    fn new(state: ConnectionState) -> Self {
        Self {
            connected: state.connected,
            fps: (state.fps * 10.0).round() / 10.0,
            width: state.width,
            height: state.height,
            reconnect_attempts: state.reconnect_attempts,
            last_frame_at: state.last_frame_at,
            rtsp_url: state.rtsp_url,
            error: state.error,
        }
    }
}

/// A running capture thread and its stop flag
struct Worker {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// Lifecycle wrapper around the capture loop
pub struct StreamCaptureEngine {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    encoder: Arc<dyn FrameEncoder>,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for StreamCaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCaptureEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StreamCaptureEngine {
    /// Creates an engine; fails with `InvalidConfig` on a bad backoff policy
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        encoder: Arc<dyn FrameEncoder>,
    ) -> Result<Self, CaptureError> {
        BackoffScheduler::new(config.backoff)?;
        if config.jpeg_quality == 0 || config.jpeg_quality > 100 {
            return Err(CaptureError::InvalidConfig(format!(
                "jpeg_quality must be between 1 and 100, got {}",
                config.jpeg_quality
            )));
        }

        let shared = Arc::new(Shared {
            state: SharedFrameState::with_target(config.target.clone()),
            control: LoopControl::new(config.target.clone()),
        });

        Ok(Self {
            config,
            transport,
            encoder,
            shared,
            worker: Mutex::new(None),
        })
    }

    /// Spawns the capture thread; no-op while one is running
    pub fn start(&self) -> Result<(), CaptureError> {
        let mut worker = self.worker.lock();
        if let Some(running) = worker.as_ref() {
            if !running.handle.is_finished() {
                return Ok(());
            }
        }
        if let Some(finished) = worker.take() {
            if finished.handle.join().is_err() {
                warn!("Previous capture thread panicked");
            }
        }

        let backoff = BackoffScheduler::new(self.config.backoff)?;
        let stop = Arc::new(AtomicBool::new(false));
        let capture = CaptureLoop::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.shared),
            Arc::clone(&stop),
            backoff,
        );

        let handle = thread::Builder::new()
            .name("stream-capture".to_string())
            .spawn(move || capture.run())?;
        *worker = Some(Worker { handle, stop });

        info!(url = %self.target(), "Stream capture engine started");
        Ok(())
    }

    /// Signals the loop to halt and waits up to the grace period for it
    pub fn stop(&self) {
        let Some(Worker { handle, stop }) = self.worker.lock().take() else {
            return;
        };

        self.shared.control.request_stop(&stop);

        let deadline = Instant::now() + self.config.stop_grace;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("Capture thread panicked");
            }
            info!("Stream capture engine stopped");
        } else {
            // Still blocked in the transport; it releases and exits at its
            // next poll point without touching shared state.
            warn!(
                grace = ?self.config.stop_grace,
                "Capture thread did not exit within grace period, detaching"
            );
        }
    }

    /// Drops the current session and connects again, optionally to a new target.
    ///
    /// Returns immediately; the loop picks the request up at its next read
    /// boundary or cuts a backoff sleep short.
    pub fn reconnect(&self, new_target: Option<String>) {
        let new_target = new_target.filter(|t| !t.trim().is_empty());
        info!(
            url = %new_target.as_deref().unwrap_or(&self.target()),
            "Stream reconnect requested"
        );
        self.shared.control.request_reconnect(new_target);
    }

    /// Copy of the latest frame, or `None` before the first one
    pub fn get_frame(&self) -> Option<CapturedFrame> {
        self.shared.state.read_frame()
    }

    /// Latest frame encoded as `format`; `None` without a frame or on encode failure
    pub fn get_encoded_frame(&self, format: ImageFormat, quality: u8) -> Option<Bytes> {
        let frame = self.get_frame()?;
        match self.encoder.encode(&frame, format, quality) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(error = %e, "Frame encoding failed");
                None
            }
        }
    }

    /// Latest frame as JPEG at the configured quality
    pub fn get_jpeg(&self) -> Option<Bytes> {
        self.get_encoded_frame(ImageFormat::Jpeg, self.config.jpeg_quality)
    }

    pub fn get_status(&self) -> StreamStatus {
        StreamStatus::new(self.shared.state.read_status())
    }

    /// Raw connection fields, without rounding
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state.read_status()
    }

    /// Requested camera URL; `get_status` reports the one the loop is on
    pub fn target(&self) -> String {
        self.shared.control.target()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|running| !running.handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for StreamCaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::RasterEncoder;
    use crate::transport::StreamHandle;
    use assert_matches::assert_matches;

    struct Unreachable;

    impl Transport for Unreachable {
        fn open(&self, target: &str) -> Result<Box<dyn StreamHandle>, CaptureError> {
            Err(CaptureError::ConnectionOpen {
                target: target.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    fn engine(config: EngineConfig) -> Result<StreamCaptureEngine, CaptureError> {
        StreamCaptureEngine::new(config, Arc::new(Unreachable), Arc::new(RasterEncoder))
    }

    #[test]
    fn test_rejects_invalid_backoff() {
        let config = EngineConfig {
            backoff: BackoffPolicy {
                initial_delay: 1.0,
                multiplier: 1.0,
                max_delay: 10.0,
            },
            ..Default::default()
        };
        assert_matches!(engine(config), Err(CaptureError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_invalid_quality() {
        let config = EngineConfig {
            jpeg_quality: 0,
            ..Default::default()
        };
        assert_matches!(engine(config), Err(CaptureError::InvalidConfig(_)));
    }

    #[test]
    fn test_status_before_start() {
        let engine = engine(EngineConfig::default()).unwrap();
        let status = engine.get_status();

        assert!(!status.connected);
        assert_eq!(status.rtsp_url, "rtsp://localhost:8554/cam");
        assert!(engine.get_frame().is_none());
        assert!(engine.get_jpeg().is_none());
        assert!(!engine.is_running());
    }

    #[test]
    fn test_reconnect_before_start_swaps_target() {
        let engine = engine(EngineConfig::default()).unwrap();
        engine.reconnect(Some("rtsp://10.0.0.7/stream".to_string()));
        assert_eq!(engine.target(), "rtsp://10.0.0.7/stream");

        engine.reconnect(Some("   ".to_string()));
        assert_eq!(engine.target(), "rtsp://10.0.0.7/stream");
    }

    struct PanicsOnce {
        panicked: std::sync::atomic::AtomicBool,
    }

    impl Transport for PanicsOnce {
        fn open(&self, target: &str) -> Result<Box<dyn StreamHandle>, CaptureError> {
            if !self.panicked.swap(true, std::sync::atomic::Ordering::SeqCst) {
                panic!("transport bug");
            }
            Unreachable.open(target)
        }
    }

    #[test]
    fn test_start_after_panicked_thread() {
        let transport = Arc::new(PanicsOnce {
            panicked: AtomicBool::new(false),
        });
        let engine =
            StreamCaptureEngine::new(EngineConfig::default(), transport, Arc::new(RasterEncoder))
                .unwrap();

        engine.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!engine.is_running());

        // Reaps the panicked thread and spawns a fresh loop
        engine.start().unwrap();
        assert!(engine.is_running());
        while engine.get_status().reconnect_attempts == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(engine.get_status().reconnect_attempts, 1);
        engine.stop();
    }

    #[test]
    fn test_status_rounds_fps() {
        let state = ConnectionState {
            connected: true,
            fps: 14.96,
            width: 640,
            height: 480,
            ..Default::default()
        };
        let status = StreamStatus::new(state);
        assert_eq!(status.fps, 15.0);
    }

    #[test]
    fn test_status_serializes_flat() {
        let status = StreamStatus::new(ConnectionState {
            rtsp_url: "rtsp://cam".to_string(),
            ..Default::default()
        });
        let json = serde_json::to_value(&status).unwrap();

        for key in [
            "connected",
            "fps",
            "width",
            "height",
            "reconnect_attempts",
            "last_frame_at",
            "rtsp_url",
            "error",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json["last_frame_at"].is_null());
    }
}
