//! Latest-frame store shared between the capture thread and readers

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::fps::FpsEstimator;
use super::frame::CapturedFrame;

/// Connection and health fields of one stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub reconnect_attempts: u32,
    pub last_frame_at: Option<DateTime<Utc>>,
    /// Target the loop is connected to or retrying
    pub rtsp_url: String,
    pub error: Option<String>,
}

struct Inner {
    frame: Option<CapturedFrame>,
    status: ConnectionState,
    fps: FpsEstimator,
}

impl Inner {
    fn store(&mut self, frame: CapturedFrame) {
        self.fps.record(frame.arrived_at);

        let fps = self.fps.current_fps();
        let status = &mut self.status;
        status.width = frame.width;
        status.height = frame.height;
        status.fps = fps;
        status.last_frame_at = Some(frame.captured_at);

        self.frame = Some(frame);
    }

    fn disconnect(&mut self, target: &str) {
        self.fps.clear();

        let status = &mut self.status;
        status.connected = false;
        status.fps = 0.0;
        if status.rtsp_url != target {
            status.rtsp_url = target.to_string();
        }
    }
}

/// Single-writer, multi-reader frame and status record.
///
/// Every accessor copies in or out under one mutex, so a reader never sees
/// a frame paired with the dimensions of another one, or a target paired
/// with another session's connection fields. Nothing in here does I/O while
/// the lock is held.
pub struct SharedFrameState {
    inner: Mutex<Inner>,
}

impl Default for SharedFrameState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedFrameState {
    pub fn new() -> Self {
        Self::with_target(String::new())
    }

    /// Empty store reporting `target` until the loop records another one
    pub fn with_target(target: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                frame: None,
                status: ConnectionState {
                    rtsp_url: target.into(),
                    ..Default::default()
                },
                fps: FpsEstimator::new(),
            }),
        }
    }

    /// Stores a new frame together with its dimensions, the updated rate and arrival time
    pub fn write_frame(&self, frame: CapturedFrame) {
        self.inner.lock().store(frame);
    }

    /// Transition into the connected state on `target`, publishing its first frame.
    ///
    /// Status never shows `connected` for a session whose dimensions are
    /// still those of the previous one.
    pub fn mark_connected(&self, target: &str, first: CapturedFrame) {
        let mut inner = self.inner.lock();
        inner.fps.clear();

        let status = &mut inner.status;
        status.connected = true;
        status.error = None;
        status.reconnect_attempts = 0;
        if status.rtsp_url != target {
            status.rtsp_url = target.to_string();
        }

        inner.store(first);
    }

    /// Records a failed open or read on `target`.
    ///
    /// `count_attempt` is set for failed opens so the attempt counter grows
    /// once per connection attempt; a dropped session only reports the error.
    pub fn mark_failed(&self, target: &str, error: impl Into<String>, count_attempt: bool) -> u32 {
        let mut inner = self.inner.lock();
        inner.disconnect(target);

        let status = &mut inner.status;
        status.error = Some(error.into());
        if count_attempt {
            status.reconnect_attempts = status.reconnect_attempts.saturating_add(1);
        }
        status.reconnect_attempts
    }

    /// Operator-initiated drop towards `target`: no error and no attempt history
    pub fn mark_reconnecting(&self, target: &str) {
        let mut inner = self.inner.lock();
        inner.disconnect(target);

        let status = &mut inner.status;
        status.error = None;
        status.reconnect_attempts = 0;
    }

    /// Independent copy of the latest frame
    pub fn read_frame(&self) -> Option<CapturedFrame> {
        self.inner.lock().frame.clone()
    }

    /// Consistent copy of the connection fields
    pub fn read_status(&self) -> ConnectionState {
        self.inner.lock().status.clone()
    }

    pub fn has_frame(&self) -> bool {
        self.inner.lock().frame.is_some()
    }
}
