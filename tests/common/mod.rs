//! Scripted in-memory transport for engine tests

#![allow(dead_code)]

use parking_lot::Mutex;
use rtsp_watcher::{
    BackoffPolicy, CaptureError, CapturedFrame, EngineConfig, RasterEncoder, StreamCaptureEngine,
    StreamHandle, Transport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Per-target behaviour
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub width: u32,
    pub height: u32,
    /// Fail the read after this many frames
    pub fail_after: Option<usize>,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fail_after: None,
        }
    }

    pub fn flaky(width: u32, height: u32, fail_after: usize) -> Self {
        Self {
            width,
            height,
            fail_after: Some(fail_after),
        }
    }
}

/// Counters shared between the transport and its handles
#[derive(Debug, Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub failed_opens: AtomicUsize,
    pub open_handles: AtomicUsize,
    pub max_open_handles: AtomicUsize,
    pub releases: AtomicUsize,
}

impl Counters {
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn failed_opens(&self) -> usize {
        self.failed_opens.load(Ordering::SeqCst)
    }
}

/// Targets not in `cameras` refuse connections
pub struct ScriptedTransport {
    cameras: Mutex<HashMap<String, Camera>>,
    frame_interval: Duration,
    open_delay: Duration,
    pub counters: Arc<Counters>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            cameras: Mutex::new(HashMap::new()),
            frame_interval: Duration::from_millis(5),
            open_delay: Duration::from_millis(10),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_camera(self, target: &str, camera: Camera) -> Self {
        self.cameras.lock().insert(target.to_string(), camera);
        self
    }

    pub fn add_camera(&self, target: &str, camera: Camera) {
        self.cameras.lock().insert(target.to_string(), camera);
    }

    pub fn remove_camera(&self, target: &str) {
        self.cameras.lock().remove(target);
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, target: &str) -> Result<Box<dyn StreamHandle>, CaptureError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);

        let Some(camera) = self.cameras.lock().get(target).copied() else {
            self.counters.failed_opens.fetch_add(1, Ordering::SeqCst);
            return Err(CaptureError::ConnectionOpen {
                target: target.to_string(),
                reason: "connection refused".to_string(),
            });
        };

        // Gives observers a visible disconnected window during reconnects
        thread::sleep(self.open_delay);

        let now_open = self.counters.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .max_open_handles
            .fetch_max(now_open, Ordering::SeqCst);

        Ok(Box::new(ScriptedHandle {
            camera,
            reads: 0,
            frame_interval: self.frame_interval,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ScriptedHandle {
    camera: Camera,
    reads: usize,
    frame_interval: Duration,
    counters: Arc<Counters>,
}

impl StreamHandle for ScriptedHandle {
    fn read(&mut self) -> Result<CapturedFrame, CaptureError> {
        thread::sleep(self.frame_interval);

        if let Some(limit) = self.camera.fail_after {
            if self.reads >= limit {
                return Err(CaptureError::FrameRead("stream interrupted".to_string()));
            }
        }
        self.reads += 1;

        let Camera { width, height, .. } = self.camera;
        let data = vec![(self.reads % 256) as u8; CapturedFrame::expected_len(width, height)];
        CapturedFrame::from_rgb(width, height, data)
            .ok_or_else(|| CaptureError::FrameRead("bad frame".to_string()))
    }

    fn release(self: Box<Self>) {
        self.counters.open_handles.fetch_sub(1, Ordering::SeqCst);
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fast backoff so tests don't wait on real delays
pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: 0.01,
        multiplier: 2.0,
        max_delay: 0.05,
    }
}

pub fn engine_config(target: &str) -> EngineConfig {
    EngineConfig {
        target: target.to_string(),
        backoff: fast_backoff(),
        stop_grace: Duration::from_secs(2),
        jpeg_quality: 80,
    }
}

pub fn engine(config: EngineConfig, transport: Arc<ScriptedTransport>) -> StreamCaptureEngine {
    StreamCaptureEngine::new(config, transport, Arc::new(RasterEncoder)).unwrap()
}

/// Polls `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
