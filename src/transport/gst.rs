//! GStreamer-backed camera transport

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use gstreamer_video::prelude::*;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{StreamHandle, Transport};
use crate::capture::{CaptureError, CapturedFrame, RGB_BYTES_PER_PIXEL};

/// Transport configuration
#[derive(Debug, Clone)]
pub struct GstTransportConfig {
    /// RTSP jitter buffer latency
    pub latency_ms: u32,
    /// Lower transports offered to `rtspsrc` ("tcp", "udp", "tcp+udp")
    pub rtsp_protocols: String,
    /// How long to wait for the first decoded frame after opening
    pub open_timeout: Duration,
    /// How long a connected session may stay silent before it counts as dropped
    pub read_timeout: Duration,
}

impl Default for GstTransportConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            rtsp_protocols: "tcp".to_string(),
            open_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// Decodes any URI GStreamer understands into RGB frames
pub struct GstTransport {
    config: GstTransportConfig,
}

impl GstTransport {
    /// Creates a transport, initializing GStreamer
    pub fn new(config: GstTransportConfig) -> Result<Self, CaptureError> {
        gst::init()?;
        Ok(Self { config })
    }

    /// Builds GStreamer pipeline string
    fn build_pipeline_string(&self, target: &str) -> String {
        let source = if is_rtsp(target) {
            format!(
                "rtspsrc location=\"{}\" latency={} protocols={} ! decodebin",
                target, self.config.latency_ms, self.config.rtsp_protocols
            )
        } else {
            format!("uridecodebin uri=\"{}\"", target)
        };

        // One buffered frame, dropped in favour of the newest
        format!(
            "{} ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink max-buffers=1 drop=true sync=false",
            source
        )
    }
}

impl Transport for GstTransport {
    fn open(&self, target: &str) -> Result<Box<dyn StreamHandle>, CaptureError> {
        let open_error = |reason: String| CaptureError::ConnectionOpen {
            target: target.to_string(),
            reason,
        };

        if target.is_empty() || target.contains('"') {
            return Err(open_error("malformed target".to_string()));
        }

        let pipeline_desc = self.build_pipeline_string(target);
        debug!(pipeline = %pipeline_desc, "Creating GStreamer pipeline");

        let pipeline = gst::parse::launch(&pipeline_desc)
            .map_err(|e| open_error(e.to_string()))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| open_error("not a pipeline".to_string()))?;

        let sink = pipeline
            .by_name("sink")
            .ok_or_else(|| open_error("no appsink found".to_string()))?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| open_error("not an appsink".to_string()))?;

        let mut handle = GstHandle {
            pipeline,
            sink,
            pending: None,
            read_timeout: self.config.read_timeout,
        };

        handle
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| open_error(format!("{:?}", e)))?;

        // Live sources report success before anything connects, so the
        // session only counts as open once a frame decodes.
        let first = handle
            .pull(self.config.open_timeout)
            .map_err(open_error)?;
        info!(
            url = %target,
            resolution = %format!("{}x{}", first.width, first.height),
            "Stream opened"
        );
        handle.pending = Some(first);

        Ok(Box::new(handle))
    }
}

/// An open pipeline; set back to NULL when released or dropped
struct GstHandle {
    pipeline: gst::Pipeline,
    sink: gst_app::AppSink,
    pending: Option<CapturedFrame>,
    read_timeout: Duration,
}

impl GstHandle {
    fn pull(&self, timeout: Duration) -> Result<CapturedFrame, String> {
        let timeout_ms = timeout.as_millis() as u64;

        match self
            .sink
            .try_pull_sample(gst::ClockTime::from_mseconds(timeout_ms))
        {
            Some(sample) => sample_to_frame(&sample),
            None => {
                if let Some(error) = self.bus_error() {
                    Err(error)
                } else if self.sink.is_eos() {
                    Err("end of stream".to_string())
                } else {
                    Err(format!("no frame within {} ms", timeout_ms))
                }
            }
        }
    }

    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(err) = msg.view() {
                return Some(err.error().to_string());
            }
        }
        None
    }
}

impl StreamHandle for GstHandle {
    fn read(&mut self) -> Result<CapturedFrame, CaptureError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.pull(self.read_timeout).map_err(CaptureError::FrameRead)
    }

    fn release(self: Box<Self>) {
        debug!("Releasing GStreamer pipeline");
        // Drop does the teardown
    }
}

impl Drop for GstHandle {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(error = ?e, "Failed to set pipeline to NULL");
        }
    }
}

fn is_rtsp(target: &str) -> bool {
    let lower = target.to_ascii_lowercase();
    lower.starts_with("rtsp://") || lower.starts_with("rtsps://") || lower.starts_with("rtspt://")
}

/// Copies a sample into a tightly packed RGB frame, dropping row padding
fn sample_to_frame(sample: &gst::Sample) -> Result<CapturedFrame, String> {
    let caps = sample.caps().ok_or("sample without caps")?;
    let info = gst_video::VideoInfo::from_caps(caps).map_err(|e| e.to_string())?;
    let buffer = sample.buffer().ok_or("sample without buffer")?;

    let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)
        .map_err(|e| e.to_string())?;
    let width = frame.width();
    let height = frame.height();
    let stride = frame.plane_stride()[0] as usize;
    let plane = frame.plane_data(0).map_err(|e| e.to_string())?;

    let row_len = width as usize * RGB_BYTES_PER_PIXEL;
    if stride < row_len {
        return Err(format!("stride {} shorter than row {}", stride, row_len));
    }

    let mut data = Vec::with_capacity(row_len * height as usize);
    for row in plane.chunks(stride).take(height as usize) {
        let pixels = row.get(..row_len).ok_or("short final row")?;
        data.extend_from_slice(pixels);
    }

    CapturedFrame::from_rgb(width, height, data)
        .ok_or_else(|| format!("truncated {}x{} frame", width, height))
}
