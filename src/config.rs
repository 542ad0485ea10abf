//! Configuration management for the capture service

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::capture::{BackoffPolicy, BackoffScheduler, EngineConfig};
use crate::transport::GstTransportConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Camera source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Camera URL (rtsp://, rtsps://, or any URI GStreamer can decode)
    #[serde(default = "default_url")]
    pub url: String,

    /// JPEG quality for snapshots and the MJPEG feed (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Time allowed for a connection to produce its first frame
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,

    /// Silence after which a connected stream counts as dropped
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// RTSP jitter buffer latency
    #[serde(default)]
    pub latency_ms: u32,

    /// RTSP lower transport
    /// - "tcp"
    /// - "udp"
    /// - "tcp+udp"
    #[serde(default = "default_rtsp_protocols")]
    pub rtsp_protocols: String,

    /// How long shutdown waits for the capture thread
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            jpeg_quality: default_jpeg_quality(),
            open_timeout_ms: default_open_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            latency_ms: 0,
            rtsp_protocols: default_rtsp_protocols(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

/// Reconnect backoff, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: f64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Frame rate of the multipart MJPEG feed
    #[serde(default = "default_mjpeg_fps")]
    pub mjpeg_fps: u32,

    /// Seconds between WebSocket status pushes
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            port: default_port(),
            mjpeg_fps: default_mjpeg_fps(),
            status_interval_secs: default_status_interval(),
        }
    }
}

// Default value functions
fn default_url() -> String {
    "rtsp://localhost:8554/cam".to_string()
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_open_timeout_ms() -> u64 {
    10_000
}
fn default_read_timeout_ms() -> u64 {
    5_000
}
fn default_rtsp_protocols() -> String {
    "tcp".to_string()
}
fn default_stop_grace_ms() -> u64 {
    5_000
}
fn default_initial_delay() -> f64 {
    1.0
}
fn default_multiplier() -> f64 {
    1.5
}
fn default_max_delay() -> f64 {
    10.0
}
fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_mjpeg_fps() -> u32 {
    15
}
fn default_status_interval() -> u64 {
    2
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Loads configuration from TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let stream = &self.stream;

        if stream.url.trim().is_empty() {
            return Err(ConfigError::Invalid("stream.url must not be empty".to_string()));
        }

        if stream.jpeg_quality == 0 || stream.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "stream.jpeg_quality must be between 1 and 100, got {}",
                stream.jpeg_quality
            )));
        }

        if stream.open_timeout_ms == 0 || stream.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "stream timeouts must be > 0".to_string(),
            ));
        }

        if !matches!(stream.rtsp_protocols.as_str(), "tcp" | "udp" | "tcp+udp") {
            return Err(ConfigError::Invalid(format!(
                "stream.rtsp_protocols must be tcp, udp or tcp+udp, got {:?}",
                stream.rtsp_protocols
            )));
        }

        BackoffScheduler::new(self.backoff_policy())
            .map_err(|e| ConfigError::Invalid(format!("reconnect: {}", e)))?;

        if self.server.mjpeg_fps == 0 || self.server.mjpeg_fps > 60 {
            return Err(ConfigError::Invalid(format!(
                "server.mjpeg_fps must be between 1 and 60, got {}",
                self.server.mjpeg_fps
            )));
        }

        if self.server.status_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.status_interval_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: self.reconnect.initial_delay_secs,
            multiplier: self.reconnect.multiplier,
            max_delay: self.reconnect.max_delay_secs,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            target: self.stream.url.clone(),
            backoff: self.backoff_policy(),
            stop_grace: Duration::from_millis(self.stream.stop_grace_ms),
            jpeg_quality: self.stream.jpeg_quality,
        }
    }

    pub fn transport_config(&self) -> GstTransportConfig {
        GstTransportConfig {
            latency_ms: self.stream.latency_ms,
            rtsp_protocols: self.stream.rtsp_protocols.clone(),
            open_timeout: Duration::from_millis(self.stream.open_timeout_ms),
            read_timeout: Duration::from_millis(self.stream.read_timeout_ms),
        }
    }
}
