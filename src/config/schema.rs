use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::video::decoder::DecoderSettings;
use crate::video::format::{FrameGeometry, Resolution};
use crate::webrtc::WebRtcConfig;

/// Upper bound for `session.max_sessions`
pub const MAX_SESSIONS_LIMIT: usize = 1024;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Source video and decoder settings
    pub video: VideoConfig,
    /// ICE server settings
    pub webrtc: WebRtcConfig,
    /// Session limits
    pub session: SessionLimits,
}

impl AppConfig {
    /// Check values that would only fail later, per session
    pub fn validate(&self) -> Result<()> {
        if self.web.http_port == 0 {
            return Err(AppError::Config("HTTP port must be non-zero".to_string()));
        }
        if self.video.file.trim().is_empty() {
            return Err(AppError::Config("Video file name is empty".to_string()));
        }
        if !self.video.geometry().is_valid() {
            return Err(AppError::Config(format!(
                "Invalid video geometry {}x{}@{}: width and height must be even and non-zero, fps non-zero",
                self.video.width, self.video.height, self.video.fps
            )));
        }
        if self.video.progress_interval == 0 {
            return Err(AppError::Config(
                "Progress interval must be non-zero".to_string(),
            ));
        }
        if self.video.bitrate_kbps == 0 {
            return Err(AppError::Config("Bitrate must be non-zero".to_string()));
        }
        if self.session.max_sessions == 0 || self.session.max_sessions > MAX_SESSIONS_LIMIT {
            return Err(AppError::Config(format!(
                "Maximum sessions must be between 1 and {}",
                MAX_SESSIONS_LIMIT
            )));
        }
        if self.session.negotiation_timeout_ms == 0 {
            return Err(AppError::Config(
                "Negotiation timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP port
    pub http_port: u16,
    /// Bind address
    pub bind_address: String,
    /// Directory served for unmatched GET requests
    pub static_dir: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_port: 3000,
            bind_address: "0.0.0.0".to_string(),
            static_dir: "public".to_string(),
        }
    }
}

/// Source video configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Directory holding the source video, created at startup
    pub dir: String,
    /// File streamed to every session
    pub file: String,
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Output frame rate
    pub fps: u32,
    /// ffmpeg executable
    pub ffmpeg_path: String,
    /// ffmpeg `-loglevel`
    pub ffmpeg_log_level: String,
    /// Frames between progress logs
    pub progress_interval: u64,
    /// H.264 target bitrate in kbps
    pub bitrate_kbps: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            dir: "videos".to_string(),
            file: "test.mp4".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            ffmpeg_path: "ffmpeg".to_string(),
            ffmpeg_log_level: "error".to_string(),
            progress_interval: 100,
            bitrate_kbps: 1000,
        }
    }
}

impl VideoConfig {
    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }

    /// Full path of the streamed file
    pub fn video_path(&self) -> PathBuf {
        self.dir_path().join(&self.file)
    }

    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(Resolution::new(self.width, self.height), self.fps)
    }

    pub fn decoder_settings(&self) -> DecoderSettings {
        let mut settings = DecoderSettings::new(&self.ffmpeg_path, self.geometry());
        settings.log_level = self.ffmpeg_log_level.clone();
        settings
    }
}

/// Session limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// Concurrent sessions before the endpoint answers 503
    pub max_sessions: usize,
    /// Bound on the offer/answer exchange in milliseconds
    pub negotiation_timeout_ms: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: 8,
            negotiation_timeout_ms: 10_000,
        }
    }
}

impl SessionLimits {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }
}
