//! Pixel format and frame geometry definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw pixel formats understood by the pipeline
///
/// The decoder is always asked for planar 4:2:0, so this is the only
/// layout frames are sliced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// YUV 4:2:0 planar (I420): full Y plane followed by quarter-size U and V planes
    #[default]
    I420,
}

impl PixelFormat {
    /// Name of the format as ffmpeg's `-pix_fmt` expects it
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::I420 => "yuv420p",
        }
    }

    /// Calculate the size in bytes of one frame at the given resolution
    pub fn frame_size(&self, resolution: Resolution) -> usize {
        let pixels = resolution.pixels() as usize;
        match self {
            PixelFormat::I420 => pixels * 3 / 2,
        }
    }

    /// Byte ranges of the Y, U and V planes inside one frame
    pub fn plane_sizes(&self, resolution: Resolution) -> (usize, usize, usize) {
        let luma = resolution.pixels() as usize;
        match self {
            PixelFormat::I420 => (luma, luma / 4, luma / 4),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::I420 => "I420",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "I420" | "YUV420" | "YUV420P" => Ok(PixelFormat::I420),
            _ => Err(format!("Unsupported pixel format: {}", s)),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check if resolution is usable for 4:2:0 frames
    ///
    /// Both dimensions must be even so the chroma planes are exactly a
    /// quarter of the luma plane.
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.width % 2 == 0
            && self.height % 2 == 0
            && self.width <= 15360
            && self.height <= 8640
    }

    /// Get total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Output geometry requested from the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub resolution: Resolution,
    pub format: PixelFormat,
    pub fps: u32,
}

impl FrameGeometry {
    pub fn new(resolution: Resolution, fps: u32) -> Self {
        Self {
            resolution,
            format: PixelFormat::I420,
            fps,
        }
    }

    /// Bytes per frame (`width * height * 1.5` for I420)
    pub fn frame_size(&self) -> usize {
        self.format.frame_size(self.resolution)
    }

    /// Nominal duration of one frame
    pub fn frame_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    pub fn is_valid(&self) -> bool {
        self.resolution.is_valid() && self.fps > 0
    }
}

impl fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @ {}fps", self.resolution, self.format, self.fps)
    }
}
