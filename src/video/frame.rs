//! Raw video frame and the sink frames are injected into

use async_trait::async_trait;
use bytes::Bytes;

use super::format::{PixelFormat, Resolution};
use crate::error::Result;

/// One uncompressed frame sliced from the decode stream
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Raw pixel data, exactly `format.frame_size(resolution)` bytes
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format
    pub format: PixelFormat,
    /// Position of the frame in the decode stream, starting at 0
    pub sequence: u64,
}

impl RawFrame {
    /// Create a new raw frame
    pub fn new(data: Bytes, resolution: Resolution, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            resolution,
            format,
            sequence,
        }
    }

    /// Get frame data as bytes slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get frame data as Bytes (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Split the frame into its Y, U and V planes
    pub fn planes(&self) -> (&[u8], &[u8], &[u8]) {
        let (y_len, u_len, _) = self.format.plane_sizes(self.resolution);
        let (y, rest) = self.data.split_at(y_len.min(self.data.len()));
        let (u, v) = rest.split_at(u_len.min(rest.len()));
        (y, u, v)
    }
}

/// Raw-frame-injectable video source
///
/// Implemented by the WebRTC video source; the frame pump only talks to
/// this trait.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Hand one frame to the track. Fails with `AppError::Injection`.
    async fn on_frame(&self, frame: &RawFrame) -> Result<()>;

    /// Stop the track. Later `on_frame` calls fail.
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}
