//! Fixed-size framing of the raw decode stream
//!
//! The decoder writes raw I420 pixels to a pipe with no framing at all,
//! so reads come back in arbitrary sizes. The framer accumulates bytes
//! and slices off whole frames:
//!
//! ```text
//! chunk | chunk | chunk ...   (variable size)
//!    |
//!    v
//! BytesMut accumulation buffer
//!    |
//!    v
//! frame | frame | ... + leftover (< frame_size, kept for the next feed)
//! ```

use bytes::{Bytes, BytesMut};

use super::format::FrameGeometry;
use super::frame::RawFrame;

/// Stateful single-consumer slicer of raw bytes into frames
#[derive(Debug)]
pub struct FrameFramer {
    geometry: FrameGeometry,
    frame_size: usize,
    buffer: BytesMut,
    next_sequence: u64,
}

impl FrameFramer {
    /// Create a framer for the given geometry
    pub fn new(geometry: FrameGeometry) -> Self {
        let frame_size = geometry.frame_size();
        Self {
            geometry,
            frame_size,
            buffer: BytesMut::with_capacity(frame_size * 2),
            next_sequence: 0,
        }
    }

    /// Size of every emitted frame in bytes
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Append a chunk and return every frame it completes, in order
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::with_capacity(self.buffer.len() / self.frame_size.max(1));
        while let Some(data) = self.next_frame() {
            frames.push(RawFrame::new(
                data,
                self.geometry.resolution,
                self.geometry.format,
                self.next_sequence,
            ));
            self.next_sequence += 1;
        }
        frames
    }

    fn next_frame(&mut self) -> Option<Bytes> {
        if self.frame_size == 0 || self.buffer.len() < self.frame_size {
            return None;
        }
        Some(self.buffer.split_to(self.frame_size).freeze())
    }

    /// Bytes waiting for the rest of their frame
    pub fn leftover(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of frames emitted so far
    pub fn frames_emitted(&self) -> u64 {
        self.next_sequence
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
