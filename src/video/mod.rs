//! Video decode and framing module
//!
//! This module turns a media file into paced raw I420 frames:
//!
//! ```text
//! media file -> FfmpegDecoder (raw bytes) -> FrameFramer (fixed frames) -> FramePump -> FrameSink
//! ```

pub mod decoder;
pub mod format;
pub mod frame;
pub mod framer;
pub mod pump;

pub use decoder::{DecodeStream, DecoderSettings, FfmpegDecoder};
pub use format::{FrameGeometry, PixelFormat, Resolution};
pub use frame::{FrameSink, RawFrame};
pub use framer::FrameFramer;
pub use pump::{FramePump, PumpExit, PumpReport};
