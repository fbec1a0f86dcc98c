//! rtc-file-streamer - stream a video file to browsers over WebRTC
//!
//! A browser posts an SDP offer, the server answers and pushes the
//! decoded frames of a local file into the negotiated video track.

pub mod config;
pub mod error;
pub mod state;
pub mod video;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
