//! Raw-frame-injectable video track
//!
//! # Architecture
//!
//! ```text
//! RawFrame (I420)
//!        |
//!        v
//! openh264 Encoder (software H.264, Annex B)
//!        |
//!        v
//! TrackLocalStaticSample (built-in H.264 payloader)
//!        |
//!        v
//! WebRTC PeerConnection
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate};
use openh264::formats::YUVSource;
use openh264::OpenH264API;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::media::Sample;
use webrtc::rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::{AppError, Result};
use crate::video::format::FrameGeometry;
use crate::video::frame::{FrameSink, RawFrame};

/// H.264 constrained baseline, what openh264 produces
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// Default H.264 target bitrate
pub const DEFAULT_BITRATE_KBPS: u32 = 1000;

/// Video track configuration
#[derive(Debug, Clone)]
pub struct VideoTrackConfig {
    /// Track ID
    pub track_id: String,
    /// Stream ID
    pub stream_id: String,
    /// Frame geometry of injected frames
    pub geometry: FrameGeometry,
    /// Target bitrate in kbps
    pub bitrate_kbps: u32,
}

impl VideoTrackConfig {
    pub fn new(geometry: FrameGeometry) -> Self {
        Self {
            track_id: "video0".to_string(),
            stream_id: "rtc-file-streamer".to_string(),
            geometry,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
        }
    }

    /// openh264 settings matching the configured rate and bitrate
    fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig::new()
            .bitrate(BitRate::from_bps(self.bitrate_kbps.saturating_mul(1000)))
            .max_frame_rate(FrameRate::from_hz(self.geometry.fps as f32))
    }
}

/// Track statistics
#[derive(Debug, Clone, Default)]
pub struct VideoTrackStats {
    /// Frames written to the track
    pub frames_sent: u64,
    /// Encoded bytes written to the track
    pub bytes_sent: u64,
    /// Keyframes forced by the peer or on connect
    pub keyframes_requested: u64,
}

/// Borrowed I420 planes in the layout openh264 expects
struct I420Planes<'a> {
    width: usize,
    height: usize,
    y: &'a [u8],
    u: &'a [u8],
    v: &'a [u8],
}

impl YUVSource for I420Planes<'_> {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn strides(&self) -> (usize, usize, usize) {
        (self.width, self.width / 2, self.width / 2)
    }

    fn y(&self) -> &[u8] {
        self.y
    }

    fn u(&self) -> &[u8] {
        self.u
    }

    fn v(&self) -> &[u8] {
        self.v
    }
}

/// Outbound video track fed with raw frames
pub struct VideoSource {
    config: VideoTrackConfig,
    track: Arc<TrackLocalStaticSample>,
    /// Created on the first frame
    encoder: Mutex<Option<Encoder>>,
    frame_duration: Duration,
    keyframe_requested: AtomicBool,
    stopped: AtomicBool,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    keyframes_requested: AtomicU64,
}

impl VideoSource {
    pub fn new(config: VideoTrackConfig) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: H264_FMTP.to_string(),
            rtcp_feedback: vec![],
        };

        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            config.track_id.clone(),
            config.stream_id.clone(),
        ));

        Self {
            frame_duration: config.geometry.frame_duration(),
            config,
            track,
            encoder: Mutex::new(None),
            keyframe_requested: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            keyframes_requested: AtomicU64::new(0),
        }
    }

    /// Get the underlying sample track
    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    /// Make the next encoded frame an IDR
    pub fn request_keyframe(&self) {
        self.keyframe_requested.store(true, Ordering::Release);
        self.keyframes_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> VideoTrackStats {
        VideoTrackStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            keyframes_requested: self.keyframes_requested.load(Ordering::Relaxed),
        }
    }

    /// Drain RTCP from the sender, forcing a keyframe on PLI/FIR
    ///
    /// Returns when the sender is closed.
    pub async fn read_rtcp(self: Arc<Self>, sender: Arc<RTCRtpSender>) {
        while let Ok((packets, _)) = sender.read_rtcp().await {
            for packet in packets {
                let any = packet.as_any();
                if any.downcast_ref::<PictureLossIndication>().is_some()
                    || any.downcast_ref::<FullIntraRequest>().is_some()
                {
                    debug!("Keyframe requested by peer on {}", self.config.track_id);
                    self.request_keyframe();
                }
            }
        }
        debug!("RTCP reader for {} stopped", self.config.track_id);
    }

    fn encode(&self, frame: &RawFrame) -> Result<Bytes> {
        let expected = frame.format.frame_size(frame.resolution);
        if frame.len() != expected {
            return Err(AppError::Injection(format!(
                "Frame {} has {} bytes, expected {}",
                frame.sequence,
                frame.len(),
                expected
            )));
        }

        let mut guard = self.encoder.lock();
        if guard.is_none() {
            let encoder =
                Encoder::with_api_config(OpenH264API::from_source(), self.config.encoder_config())
                    .map_err(|e| {
                        AppError::Injection(format!("Failed to create H264 encoder: {}", e))
                    })?;
            info!(
                "H264 encoder created for {} ({}, {} kbps)",
                self.config.track_id, self.config.geometry, self.config.bitrate_kbps
            );
            *guard = Some(encoder);
        }
        let encoder = guard
            .as_mut()
            .ok_or_else(|| AppError::Injection("H264 encoder unavailable".to_string()))?;

        if self.keyframe_requested.swap(false, Ordering::AcqRel) {
            encoder.force_intra_frame();
        }

        let (y, u, v) = frame.planes();
        let planes = I420Planes {
            width: frame.width() as usize,
            height: frame.height() as usize,
            y,
            u,
            v,
        };

        let bitstream = encoder
            .encode(&planes)
            .map_err(|e| AppError::Injection(format!("H264 encode failed: {}", e)))?;

        Ok(Bytes::from(bitstream.to_vec()))
    }
}

#[async_trait]
impl FrameSink for VideoSource {
    async fn on_frame(&self, frame: &RawFrame) -> Result<()> {
        if self.is_stopped() {
            return Err(AppError::Injection("Video track stopped".to_string()));
        }

        let data = self.encode(frame)?;
        if data.is_empty() {
            // Encoder skipped the frame (rate control)
            return Ok(());
        }
        let len = data.len() as u64;

        let sample = Sample {
            data,
            duration: self.frame_duration,
            ..Default::default()
        };

        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| AppError::Injection(format!("write_sample failed: {}", e)))?;

        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            info!("Video track {} stopped", self.config.track_id);
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::{PixelFormat, Resolution};

    fn source() -> VideoSource {
        VideoSource::new(VideoTrackConfig::new(FrameGeometry::new(
            Resolution::new(16, 16),
            30,
        )))
    }

    fn gray_frame(sequence: u64) -> RawFrame {
        let res = Resolution::new(16, 16);
        let data = vec![128u8; PixelFormat::I420.frame_size(res)];
        RawFrame::new(Bytes::from(data), res, PixelFormat::I420, sequence)
    }

    #[tokio::test]
    async fn test_frames_accepted_before_connection() {
        // Unbound track: samples are encoded and silently discarded
        let source = source();
        source.on_frame(&gray_frame(0)).await.unwrap();
        source.on_frame(&gray_frame(1)).await.unwrap();
        assert!(!source.is_stopped());
    }

    #[tokio::test]
    async fn test_injection_fails_after_stop() {
        let source = source();
        source.stop();
        source.stop();

        let result = source.on_frame(&gray_frame(0)).await;
        assert!(matches!(result, Err(AppError::Injection(_))));
        assert_eq!(source.stats().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_wrong_size_frame_rejected() {
        let source = source();
        let frame = RawFrame::new(
            Bytes::from(vec![0u8; 10]),
            Resolution::new(16, 16),
            PixelFormat::I420,
            0,
        );
        assert!(matches!(
            source.on_frame(&frame).await,
            Err(AppError::Injection(_))
        ));
    }

    #[test]
    fn test_track_config_defaults() {
        let config = VideoTrackConfig::new(FrameGeometry::new(Resolution::new(16, 16), 15));
        assert_eq!(config.bitrate_kbps, DEFAULT_BITRATE_KBPS);
        assert_eq!(config.geometry.fps, 15);
    }

    #[tokio::test]
    async fn test_configured_encoder_encodes_frames() {
        let mut config = VideoTrackConfig::new(FrameGeometry::new(Resolution::new(16, 16), 15));
        config.bitrate_kbps = 300;
        let source = VideoSource::new(config);

        source.request_keyframe();
        let encoded = source.encode(&gray_frame(0)).unwrap();
        assert!(!encoded.is_empty());
    }

    #[test]
    fn test_keyframe_request_counted() {
        let source = source();
        source.request_keyframe();
        assert_eq!(source.stats().keyframes_requested, 1);
        assert!(source.keyframe_requested.load(Ordering::Acquire));
    }
}
