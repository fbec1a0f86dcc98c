//! WebRTC side of the streamer
//!
//! Architecture:
//! ```text
//! Browser ---- POST /webrtc-offer {type, sdp} ----> API Server
//!    ^                                                  |
//!    |                                                  v
//!    |                                            MediaSession
//!    |                                     (negotiate, state machine)
//!    |                                                  |
//!    |                                                  v
//!    |                  ffmpeg -> FramePump -> VideoSource (I420 -> H.264)
//!    |                                                  |
//!    `-------------------- RTP (video track) -----------'
//! ```

pub mod config;
pub mod peer;
pub mod session;
pub mod session_state;
pub mod signaling;
pub mod video_track;

pub use config::{TurnServer, WebRtcConfig};
pub use peer::new_peer_connection;
pub use session::{MediaSession, SessionConfig, DEFAULT_NEGOTIATION_TIMEOUT};
pub use session_state::{SessionEvent, SessionState};
pub use signaling::{ConnectivityStatus, SdpType, SessionDescription};
pub use video_track::{VideoSource, VideoTrackConfig, VideoTrackStats};
