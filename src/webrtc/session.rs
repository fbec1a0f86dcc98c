//! Media session: one peer connection, one outbound video track
//!
//! A session is created per offer. After a successful negotiation the
//! session is moved into a background task (`supervise`) which owns the
//! frame pump and reacts to connectivity changes:
//!
//! ```text
//! ICE callback --mpsc--> supervise() --on_connectivity_change()--> state machine
//!                            |                                          |
//!                       FramePump task <---- CancellationToken ---- release()
//! ```
//!
//! Teardown (`release`) runs exactly once, whichever path gets there first.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

use super::config::WebRtcConfig;
use super::peer::new_peer_connection;
use super::session_state::{SessionEvent, SessionState};
use super::signaling::{ConnectivityStatus, SdpType, SessionDescription};
use super::video_track::{VideoSource, VideoTrackConfig, DEFAULT_BITRATE_KBPS};
use crate::error::{AppError, Result};
use crate::video::decoder::{DecodeStream, DecoderSettings, FfmpegDecoder};
use crate::video::format::FrameGeometry;
use crate::video::frame::FrameSink;
use crate::video::pump::{FramePump, PumpExit, DEFAULT_PROGRESS_INTERVAL};

/// Default bound on the offer/answer exchange including ICE gathering
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub webrtc: WebRtcConfig,
    pub geometry: FrameGeometry,
    pub negotiation_timeout: Duration,
    pub progress_interval: u64,
    /// H.264 target bitrate
    pub bitrate_kbps: u32,
}

impl SessionConfig {
    pub fn new(webrtc: WebRtcConfig, geometry: FrameGeometry) -> Self {
        Self {
            webrtc,
            geometry,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
        }
    }
}

/// Closes a session whose negotiation was dropped before it finished
struct NegotiationGuard {
    session: Option<Arc<MediaSession>>,
}

impl NegotiationGuard {
    fn disarm(mut self) {
        self.session = None;
    }
}

impl Drop for NegotiationGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        warn!(
            "Session {} negotiation abandoned, closing",
            session.session_id
        );
        // Synchronous part of the teardown, the transport is closed below
        session.cancel.cancel();
        session.video.stop();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    session.close().await;
                });
            }
            Err(_) => {
                session.transition(SessionEvent::Close);
            }
        }
    }
}

/// One peer connection's lifecycle
pub struct MediaSession {
    session_id: String,
    pc: Arc<RTCPeerConnection>,
    video: Arc<VideoSource>,
    geometry: FrameGeometry,
    negotiation_timeout: Duration,
    progress_interval: u64,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    negotiation_started: AtomicBool,
    released: AtomicBool,
    /// Taken by `supervise`
    events: Mutex<Option<mpsc::UnboundedReceiver<ConnectivityStatus>>>,
}

impl MediaSession {
    /// Create the transport and attach the outbound video track
    ///
    /// `cancel` is normally a child of the server's shutdown token.
    pub async fn new(config: &SessionConfig, cancel: CancellationToken) -> Result<Arc<Self>> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let pc = new_peer_connection(&config.webrtc).await?;

        let mut track_config = VideoTrackConfig::new(config.geometry);
        track_config.bitrate_kbps = config.bitrate_kbps;
        let video = Arc::new(VideoSource::new(track_config));
        let sender = match pc
            .add_track(video.track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                let _ = pc.close().await;
                return Err(AppError::WebRtc(format!("Failed to add video track: {}", e)));
            }
        };
        tokio::spawn(video.clone().read_rtcp(sender));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sid = session_id.clone();
        pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
            info!("Session {} ICE state: {}", sid, s);
            if let Some(status) = ConnectivityStatus::from_ice(s) {
                let _ = events_tx.send(status);
            }
            Box::pin(async {})
        }));

        let (state, _) = watch::channel(SessionState::Negotiating);

        info!("Session {} created", session_id);

        Ok(Arc::new(Self {
            session_id,
            pc,
            video,
            geometry: config.geometry,
            negotiation_timeout: config.negotiation_timeout,
            progress_interval: config.progress_interval,
            state,
            cancel,
            negotiation_started: AtomicBool::new(false),
            released: AtomicBool::new(false),
            events: Mutex::new(Some(events_rx)),
        }))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The raw-frame sink backing the outbound track
    pub fn video(&self) -> Arc<VideoSource> {
        self.video.clone()
    }

    /// Apply the remote offer and return the local answer
    ///
    /// May be called once. On failure the session moves to `Failed` and
    /// its resources are released. If the returned future is dropped
    /// before it completes, the session is closed.
    pub async fn negotiate(self: &Arc<Self>, offer: SessionDescription) -> Result<SessionDescription> {
        if self.negotiation_started.swap(true, Ordering::AcqRel) {
            return Err(AppError::Negotiation(
                "Session already negotiated".to_string(),
            ));
        }

        let guard = NegotiationGuard {
            session: Some(self.clone()),
        };

        let result = match tokio::time::timeout(self.negotiation_timeout, self.apply_offer(offer))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Negotiation(format!(
                "Timed out after {}ms",
                self.negotiation_timeout.as_millis()
            ))),
        };

        match result {
            Ok(answer) => {
                guard.disarm();
                self.transition(SessionEvent::Negotiated);
                Ok(answer)
            }
            Err(e) => {
                guard.disarm();
                warn!("Session {} negotiation failed: {}", self.session_id, e);
                self.transition(SessionEvent::NegotiationFailed);
                self.release().await;
                Err(e)
            }
        }
    }

    async fn apply_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        if offer.kind != SdpType::Offer {
            return Err(AppError::Negotiation(format!(
                "Expected an offer, got {}",
                offer.kind
            )));
        }

        let remote = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| AppError::Negotiation(format!("Invalid SDP offer: {}", e)))?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set remote description: {}", e)))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create answer: {}", e)))?;

        // Signaling is not trickled, so the answer must carry every candidate
        let mut gathering_complete = self.pc.gathering_complete_promise().await;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set local description: {}", e)))?;

        let _ = gathering_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| AppError::Negotiation("No local description".to_string()))?;

        if local.sdp.is_empty() {
            return Err(AppError::Negotiation("Generated answer is empty".to_string()));
        }

        debug!("Session {} answer ready ({} bytes)", self.session_id, local.sdp.len());

        Ok(SessionDescription {
            kind: local.sdp_type.into(),
            sdp: local.sdp,
        })
    }

    /// Apply `event` to the state machine; false if it did not apply
    fn transition(&self, event: SessionEvent) -> bool {
        let mut change = None;
        self.state.send_if_modified(|state| match state.next(event) {
            Some(next) => {
                change = Some((*state, next));
                *state = next;
                true
            }
            None => false,
        });

        match change {
            Some((from, to)) => {
                info!("Session {} state: {} -> {}", self.session_id, from, to);
                true
            }
            None => {
                debug!(
                    "Session {} ignored {:?} in state {}",
                    self.session_id,
                    event,
                    self.state()
                );
                false
            }
        }
    }

    /// React to a transport connectivity change
    pub async fn on_connectivity_change(&self, status: ConnectivityStatus) {
        match status {
            ConnectivityStatus::Connected | ConnectivityStatus::Completed => {
                // First frames may have been written before DTLS was up
                self.video.request_keyframe();
            }
            ConnectivityStatus::Disconnected => {
                if self.transition(SessionEvent::ConnectivityLost) {
                    info!("Session {} disconnected, stopping track", self.session_id);
                    self.release().await;
                }
            }
            ConnectivityStatus::Failed => {
                if self.transition(SessionEvent::TransportFailed) {
                    self.release().await;
                }
            }
            ConnectivityStatus::Closed => {
                if self.transition(SessionEvent::Close) {
                    self.release().await;
                }
            }
            ConnectivityStatus::New | ConnectivityStatus::Checking => {}
        }
    }

    /// Explicit stop
    ///
    /// Returns true if this call released the session's resources.
    pub async fn close(&self) -> bool {
        self.transition(SessionEvent::Close);
        self.release().await
    }

    async fn fail(&self, reason: &str) -> bool {
        error!("Session {} failed: {}", self.session_id, reason);
        self.transition(SessionEvent::DecodeFailed);
        self.release().await
    }

    /// Stop the pump, the track and the transport, once
    async fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.cancel.cancel();
        self.video.stop();
        if let Err(e) = self.pc.close().await {
            warn!(
                "Session {} failed to close peer connection: {}",
                self.session_id, e
            );
        }

        let stats = self.video.stats();
        info!(
            "Session {} released ({} frames, {} bytes sent)",
            self.session_id, stats.frames_sent, stats.bytes_sent
        );
        true
    }

    /// Build a pump feeding this session's track from `decoder`
    pub fn frame_pump<D: DecodeStream>(&self, decoder: D) -> FramePump<D> {
        FramePump::new(
            self.session_id.clone(),
            decoder,
            self.geometry,
            self.video.clone() as Arc<dyn FrameSink>,
            self.cancel.clone(),
        )
        .with_progress_interval(self.progress_interval)
    }

    /// Start decoding `path` into the track and supervise the session
    ///
    /// A missing file leaves the connection up without media; a decoder
    /// that cannot be started fails the session.
    pub async fn stream_file(self: Arc<Self>, settings: &DecoderSettings, path: &Path) -> SessionState {
        let pump = match FfmpegDecoder::spawn(settings, path) {
            Ok(decoder) => Some(self.frame_pump(decoder)),
            Err(AppError::ResourceNotFound(missing)) => {
                error!(
                    "Session {}: video not found: {}, streaming aborted",
                    self.session_id, missing
                );
                None
            }
            Err(e) => {
                self.fail(&e.to_string()).await;
                None
            }
        };

        self.supervise(pump).await
    }

    /// Run the session until it reaches a terminal state and the pump stopped
    pub async fn supervise<D: DecodeStream + 'static>(
        self: Arc<Self>,
        pump: Option<FramePump<D>>,
    ) -> SessionState {
        match self.state() {
            SessionState::Connected => {}
            state if state.is_terminal() => return state,
            _ => {
                warn!(
                    "Session {} supervised before negotiation, closing",
                    self.session_id
                );
                self.close().await;
                return self.state();
            }
        }

        let Some(mut events) = self.events.lock().take() else {
            warn!("Session {} is already supervised", self.session_id);
            return self.state();
        };

        let mut pump_finished = pump.is_none();
        let pump_task = pump.map(|pump| tokio::spawn(pump.run()));
        let pump_done = async move {
            match pump_task {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(pump_done);

        let mut events_open = true;

        loop {
            if self.state().is_terminal() && pump_finished {
                break;
            }

            tokio::select! {
                status = events.recv(), if events_open => match status {
                    Some(status) => self.on_connectivity_change(status).await,
                    None => events_open = false,
                },
                report = &mut pump_done, if !pump_finished => {
                    pump_finished = true;
                    match report {
                        Ok(report) => match report.exit {
                            PumpExit::StreamEnd => {
                                self.close().await;
                            }
                            PumpExit::DecodeFailure(reason) => {
                                self.fail(&reason).await;
                            }
                            PumpExit::Cancelled => {}
                        },
                        Err(e) => {
                            self.fail(&format!("Frame pump task failed: {}", e)).await;
                        }
                    }
                },
                _ = self.cancel.cancelled(), if !self.state().is_terminal() => {
                    info!("Session {} cancelled, closing", self.session_id);
                    self.close().await;
                },
                else => break,
            }
        }

        let state = self.state();
        info!("Session {} finished in state {}", self.session_id, state);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::Resolution;
    use crate::video::pump::tests::ScriptedDecoder;
    use std::sync::atomic::Ordering;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

    fn config() -> SessionConfig {
        SessionConfig::new(
            WebRtcConfig::default(),
            FrameGeometry::new(Resolution::new(16, 16), 30),
        )
    }

    /// Offer as a receiving browser would send it
    async fn browser_offer() -> (Arc<RTCPeerConnection>, SessionDescription) {
        let pc = new_peer_connection(&WebRtcConfig::default()).await.unwrap();
        pc.add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .unwrap();

        let offer = pc.create_offer(None).await.unwrap();
        let mut gathering_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await.unwrap();
        let _ = gathering_complete.recv().await;

        let sdp = pc.local_description().await.unwrap().sdp;
        (pc, SessionDescription::offer(sdp))
    }

    /// Server-reflexive gathering against a TEST-NET address never completes
    fn stalled_gathering_config() -> SessionConfig {
        let mut config = config();
        config.webrtc.stun_servers = vec!["stun:192.0.2.1:3478".to_string()];
        config
    }

    async fn negotiated_session() -> (Arc<MediaSession>, Arc<RTCPeerConnection>) {
        let session = MediaSession::new(&config(), CancellationToken::new())
            .await
            .unwrap();
        let (browser, offer) = browser_offer().await;
        session.negotiate(offer).await.unwrap();
        (session, browser)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_valid_offer_yields_answer() {
        let session = MediaSession::new(&config(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Negotiating);

        let (browser, offer) = browser_offer().await;
        let answer = session.negotiate(offer).await.unwrap();

        assert_eq!(answer.kind, SdpType::Answer);
        assert!(!answer.sdp.is_empty());
        assert!(answer.sdp.contains("m=video"));
        assert_eq!(session.state(), SessionState::Connected);

        session.close().await;
        browser.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_malformed_offer_fails_session() {
        let session = MediaSession::new(&config(), CancellationToken::new())
            .await
            .unwrap();

        let result = session
            .negotiate(SessionDescription::offer("this is not sdp"))
            .await;

        assert!(matches!(result, Err(AppError::Negotiation(_))));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.video().is_stopped());
        // Already released by the failed negotiation
        assert!(!session.close().await);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_answer_instead_of_offer_rejected() {
        let session = MediaSession::new(&config(), CancellationToken::new())
            .await
            .unwrap();
        let (browser, offer) = browser_offer().await;

        let result = session.negotiate(SessionDescription::answer(offer.sdp)).await;

        assert!(matches!(result, Err(AppError::Negotiation(_))));
        assert_eq!(session.state(), SessionState::Failed);
        browser.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_negotiation_rejected() {
        let (session, browser) = negotiated_session().await;
        let (other, offer) = browser_offer().await;

        let result = session.negotiate(offer).await;

        assert!(matches!(result, Err(AppError::Negotiation(_))));
        assert_eq!(session.state(), SessionState::Connected);
        session.close().await;
        browser.close().await.unwrap();
        other.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_is_idempotent() {
        let (session, browser) = negotiated_session().await;

        assert!(session.close().await);
        assert!(!session.close().await);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.video().is_stopped());
        browser.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disconnect_is_terminal() {
        let cancel = CancellationToken::new();
        let session = MediaSession::new(&config(), cancel.clone()).await.unwrap();
        let (browser, offer) = browser_offer().await;
        session.negotiate(offer).await.unwrap();

        session
            .on_connectivity_change(ConnectivityStatus::Disconnected)
            .await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(cancel.is_cancelled());
        assert!(session.video().is_stopped());

        // Nothing leaves a terminal state
        session
            .on_connectivity_change(ConnectivityStatus::Connected)
            .await;
        assert!(!session.close().await);
        assert_eq!(session.state(), SessionState::Disconnected);
        browser.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_decode_error_tears_down_once() {
        let (session, browser) = negotiated_session().await;
        let decoder = ScriptedDecoder::new(vec![vec![0; 384]]).failing();
        let terminated = decoder.terminated.clone();
        let pump = session.frame_pump(decoder);

        let state = session.clone().supervise(Some(pump)).await;

        assert_eq!(state, SessionState::Failed);
        assert!(session.video().is_stopped());
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
        assert!(!session.close().await);
        browser.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stream_end_closes_session() {
        let (session, browser) = negotiated_session().await;
        let pump = session.frame_pump(ScriptedDecoder::new(vec![vec![0; 384]]));

        let state = session.clone().supervise(Some(pump)).await;

        assert_eq!(state, SessionState::Closed);
        assert!(session.video().is_stopped());
        browser.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disconnect_mid_stream_stops_pump() {
        let (session, browser) = negotiated_session().await;
        let decoder = ScriptedDecoder::new(vec![vec![0; 384]]).hanging();
        let terminated = decoder.terminated.clone();
        let pump = session.frame_pump(decoder);

        let task = tokio::spawn(session.clone().supervise(Some(pump)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        session
            .on_connectivity_change(ConnectivityStatus::Disconnected)
            .await;

        let state = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, SessionState::Disconnected);
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
        browser.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_video_keeps_answer_but_never_pumps() {
        let (session, browser) = negotiated_session().await;
        let dir = tempfile::tempdir().unwrap();
        let settings = DecoderSettings::new("ffmpeg", FrameGeometry::new(Resolution::new(16, 16), 30));
        let missing = dir.path().join("test.mp4");

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.stream_file(&settings, &missing).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.video().stats().frames_sent, 0);

        session.close().await;
        let state = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, SessionState::Closed);
        browser.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_closes_supervised_session() {
        let root = CancellationToken::new();
        let session = MediaSession::new(&config(), root.child_token())
            .await
            .unwrap();
        let (browser, offer) = browser_offer().await;
        session.negotiate(offer).await.unwrap();

        let task = tokio::spawn(session.clone().supervise::<ScriptedDecoder>(None));
        root.cancel();

        let state = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, SessionState::Closed);
        browser.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_negotiation_timeout_fails_session() {
        let mut config = stalled_gathering_config();
        config.negotiation_timeout = Duration::from_millis(200);
        let session = MediaSession::new(&config, CancellationToken::new())
            .await
            .unwrap();
        let (browser, offer) = browser_offer().await;

        let result = session.negotiate(offer).await;

        match result {
            Err(AppError::Negotiation(reason)) => assert!(reason.contains("Timed out")),
            other => panic!("expected negotiation timeout, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.video().is_stopped());
        assert!(!session.close().await);
        browser.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_abandoned_negotiation_closes_session() {
        let session = MediaSession::new(&stalled_gathering_config(), CancellationToken::new())
            .await
            .unwrap();
        let (browser, offer) = browser_offer().await;
        let mut state_rx = session.subscribe();

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.negotiate(offer).await }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(session.state(), SessionState::Negotiating);
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        tokio::time::timeout(Duration::from_secs(5), state_rx.wait_for(|s| s.is_terminal()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.video().is_stopped());
        // Released by the abandoned negotiation
        assert!(!session.close().await);
        browser.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_decoder_spawn_failure_fails_session() {
        let (session, browser) = negotiated_session().await;
        let input = tempfile::NamedTempFile::new().unwrap();
        let settings = DecoderSettings::new(
            "/nonexistent/ffmpeg",
            FrameGeometry::new(Resolution::new(16, 16), 30),
        );

        let state = tokio::time::timeout(
            Duration::from_secs(5),
            session.clone().stream_file(&settings, input.path()),
        )
        .await
        .unwrap();

        assert_eq!(state, SessionState::Failed);
        assert!(session.video().is_stopped());
        assert!(!session.close().await);
        browser.close().await.unwrap();
    }
}
