use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::webrtc::{MediaSession, SessionDescription};

// ============================================================================
// WebRTC
// ============================================================================

/// Handle a WebRTC offer
///
/// Answers as soon as the local description is ready; the file is
/// streamed by a tracked background task holding the session slot.
pub async fn webrtc_offer(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<SessionDescription>, JsonRejection>,
) -> Result<Json<SessionDescription>> {
    let Json(offer) = payload
        .map_err(|e| AppError::Negotiation(format!("Invalid offer body: {}", e.body_text())))?;

    let permit = state.acquire_session_slot()?;

    let session = MediaSession::new(&state.session_config(), state.shutdown.child_token()).await?;
    info!(
        "Offer received, session {} ({} active)",
        session.session_id(),
        state.active_sessions()
    );

    let answer = session.negotiate(offer).await?;

    let settings = state.config.video.decoder_settings();
    let video_path = state.config.video.video_path();
    state.tasks.spawn(async move {
        let _permit = permit;
        let session_id = session.session_id().to_string();
        let final_state = session.stream_file(&settings, &video_path).await;
        debug!("Session {} task done ({})", session_id, final_state);
    });

    Ok(Json(answer))
}
