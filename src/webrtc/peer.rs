//! WebRTC peer connection construction

use std::sync::Arc;
use tracing::debug;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;

use super::config::WebRtcConfig;
use crate::error::{AppError, Result};

/// Create a peer connection with the default codecs and interceptors
pub async fn new_peer_connection(config: &WebRtcConfig) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();

    media_engine
        .register_default_codecs()
        .map_err(|e| AppError::WebRtc(format!("Failed to register codecs: {}", e)))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| AppError::WebRtc(format!("Failed to register interceptors: {}", e)))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let rtc_config = RTCConfiguration {
        ice_servers: config.ice_servers(),
        ..Default::default()
    };

    let pc = api
        .new_peer_connection(rtc_config)
        .await
        .map_err(|e| AppError::WebRtc(format!("Failed to create peer connection: {}", e)))?;

    debug!(
        "Peer connection created ({} ICE servers)",
        config.ice_servers().len()
    );

    Ok(Arc::new(pc))
}
