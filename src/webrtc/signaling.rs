//! WebRTC signaling types

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
            SdpType::Pranswer => write!(f, "pranswer"),
            SdpType::Rollback => write!(f, "rollback"),
        }
    }
}

/// Session description as exchanged with the browser: `{type, sdp}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

impl From<RTCSdpType> for SdpType {
    fn from(kind: RTCSdpType) -> Self {
        match kind {
            RTCSdpType::Answer => SdpType::Answer,
            RTCSdpType::Pranswer => SdpType::Pranswer,
            RTCSdpType::Rollback => SdpType::Rollback,
            _ => SdpType::Offer,
        }
    }
}

/// Transport-reported connectivity of the peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityStatus {
    /// Map the ICE connection state; `Unspecified` has no counterpart
    pub fn from_ice(state: RTCIceConnectionState) -> Option<Self> {
        match state {
            RTCIceConnectionState::New => Some(ConnectivityStatus::New),
            RTCIceConnectionState::Checking => Some(ConnectivityStatus::Checking),
            RTCIceConnectionState::Connected => Some(ConnectivityStatus::Connected),
            RTCIceConnectionState::Completed => Some(ConnectivityStatus::Completed),
            RTCIceConnectionState::Disconnected => Some(ConnectivityStatus::Disconnected),
            RTCIceConnectionState::Failed => Some(ConnectivityStatus::Failed),
            RTCIceConnectionState::Closed => Some(ConnectivityStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityStatus::New => write!(f, "new"),
            ConnectivityStatus::Checking => write!(f, "checking"),
            ConnectivityStatus::Connected => write!(f, "connected"),
            ConnectivityStatus::Completed => write!(f, "completed"),
            ConnectivityStatus::Disconnected => write!(f, "disconnected"),
            ConnectivityStatus::Failed => write!(f, "failed"),
            ConnectivityStatus::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_json_shape() {
        let answer = SessionDescription::answer("v=0");
        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(json, serde_json::json!({"type": "answer", "sdp": "v=0"}));

        let offer: SessionDescription =
            serde_json::from_str(r#"{"type":"offer","sdp":"v=0\r\n"}"#).unwrap();
        assert_eq!(offer.kind, SdpType::Offer);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let parsed = serde_json::from_str::<SessionDescription>(r#"{"type":"hello","sdp":""}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_ice_state_mapping() {
        assert_eq!(
            ConnectivityStatus::from_ice(RTCIceConnectionState::Disconnected),
            Some(ConnectivityStatus::Disconnected)
        );
        assert_eq!(ConnectivityStatus::from_ice(RTCIceConnectionState::Unspecified), None);
    }
}
