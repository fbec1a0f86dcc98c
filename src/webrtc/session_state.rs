//! Media session state machine
//!
//! ```text
//! Negotiating --Negotiated--> Connected --ConnectivityLost--> Disconnected
//!      |                          |------TransportFailed---> Failed
//!      |                          |------DecodeFailed------> Failed
//!      |                          `------Close-------------> Closed
//!      |--NegotiationFailed--> Failed
//!      `--Close--------------> Closed
//! ```
//!
//! Disconnected, Failed and Closed are terminal.

use serde::Serialize;

/// Lifecycle state of one media session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Inputs driving the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Remote offer applied, local answer generated and set
    Negotiated,
    /// Offer rejected, answer generation failed or timed out
    NegotiationFailed,
    /// Transport reported disconnected connectivity
    ConnectivityLost,
    /// Transport reported failed connectivity
    TransportFailed,
    /// Decoder failed mid-stream
    DecodeFailed,
    /// Explicit stop or normal end of the stream
    Close,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Disconnected | SessionState::Failed | SessionState::Closed
        )
    }

    /// Next state for `event`, `None` if the event does not apply
    pub fn next(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Negotiating, Negotiated) => Some(Connected),
            (Negotiating, NegotiationFailed) => Some(Failed),
            (Negotiating, Close) => Some(Closed),
            (Connected, ConnectivityLost) => Some(Disconnected),
            (Connected, TransportFailed) | (Connected, DecodeFailed) => Some(Failed),
            (Connected, Close) => Some(Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_EVENTS: [SessionEvent; 6] = [
        SessionEvent::Negotiated,
        SessionEvent::NegotiationFailed,
        SessionEvent::ConnectivityLost,
        SessionEvent::TransportFailed,
        SessionEvent::DecodeFailed,
        SessionEvent::Close,
    ];

    #[test]
    fn test_happy_path() {
        let state = SessionState::Negotiating;
        let state = state.next(SessionEvent::Negotiated).unwrap();
        assert_eq!(state, SessionState::Connected);
        assert_eq!(
            state.next(SessionEvent::ConnectivityLost),
            Some(SessionState::Disconnected)
        );
        assert_eq!(state.next(SessionEvent::Close), Some(SessionState::Closed));
    }

    #[test]
    fn test_connected_only_via_negotiation() {
        for state in [
            SessionState::Negotiating,
            SessionState::Connected,
            SessionState::Disconnected,
            SessionState::Failed,
            SessionState::Closed,
        ] {
            for event in ALL_EVENTS {
                if state.next(event) == Some(SessionState::Connected) {
                    assert_eq!(state, SessionState::Negotiating);
                    assert_eq!(event, SessionEvent::Negotiated);
                }
            }
        }
    }

    #[test]
    fn test_terminal_states_never_transition() {
        for state in [
            SessionState::Disconnected,
            SessionState::Failed,
            SessionState::Closed,
        ] {
            assert!(state.is_terminal());
            for event in ALL_EVENTS {
                assert_eq!(state.next(event), None, "{} on {:?}", state, event);
            }
        }
    }

    #[test]
    fn test_negotiation_failure() {
        assert_eq!(
            SessionState::Negotiating.next(SessionEvent::NegotiationFailed),
            Some(SessionState::Failed)
        );
        // Connectivity events before the answer exists are ignored
        assert_eq!(
            SessionState::Negotiating.next(SessionEvent::ConnectivityLost),
            None
        );
    }

    #[test]
    fn test_decode_failure_fails_session() {
        assert_eq!(
            SessionState::Connected.next(SessionEvent::DecodeFailed),
            Some(SessionState::Failed)
        );
    }
}
