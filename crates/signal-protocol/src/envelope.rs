//! Point-to-point connection negotiation envelopes.

use common::types::{MediaFlags, ParticipantId, Role};
use serde::{Deserialize, Serialize};

/// Kind of negotiation payload carried by a [`SignalEnvelope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Session description offered by the initiating side
    Offer,
    /// Session description answering an offer
    Answer,
    /// Trickled network candidate
    Candidate,
}

impl SignalKind {
    /// Lowercase wire name, also used as a metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
        }
    }
}

/// Network candidate for connectivity establishment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// Negotiation payload produced and consumed by peer connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalPayload {
    /// SDP offer
    Offer {
        /// Session description
        sdp: String,
    },
    /// SDP answer
    Answer {
        /// Session description
        sdp: String,
    },
    /// Trickled candidate
    Candidate {
        /// The candidate itself
        candidate: IceCandidate,
    },
}

impl SignalPayload {
    /// Which kind of payload this is.
    #[must_use]
    pub const fn kind(&self) -> SignalKind {
        match self {
            Self::Offer { .. } => SignalKind::Offer,
            Self::Answer { .. } => SignalKind::Answer,
            Self::Candidate { .. } => SignalKind::Candidate,
        }
    }
}

/// The unit of exchange between two peers, routed by the relay.
///
/// The sender's current media flags ride along on every envelope so remote
/// views stay in sync even while the connection is still negotiating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    /// Recipient connection id
    pub to: ParticipantId,
    /// Sender connection id
    pub from: ParticipantId,
    /// Negotiation payload
    pub signal: SignalPayload,
    /// Sender role
    #[serde(rename = "userRole", default)]
    pub role: Role,
    /// Sender display name
    #[serde(rename = "userName", default)]
    pub name: String,
    /// Sender media flags at send time
    #[serde(flatten)]
    pub flags: MediaFlags,
}

impl SignalEnvelope {
    /// Kind of the carried payload.
    #[must_use]
    pub const fn kind(&self) -> SignalKind {
        self.signal.kind()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = SignalEnvelope {
            to: ParticipantId::new("a1"),
            from: ParticipantId::new("b2"),
            signal: SignalPayload::Offer {
                sdp: "v=0".to_string(),
            },
            role: Role::Tutor,
            name: "Ada".to_string(),
            flags: MediaFlags {
                video_on: true,
                audio_on: true,
                ..MediaFlags::default()
            },
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["to"], "a1");
        assert_eq!(value["from"], "b2");
        assert_eq!(value["signal"]["type"], "offer");
        assert_eq!(value["userRole"], "tutor");
        assert_eq!(value["userName"], "Ada");
        assert_eq!(value["isVideoOn"], true);
        assert_eq!(value["isScreenSharing"], false);
    }

    #[test]
    fn test_candidate_payload_parses_browser_shape() {
        let json = r#"{
            "to": "a1", "from": "b2",
            "signal": {"type": "candidate", "candidate": {"candidate": "candidate:1 1 udp", "sdpMid": "0", "sdpMLineIndex": 0}}
        }"#;
        let envelope: SignalEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.kind(), SignalKind::Candidate);
        assert_eq!(envelope.role, Role::Student);
        assert!(!envelope.flags.audio_on);
        match envelope.signal {
            SignalPayload::Candidate { candidate } => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
