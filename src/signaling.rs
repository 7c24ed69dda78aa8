use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransportError;

/// Raw SDP text for one side of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionDescription(pub String);

impl SessionDescription {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One network path candidate, in the shape browsers exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    Join {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    Joined {
        count: u32,
    },
    PeerJoined,
    Ready,
    Offer {
        #[serde(rename = "roomId")]
        room_id: String,
        sdp: SessionDescription,
    },
    Answer {
        #[serde(rename = "roomId")]
        room_id: String,
        sdp: SessionDescription,
    },
    IceCandidate {
        #[serde(rename = "roomId")]
        room_id: String,
        candidate: IceCandidate,
    },
    Leave {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    PeerLeft,
}

/// Tag of a [`SignalMessage`], used to register one handler per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Join,
    Joined,
    PeerJoined,
    Ready,
    Offer,
    Answer,
    IceCandidate,
    Leave,
    PeerLeft,
}

impl SignalKind {
    /// Kinds the relay delivers to a member.
    pub const INBOUND: [SignalKind; 7] = [
        SignalKind::Joined,
        SignalKind::PeerJoined,
        SignalKind::Ready,
        SignalKind::Offer,
        SignalKind::Answer,
        SignalKind::IceCandidate,
        SignalKind::PeerLeft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Join => "join",
            SignalKind::Joined => "joined",
            SignalKind::PeerJoined => "peer-joined",
            SignalKind::Ready => "ready",
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
            SignalKind::Leave => "leave",
            SignalKind::PeerLeft => "peer-left",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SignalMessage {
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalMessage::Join { .. } => SignalKind::Join,
            SignalMessage::Joined { .. } => SignalKind::Joined,
            SignalMessage::PeerJoined => SignalKind::PeerJoined,
            SignalMessage::Ready => SignalKind::Ready,
            SignalMessage::Offer { .. } => SignalKind::Offer,
            SignalMessage::Answer { .. } => SignalKind::Answer,
            SignalMessage::IceCandidate { .. } => SignalKind::IceCandidate,
            SignalMessage::Leave { .. } => SignalKind::Leave,
            SignalMessage::PeerLeft => SignalKind::PeerLeft,
        }
    }

    /// Room the message is scoped to, for messages that carry one.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            SignalMessage::Join { room_id }
            | SignalMessage::Offer { room_id, .. }
            | SignalMessage::Answer { room_id, .. }
            | SignalMessage::IceCandidate { room_id, .. }
            | SignalMessage::Leave { room_id } => Some(room_id),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes one frame. Unknown tags and mismatched shapes are errors.
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_wire_names() {
        let msg = SignalMessage::IceCandidate {
            room_id: "r1".into(),
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "ice-candidate",
                "roomId": "r1",
                "candidate": {
                    "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host",
                    "sdpMid": "0",
                    "sdpMLineIndex": 0
                }
            })
        );
    }

    #[test]
    fn decodes_relay_events() {
        assert_eq!(
            SignalMessage::decode(r#"{"type":"joined","count":1}"#).unwrap(),
            SignalMessage::Joined { count: 1 }
        );
        assert_eq!(
            SignalMessage::decode(r#"{"type":"peer-joined"}"#).unwrap(),
            SignalMessage::PeerJoined
        );
        assert_eq!(
            SignalMessage::decode(r#"{"type":"ready"}"#).unwrap(),
            SignalMessage::Ready
        );
        let offer = SignalMessage::decode(r#"{"type":"offer","roomId":"r1","sdp":"v=0"}"#).unwrap();
        assert_eq!(offer.kind(), SignalKind::Offer);
        assert_eq!(offer.room_id(), Some("r1"));
    }

    #[test]
    fn rejects_unknown_tags_and_bad_shapes() {
        assert!(SignalMessage::decode(r#"{"type":"renegotiate"}"#).is_err());
        assert!(SignalMessage::decode(r#"{"type":"offer","roomId":"r1"}"#).is_err());
        assert!(SignalMessage::decode(r#"{"count":1}"#).is_err());
        assert!(SignalMessage::decode("not json").is_err());
    }
}
