use std::fmt;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("signaling relay unreachable: {0}")]
    Unreachable(String),
    #[error("signaling transport not connected")]
    NotConnected,
    #[error("signaling transport disconnected: {0}")]
    Disconnected(String),
    #[error("malformed signaling frame: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),
}

#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture device error: {0}")]
    Device(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to create peer connection: {0}")]
    Create(String),
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("invalid ice candidate: {0}")]
    InvalidCandidate(String),
    #[error("failed to close peer connection: {0}")]
    Close(String),
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] WebRTCError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Permission(#[from] CaptureError),
    #[error("already in room {0}")]
    AlreadyJoined(String),
    #[error("room session task has stopped")]
    Stopped,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Transport(_) | SessionError::Stopped => ErrorKind::Transport,
            SessionError::Permission(_) => ErrorKind::Permission,
            SessionError::AlreadyJoined(_) => ErrorKind::Negotiation,
        }
    }
}

/// Error class reported on the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Permission,
    Negotiation,
    Resource,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Permission => write!(f, "permission"),
            ErrorKind::Negotiation => write!(f, "negotiation"),
            ErrorKind::Resource => write!(f, "resource"),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
