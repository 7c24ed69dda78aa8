use std::fmt;
use tokio::sync::{mpsc, oneshot};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::connection::{RemoteTrack, Role};
use crate::error::{EngineError, Result, TransportError};
use crate::signaling::{IceCandidate, SessionDescription, SignalMessage};

/// Everything the session reacts to, in the order it happened.
pub enum Event {
    Join {
        room_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    Signal(SignalMessage),
    TransportLost(TransportError),
    Attempt(AttemptEvent),
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Join { room_id, .. } => write!(f, "Join({})", room_id),
            Event::Leave { .. } => write!(f, "Leave"),
            Event::Signal(msg) => write!(f, "Signal({})", msg.kind()),
            Event::TransportLost(e) => write!(f, "TransportLost({})", e),
            Event::Attempt(ev) => write!(f, "Attempt({}, {:?})", ev.generation, ev.kind),
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<Event>;

/// Result or notification belonging to one negotiation attempt.
#[derive(Debug)]
pub struct AttemptEvent {
    pub generation: u64,
    pub kind: AttemptEventKind,
}

#[derive(Debug)]
pub enum AttemptEventKind {
    Engine(EngineEvent),
    ResourceFailed(EngineError),
    LocalDescription {
        role: Role,
        result: std::result::Result<SessionDescription, EngineError>,
    },
    RemoteDescriptionApplied(std::result::Result<(), EngineError>),
    CandidateRejected(EngineError),
    Closed(std::result::Result<(), EngineError>),
}

/// Background notifications from a connection resource.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    PeerState(PeerState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            _ => PeerState::New,
        }
    }
}

/// Posts engine callbacks onto the session queue, tagged with the attempt
/// generation that created the connection.
#[derive(Clone)]
pub struct EngineSink {
    generation: u64,
    events: EventSender,
}

impl EngineSink {
    pub fn new(generation: u64, events: EventSender) -> Self {
        Self { generation, events }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: EngineEvent) {
        self.post(AttemptEventKind::Engine(event));
    }

    pub(crate) fn post(&self, kind: AttemptEventKind) {
        let _ = self.events.send(Event::Attempt(AttemptEvent {
            generation: self.generation,
            kind,
        }));
    }
}
