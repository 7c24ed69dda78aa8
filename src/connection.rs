use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Joining,
    Joined,
    Negotiating,
    Connected,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Joining => write!(f, "Joining"),
            ConnectionState::Joined => write!(f, "Joined"),
            ConnectionState::Negotiating => write!(f, "Negotiating"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Negotiation polarity for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Offerer,
    Answerer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Offerer => write!(f, "offerer"),
            Role::Answerer => write!(f, "answerer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub room_id: Option<String>,
    pub participants: Option<u32>,
    pub role: Option<Role>,
    pub last_error: Option<ErrorKind>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            room_id: None,
            participants: None,
            role: None,
            last_error: None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            ConnectionState::Idle => write!(f, "idle")?,
            ConnectionState::Joining => match &self.room_id {
                Some(room) => write!(f, "joining room {}", room)?,
                None => write!(f, "joining room")?,
            },
            ConnectionState::Joined => match self.participants {
                Some(count) => write!(f, "joined room ({})", count)?,
                None => write!(f, "joined room")?,
            },
            ConnectionState::Negotiating => match self.role {
                Some(role) => write!(f, "negotiating ({})", role)?,
                None => write!(f, "negotiating")?,
            },
            ConnectionState::Connected => write!(f, "connected")?,
            ConnectionState::Closed => write!(f, "closed")?,
        }
        if let Some(kind) = self.last_error {
            write!(f, " [{} error]", kind)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl From<RTPCodecType> for MediaKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Video => MediaKind::Video,
            _ => MediaKind::Audio,
        }
    }
}

#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
    pub handle: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Media arriving from the peer during the current attempt.
#[derive(Debug, Clone, Default)]
pub struct RemoteStream {
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn track_ids(&self) -> Vec<&str> {
        self.tracks.iter().map(|t| t.id.as_str()).collect()
    }
}

/// Publishes session status and the remote stream to observers.
#[derive(Clone)]
pub struct StatusMonitor {
    status: Arc<watch::Sender<SessionStatus>>,
    remote: Arc<watch::Sender<Option<RemoteStream>>>,
}

impl StatusMonitor {
    pub fn new() -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        let (remote, _) = watch::channel(None);
        Self {
            status: Arc::new(status),
            remote: Arc::new(remote),
        }
    }

    pub fn update_state(&self, state: ConnectionState) {
        self.status.send_modify(|status| {
            status.state = state;
            match state {
                ConnectionState::Idle | ConnectionState::Closed => {
                    status.participants = None;
                    status.role = None;
                }
                ConnectionState::Joining | ConnectionState::Joined => status.role = None,
                ConnectionState::Negotiating | ConnectionState::Connected => {}
            }
            if state == ConnectionState::Idle {
                status.room_id = None;
            }
        });
    }

    pub fn set_room(&self, room_id: &str) {
        self.status.send_modify(|status| {
            status.room_id = Some(room_id.to_owned());
            status.last_error = None;
        });
    }

    pub fn set_participants(&self, count: u32) {
        self.status.send_modify(|status| status.participants = Some(count));
    }

    pub fn set_role(&self, role: Role) {
        self.status.send_modify(|status| status.role = Some(role));
    }

    pub fn set_error(&self, kind: ErrorKind) {
        self.status.send_modify(|status| status.last_error = Some(kind));
    }

    pub fn add_remote_track(&self, track: RemoteTrack) {
        self.remote.send_modify(|remote| {
            let stream = remote.get_or_insert_with(RemoteStream::default);
            if !stream.tracks.iter().any(|t| t.id == track.id) {
                stream.tracks.push(track);
            }
        });
    }

    pub fn clear_remote(&self) {
        self.remote.send_if_modified(|remote| remote.take().is_some());
    }

    pub fn snapshot(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn remote_stream(&self) -> Option<RemoteStream> {
        self.remote.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_remote(&self) -> watch::Receiver<Option<RemoteStream>> {
        self.remote.subscribe()
    }
}

impl Default for StatusMonitor {
    fn default() -> Self {
        Self::new()
    }
}
