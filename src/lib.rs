//! Two-party audio/video calls negotiated through a rendezvous relay.
//!
//! [`RoomSession`] is the entry point: it joins a named room on the relay,
//! lets the relay decide which side offers, and drives one WebRTC peer
//! connection through offer, answer and trickled ICE candidates.

pub mod capture;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod event;
pub mod manager;
pub mod negotiation;
pub mod relay;
pub mod room;
pub mod signaling;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use capture::{LocalStream, MediaCapture, SilentCapture};
pub use config::{RelayConfig, SessionConfig};
pub use connection::{ConnectionState, RemoteStream, Role, SessionStatus};
pub use engine::{MediaEngine, PeerConnection, WebRtcEngine};
pub use error::{ErrorKind, SessionError};
pub use relay::Relay;
pub use room::RoomSession;
pub use signaling::{IceCandidate, SessionDescription, SignalMessage};
pub use transport::{SignalTransport, WsSignalTransport};
