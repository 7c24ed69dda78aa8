use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capture::LocalStream;
use crate::connection::{ConnectionState, Role, StatusMonitor};
use crate::engine::MediaEngine;
use crate::error::{CaptureError, EngineError, ErrorKind, Result, SessionError, TransportError};
use crate::event::{AttemptEvent, AttemptEventKind, EngineEvent, Event, EventSender, PeerState};
use crate::manager::ConnectionManager;
use crate::signaling::{SessionDescription, SignalMessage};
use crate::transport::SignalTransport;

/// Decides polarity, sequences the description and candidate exchange and
/// tears attempts down. It is the only writer of [`ConnectionState`] and is
/// driven one [`Event`] at a time.
pub struct NegotiationStateMachine {
    state: ConnectionState,
    room_id: Option<String>,
    role: Option<Role>,
    transport: Arc<dyn SignalTransport>,
    connections: ConnectionManager,
    monitor: StatusMonitor,
    capture: std::result::Result<LocalStream, CaptureError>,
}

impl NegotiationStateMachine {
    pub fn new(
        transport: Arc<dyn SignalTransport>,
        engine: Arc<dyn MediaEngine>,
        capture: std::result::Result<LocalStream, CaptureError>,
        monitor: StatusMonitor,
        events: EventSender,
    ) -> Self {
        if capture.is_err() {
            monitor.set_error(ErrorKind::Permission);
        }
        Self {
            state: ConnectionState::Idle,
            room_id: None,
            role: None,
            transport,
            connections: ConnectionManager::new(engine, events),
            monitor,
            capture,
        }
    }

    pub async fn handle(&mut self, event: Event) {
        debug!("Handling {:?} in {}", event, self.state);
        match event {
            Event::Join { room_id, reply } => {
                let result = self.join(room_id).await;
                let _ = reply.send(result);
            }
            Event::Leave { reply } => {
                self.leave().await;
                let _ = reply.send(());
            }
            Event::Signal(message) => self.on_signal(message).await,
            Event::TransportLost(error) => self.on_transport_lost(error).await,
            Event::Attempt(event) => self.on_attempt(event).await,
        }
    }

    pub async fn join(&mut self, room_id: String) -> Result<()> {
        if self.state != ConnectionState::Idle {
            return Err(SessionError::AlreadyJoined(
                self.room_id.clone().unwrap_or_default(),
            ));
        }
        let stream = match &self.capture {
            Ok(stream) => stream.clone(),
            Err(e) => {
                self.monitor.set_error(ErrorKind::Permission);
                return Err(SessionError::Permission(e.clone()));
            }
        };

        if let Err(e) = self.transport.connect().await {
            warn!("Cannot reach signaling relay: {}", e);
            self.monitor.set_error(ErrorKind::Transport);
            return Err(e.into());
        }

        self.monitor.set_room(&room_id);
        self.room_id = Some(room_id.clone());
        self.set_state(ConnectionState::Joining);

        if let Err(e) = self.transport.send(SignalMessage::Join { room_id }).await {
            self.reset(ErrorKind::Transport, false).await;
            return Err(e.into());
        }

        self.connections.attach_local_tracks(stream);
        self.connections.create();
        Ok(())
    }

    /// Leaves the room from any state. Repeated calls are no-ops.
    pub async fn leave(&mut self) {
        if self.state == ConnectionState::Idle {
            debug!("Leave while idle, nothing to do");
            return;
        }
        info!("Leaving room {}", self.room_id.as_deref().unwrap_or("?"));
        self.teardown();
        if let Some(room_id) = self.room_id.clone() {
            if let Err(e) = self.transport.send(SignalMessage::Leave { room_id }).await {
                debug!("Leave not delivered: {}", e);
            }
        }
        self.transport.disconnect().await;
        self.settle_idle();
    }

    async fn on_signal(&mut self, message: SignalMessage) {
        if matches!(self.state, ConnectionState::Idle | ConnectionState::Closed) {
            debug!("Ignoring {} outside a room", message.kind());
            return;
        }
        if let (Some(theirs), Some(ours)) = (message.room_id(), self.room_id.as_deref()) {
            if theirs != ours {
                warn!("Ignoring {} scoped to room {}", message.kind(), theirs);
                return;
            }
        }

        match message {
            SignalMessage::Joined { count } => {
                if self.state != ConnectionState::Joining {
                    debug!("Duplicate joined({}) ignored", count);
                    return;
                }
                self.monitor.set_participants(count);
                self.set_state(ConnectionState::Joined);
            }
            SignalMessage::PeerJoined => {
                info!("Peer joined the room");
                self.monitor.set_participants(2);
            }
            SignalMessage::Ready => {
                if self.state != ConnectionState::Joined {
                    debug!("Ready ignored in {}", self.state);
                    return;
                }
                self.start_offer();
            }
            SignalMessage::Offer { sdp, .. } => self.on_offer(sdp),
            SignalMessage::Answer { sdp, .. } => {
                if self.state != ConnectionState::Negotiating || self.role != Some(Role::Offerer) {
                    warn!("Unexpected answer in {}, ignored", self.state);
                    return;
                }
                self.connections.set_remote_description(sdp);
            }
            SignalMessage::IceCandidate { candidate, .. } => {
                self.connections.add_candidate(candidate);
            }
            SignalMessage::PeerLeft => {
                if self.state == ConnectionState::Joining {
                    debug!("Peer left before joined, ignored");
                    return;
                }
                info!("Peer left the room");
                self.teardown();
                self.set_state(ConnectionState::Closed);
                self.set_state(ConnectionState::Joined);
                self.monitor.set_participants(1);
            }
            SignalMessage::Join { .. } | SignalMessage::Leave { .. } => {
                warn!("Relay sent an outbound-only {} message", message.kind());
            }
        }
    }

    fn start_offer(&mut self) {
        self.role = Some(Role::Offerer);
        self.monitor.set_role(Role::Offerer);
        self.set_state(ConnectionState::Negotiating);
        let generation = self.connections.create_offer();
        info!("Creating offer for attempt {}", generation);
    }

    fn on_offer(&mut self, sdp: SessionDescription) {
        match (self.state, self.role) {
            (ConnectionState::Joined, _) => {}
            (ConnectionState::Negotiating, Some(Role::Answerer)) => {
                debug!("Duplicate offer ignored");
                return;
            }
            (ConnectionState::Negotiating, _) => {
                warn!("Offer received while offering, restarting as answerer");
                self.teardown();
            }
            (state, _) => {
                warn!("Offer ignored in {}", state);
                return;
            }
        }
        self.role = Some(Role::Answerer);
        self.monitor.set_role(Role::Answerer);
        self.set_state(ConnectionState::Negotiating);
        let generation = self.connections.accept_offer(sdp);
        info!("Answering offer in attempt {}", generation);
    }

    async fn on_transport_lost(&mut self, error: TransportError) {
        if self.state == ConnectionState::Idle {
            debug!("Transport loss after leaving ignored: {}", error);
            return;
        }
        warn!("Signaling transport lost: {}", error);
        self.reset(ErrorKind::Transport, false).await;
    }

    async fn on_attempt(&mut self, event: AttemptEvent) {
        if !self.connections.is_current(event.generation) {
            match event.kind {
                AttemptEventKind::Closed(Ok(())) => {
                    debug!("Attempt {} closed", event.generation);
                }
                AttemptEventKind::Closed(Err(e)) => {
                    warn!("Attempt {} did not close cleanly: {}", event.generation, e);
                    self.monitor.set_error(ErrorKind::Resource);
                }
                kind => debug!("Discarding {:?} from superseded attempt {}", kind, event.generation),
            }
            return;
        }

        match event.kind {
            AttemptEventKind::Engine(EngineEvent::LocalCandidate(candidate)) => {
                if let Some(room_id) = self.room_id.clone() {
                    self.send(SignalMessage::IceCandidate { room_id, candidate }).await;
                }
            }
            AttemptEventKind::Engine(EngineEvent::RemoteTrack(track)) => {
                self.monitor.add_remote_track(track);
            }
            AttemptEventKind::Engine(EngineEvent::PeerState(state)) => {
                debug!("Peer connection is {:?}", state);
                if state == PeerState::Failed {
                    self.fail_attempt("peer connection failed");
                }
            }
            AttemptEventKind::ResourceFailed(e) => {
                warn!("Connection resource failed: {}", e);
                self.reset(ErrorKind::Resource, true).await;
            }
            AttemptEventKind::LocalDescription { role, result } => match result {
                Ok(sdp) => self.on_local_description(role, sdp).await,
                Err(e) => self.fail_attempt(&e.to_string()),
            },
            AttemptEventKind::RemoteDescriptionApplied(result) => match result {
                Ok(()) => {
                    if self.role == Some(Role::Offerer) {
                        self.set_state(ConnectionState::Connected);
                    }
                }
                Err(e) => self.fail_attempt(&e.to_string()),
            },
            AttemptEventKind::CandidateRejected(e) => self.on_candidate_rejected(e),
            AttemptEventKind::Closed(_) => {}
        }
    }

    async fn on_local_description(&mut self, role: Role, sdp: SessionDescription) {
        let Some(room_id) = self.room_id.clone() else {
            return;
        };
        match role {
            Role::Offerer => self.send(SignalMessage::Offer { room_id, sdp }).await,
            Role::Answerer => {
                self.send(SignalMessage::Answer { room_id, sdp }).await;
                self.set_state(ConnectionState::Connected);
            }
        }
    }

    /// A bad candidate sinks an attempt still negotiating. Once connected it
    /// is only reported.
    fn on_candidate_rejected(&mut self, error: EngineError) {
        if self.state == ConnectionState::Negotiating {
            self.fail_attempt(&error.to_string());
            return;
        }
        warn!("Remote candidate rejected: {}", error);
        self.monitor.set_error(ErrorKind::Negotiation);
    }

    /// Aborts the current attempt only; room membership is kept.
    fn fail_attempt(&mut self, reason: &str) {
        warn!("Negotiation attempt failed: {}", reason);
        self.teardown();
        self.set_state(ConnectionState::Joined);
        self.monitor.set_error(ErrorKind::Negotiation);
    }

    /// Drops back to idle, optionally telling the relay we left.
    async fn reset(&mut self, kind: ErrorKind, announce: bool) {
        self.teardown();
        if announce {
            if let Some(room_id) = self.room_id.clone() {
                let _ = self.transport.send(SignalMessage::Leave { room_id }).await;
            }
        }
        self.transport.disconnect().await;
        self.settle_idle();
        self.monitor.set_error(kind);
    }

    /// Single teardown path for every exit: leave, peer departure, errors.
    fn teardown(&mut self) {
        if self.connections.close() {
            debug!("Connection resource released");
        }
        self.monitor.clear_remote();
        self.role = None;
    }

    fn settle_idle(&mut self) {
        self.set_state(ConnectionState::Closed);
        self.room_id = None;
        self.set_state(ConnectionState::Idle);
    }

    async fn send(&mut self, message: SignalMessage) {
        let kind = message.kind();
        if let Err(e) = self.transport.send(message).await {
            warn!("Failed to send {}: {}", kind, e);
            self.monitor.set_error(ErrorKind::Transport);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            info!("{} -> {}", self.state, state);
        }
        self.state = state;
        self.monitor.update_state(state);
    }
}
