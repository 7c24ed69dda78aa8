//! Reference rendezvous relay.
//!
//! Pairs at most two members per room and fans each member's negotiation
//! messages out to the other member only.

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::signaling::SignalMessage;

pub const ROOM_CAPACITY: usize = 2;

pub type MemberId = u64;
pub type Outbox = mpsc::UnboundedSender<SignalMessage>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("room {0} is full")]
    RoomFull(String),
    #[error("member {0} is not in a room")]
    NotInRoom(MemberId),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Default)]
struct RoomTable {
    rooms: HashMap<String, Vec<(MemberId, Outbox)>>,
    membership: HashMap<MemberId, String>,
}

impl RoomTable {
    fn count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |m| m.len())
    }

    /// Drops `member` from its room. Returns the room and whoever is left.
    fn remove(&mut self, member: MemberId) -> Option<(String, Vec<Outbox>)> {
        let room_id = self.membership.remove(&member)?;
        let mut remaining = Vec::new();
        if let Some(members) = self.rooms.get_mut(&room_id) {
            members.retain(|(id, _)| *id != member);
            remaining = members.iter().map(|(_, out)| out.clone()).collect();
            if members.is_empty() {
                self.rooms.remove(&room_id);
            }
        }
        Some((room_id, remaining))
    }
}

/// Room membership table shared by every relay connection.
#[derive(Default)]
pub struct Rooms {
    table: Mutex<RoomTable>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one message sent by `member`.
    pub fn handle(
        &self,
        member: MemberId,
        outbox: &Outbox,
        message: SignalMessage,
    ) -> Result<(), RelayError> {
        match message {
            SignalMessage::Join { room_id } => self.join(member, &room_id, outbox.clone()),
            SignalMessage::Leave { .. } => {
                self.leave(member);
                Ok(())
            }
            SignalMessage::Offer { .. }
            | SignalMessage::Answer { .. }
            | SignalMessage::IceCandidate { .. } => self.forward(member, message),
            other => {
                warn!("Member {} sent relay-only {} message", member, other.kind());
                Ok(())
            }
        }
    }

    pub fn join(&self, member: MemberId, room_id: &str, outbox: Outbox) -> Result<(), RelayError> {
        let mut table = self.lock();
        if table.membership.get(&member).is_some_and(|current| current == room_id) {
            let count = table.count(room_id);
            drop(table);
            debug!("Member {} re-joined {}", member, room_id);
            let _ = outbox.send(SignalMessage::Joined {
                count: count as u32,
            });
            return Ok(());
        }
        if table.count(room_id) >= ROOM_CAPACITY {
            return Err(RelayError::RoomFull(room_id.to_owned()));
        }

        let previous = table.remove(member);
        let members = table.rooms.entry(room_id.to_owned()).or_default();
        members.push((member, outbox.clone()));
        let count = members.len();
        let existing: Vec<Outbox> = members
            .iter()
            .filter(|(id, _)| *id != member)
            .map(|(_, out)| out.clone())
            .collect();
        table.membership.insert(member, room_id.to_owned());
        drop(table);

        if let Some((old_room, remaining)) = previous {
            info!("Member {} left room {}", member, old_room);
            for other in remaining {
                let _ = other.send(SignalMessage::PeerLeft);
            }
        }
        info!("Member {} joined room {} ({})", member, room_id, count);
        let _ = outbox.send(SignalMessage::Joined {
            count: count as u32,
        });
        for other in &existing {
            let _ = other.send(SignalMessage::PeerJoined);
        }
        if count == ROOM_CAPACITY {
            let _ = outbox.send(SignalMessage::Ready);
        }
        Ok(())
    }

    /// Removes `member` from its room, telling the remaining member.
    pub fn leave(&self, member: MemberId) {
        let removed = self.lock().remove(member);
        let Some((room_id, remaining)) = removed else {
            return;
        };
        info!("Member {} left room {}", member, room_id);
        for other in remaining {
            let _ = other.send(SignalMessage::PeerLeft);
        }
    }

    fn forward(&self, member: MemberId, message: SignalMessage) -> Result<(), RelayError> {
        let table = self.lock();
        let room_id = table
            .membership
            .get(&member)
            .ok_or(RelayError::NotInRoom(member))?;
        if message.room_id().is_some_and(|scoped| scoped != room_id) {
            warn!("Member {} addressed a room it is not in", member);
            return Ok(());
        }
        if let Some(members) = table.rooms.get(room_id) {
            for (_, out) in members.iter().filter(|(id, _)| *id != member) {
                let _ = out.send(message.clone());
            }
        }
        Ok(())
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        self.lock().count(room_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RoomTable> {
        match self.table.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// WebSocket front end over [`Rooms`].
pub struct Relay {
    listener: TcpListener,
    rooms: Arc<Rooms>,
    next_member: AtomicU64,
}

impl Relay {
    pub async fn bind(config: &RelayConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        Ok(Self {
            listener,
            rooms: Arc::new(Rooms::new()),
            next_member: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn rooms(&self) -> Arc<Rooms> {
        self.rooms.clone()
    }

    pub async fn serve(self) -> Result<(), RelayError> {
        info!("Relay listening on {}", self.listener.local_addr()?);
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            let member = self.next_member.fetch_add(1, Ordering::SeqCst);
            debug!("Connection {} from {}", member, peer_addr);
            tokio::spawn(handle_connection(stream, member, self.rooms.clone()));
        }
    }
}

async fn handle_connection(stream: TcpStream, member: MemberId, rooms: Arc<Rooms>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with member {} failed: {}", member, e);
            return;
        }
    };
    let (mut sender, mut receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<SignalMessage>();

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match msg.encode() {
                Ok(json) => json,
                Err(e) => {
                    error!("Cannot encode {}: {}", msg.kind(), e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut recv_task = tokio::spawn({
        let rooms = rooms.clone();
        async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => match SignalMessage::decode(&text) {
                        Ok(signal) => {
                            if let Err(e) = rooms.handle(member, &tx, signal) {
                                warn!("Member {}: {}", member, e);
                                if matches!(e, RelayError::RoomFull(_)) {
                                    break;
                                }
                            }
                        }
                        Err(e) => warn!("Invalid signal from member {}: {}", member, e),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    rooms.leave(member);
    debug!("Connection {} closed", member);
}
