use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capture::MediaCapture;
use crate::connection::{RemoteStream, SessionStatus, StatusMonitor};
use crate::engine::MediaEngine;
use crate::error::{Result, SessionError};
use crate::event::{Event, EventSender};
use crate::negotiation::NegotiationStateMachine;
use crate::signaling::SignalKind;
use crate::transport::SignalTransport;

/// Binds one caller to one room at a time.
///
/// All inbound relay messages, engine callbacks and the caller's own
/// `join`/`leave` requests are funneled through one queue into a single
/// task that owns the [`NegotiationStateMachine`].
pub struct RoomSession {
    events: EventSender,
    monitor: StatusMonitor,
    task: JoinHandle<()>,
}

impl RoomSession {
    /// Acquires the local stream up front. A capture failure does not fail
    /// construction; it disables `join` and shows on the status surface.
    pub async fn new(
        transport: Arc<dyn SignalTransport>,
        engine: Arc<dyn MediaEngine>,
        capture: &dyn MediaCapture,
    ) -> Self {
        let capture = capture.local_stream().await;
        if let Err(e) = &capture {
            warn!("Local media unavailable, joining disabled: {}", e);
        }

        let monitor = StatusMonitor::new();
        let (events, mut queue) = mpsc::unbounded_channel();

        for kind in SignalKind::INBOUND {
            let events = events.clone();
            transport.subscribe(
                kind,
                Arc::new(move |message| {
                    let _ = events.send(Event::Signal(message));
                }),
            );
        }
        let lost = events.clone();
        transport.on_disconnect(Arc::new(move |error| {
            let _ = lost.send(Event::TransportLost(error));
        }));

        let mut machine = NegotiationStateMachine::new(
            transport,
            engine,
            capture,
            monitor.clone(),
            events.clone(),
        );
        let task = tokio::spawn(async move {
            while let Some(event) = queue.recv().await {
                machine.handle(event).await;
            }
        });

        Self {
            events,
            monitor,
            task,
        }
    }

    pub async fn join(&self, room_id: impl Into<String>) -> Result<()> {
        let room_id = room_id.into();
        info!("Joining room {}", room_id);
        let (reply, done) = oneshot::channel();
        self.events
            .send(Event::Join { room_id, reply })
            .map_err(|_| SessionError::Stopped)?;
        done.await.map_err(|_| SessionError::Stopped)?
    }

    /// Leaves the current room. Safe from any state and safe to repeat.
    pub async fn leave(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.events
            .send(Event::Leave { reply })
            .map_err(|_| SessionError::Stopped)?;
        done.await.map_err(|_| SessionError::Stopped)
    }

    pub fn status(&self) -> SessionStatus {
        self.monitor.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.monitor.subscribe()
    }

    pub fn remote_stream(&self) -> Option<RemoteStream> {
        self.monitor.remote_stream()
    }

    pub fn subscribe_remote(&self) -> watch::Receiver<Option<RemoteStream>> {
        self.monitor.subscribe_remote()
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}
