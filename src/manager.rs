use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::capture::LocalStream;
use crate::connection::Role;
use crate::engine::{MediaEngine, PeerConnection};
use crate::event::{AttemptEventKind, EngineSink, EventSender};
use crate::signaling::{IceCandidate, SessionDescription};

enum Op {
    Attach(LocalStream),
    CreateOffer,
    AcceptOffer(SessionDescription),
    AcceptAnswer(SessionDescription),
    AddCandidate(IceCandidate),
}

struct Attempt {
    generation: u64,
    ops: mpsc::UnboundedSender<Op>,
}

/// Owns the single connection resource of a room membership.
///
/// Each resource lives inside an attempt worker task that runs engine
/// operations strictly in the order they were requested and posts their
/// results back onto the session queue tagged with the attempt generation.
/// `close` bumps the generation, so anything still queued or in flight for
/// the old attempt is skipped or discarded.
pub struct ConnectionManager {
    engine: Arc<dyn MediaEngine>,
    events: EventSender,
    generation: Arc<AtomicU64>,
    attempt: Option<Attempt>,
    local_stream: Option<LocalStream>,
    // Remote candidates that arrived while no attempt existed.
    waiting: Vec<IceCandidate>,
}

impl ConnectionManager {
    pub fn new(engine: Arc<dyn MediaEngine>, events: EventSender) -> Self {
        Self {
            engine,
            events,
            generation: Arc::new(AtomicU64::new(0)),
            attempt: None,
            local_stream: None,
            waiting: Vec::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// True when `generation` names the live attempt.
    pub fn is_current(&self, generation: u64) -> bool {
        self.attempt
            .as_ref()
            .is_some_and(|attempt| attempt.generation == generation)
    }

    /// Returns the live attempt's generation, spawning a new resource if
    /// there is none.
    pub fn create(&mut self) -> u64 {
        if let Some(attempt) = &self.attempt {
            return attempt.generation;
        }

        let generation = self.generation();
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let sink = EngineSink::new(generation, self.events.clone());
        tokio::spawn(run_attempt(
            self.engine.clone(),
            sink,
            self.generation.clone(),
            ops_rx,
        ));
        info!("Created connection resource for attempt {}", generation);

        let attempt = Attempt {
            generation,
            ops: ops_tx,
        };
        if let Some(stream) = &self.local_stream {
            let _ = attempt.ops.send(Op::Attach(stream.clone()));
        }
        if !self.waiting.is_empty() {
            debug!(
                "Handing {} early remote candidates to attempt {}",
                self.waiting.len(),
                generation
            );
        }
        for candidate in self.waiting.drain(..) {
            let _ = attempt.ops.send(Op::AddCandidate(candidate));
        }
        self.attempt = Some(attempt);
        generation
    }

    /// Attaches every track of `stream`, now or as soon as a resource exists.
    pub fn attach_local_tracks(&mut self, stream: LocalStream) {
        if let Some(attempt) = &self.attempt {
            let _ = attempt.ops.send(Op::Attach(stream.clone()));
        }
        self.local_stream = Some(stream);
    }

    pub fn create_offer(&mut self) -> u64 {
        self.submit(Op::CreateOffer)
    }

    /// Applies the peer's offer, then creates the local answer.
    pub fn accept_offer(&mut self, sdp: SessionDescription) -> u64 {
        self.submit(Op::AcceptOffer(sdp))
    }

    /// Applies the peer's answer to our offer.
    pub fn set_remote_description(&mut self, sdp: SessionDescription) -> u64 {
        self.submit(Op::AcceptAnswer(sdp))
    }

    /// Hands a remote candidate to the live attempt, which holds it back
    /// until a remote description has been applied. Without an attempt the
    /// candidate waits for the next `create`.
    pub fn add_candidate(&mut self, candidate: IceCandidate) {
        match &self.attempt {
            Some(attempt) => {
                let _ = attempt.ops.send(Op::AddCandidate(candidate));
            }
            None => {
                debug!("No connection resource yet, holding remote candidate");
                self.waiting.push(candidate);
            }
        }
    }

    /// Releases the live resource and forgets every queued candidate.
    /// Returns false when there was no resource.
    pub fn close(&mut self) -> bool {
        self.waiting.clear();
        match self.attempt.take() {
            Some(attempt) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                info!("Closing connection resource for attempt {}", attempt.generation);
                true
            }
            None => false,
        }
    }

    fn submit(&mut self, op: Op) -> u64 {
        let generation = self.create();
        if let Some(attempt) = &self.attempt {
            let _ = attempt.ops.send(op);
        }
        generation
    }
}

async fn run_attempt(
    engine: Arc<dyn MediaEngine>,
    sink: EngineSink,
    current: Arc<AtomicU64>,
    mut ops: mpsc::UnboundedReceiver<Op>,
) {
    let generation = sink.generation();
    let connection = match engine.create_connection(sink.clone()).await {
        Ok(connection) => connection,
        Err(e) => {
            warn!("Connection resource for attempt {} failed: {}", generation, e);
            sink.post(AttemptEventKind::ResourceFailed(e));
            return;
        }
    };

    let mut worker = AttemptWorker::new(connection, sink.clone());
    while let Some(op) = ops.recv().await {
        if current.load(Ordering::SeqCst) != generation {
            break;
        }
        worker.run(op).await;
    }

    let result = worker.connection.close().await;
    debug!("Attempt {} released", generation);
    sink.post(AttemptEventKind::Closed(result));
}

struct AttemptWorker {
    connection: Arc<dyn PeerConnection>,
    sink: EngineSink,
    role: Option<Role>,
    remote_applied: bool,
    pending: Vec<IceCandidate>,
    seen: HashSet<IceCandidate>,
    attached: HashSet<String>,
}

impl AttemptWorker {
    fn new(connection: Arc<dyn PeerConnection>, sink: EngineSink) -> Self {
        Self {
            connection,
            sink,
            role: None,
            remote_applied: false,
            pending: Vec::new(),
            seen: HashSet::new(),
            attached: HashSet::new(),
        }
    }

    async fn run(&mut self, op: Op) {
        match op {
            Op::Attach(stream) => self.attach(stream).await,
            Op::CreateOffer => {
                if self.role.is_some() {
                    debug!("Attempt already has a {:?} role, offer skipped", self.role);
                    return;
                }
                self.role = Some(Role::Offerer);
                let result = self.connection.create_local_description(Role::Offerer).await;
                self.sink.post(AttemptEventKind::LocalDescription {
                    role: Role::Offerer,
                    result,
                });
            }
            Op::AcceptOffer(sdp) => {
                if self.role.is_some() {
                    warn!("Offer for an attempt already acting as {:?}, skipped", self.role);
                    return;
                }
                self.role = Some(Role::Answerer);
                if !self.apply_remote(Role::Answerer, sdp).await {
                    return;
                }
                let result = self.connection.create_local_description(Role::Answerer).await;
                self.sink.post(AttemptEventKind::LocalDescription {
                    role: Role::Answerer,
                    result,
                });
            }
            Op::AcceptAnswer(sdp) => {
                if self.role != Some(Role::Offerer) || self.remote_applied {
                    warn!("Unexpected answer for this attempt, skipped");
                    return;
                }
                self.apply_remote(Role::Offerer, sdp).await;
            }
            Op::AddCandidate(candidate) => {
                if !self.seen.insert(candidate.clone()) {
                    debug!("Duplicate remote candidate dropped");
                    return;
                }
                if self.remote_applied {
                    self.apply_candidate(candidate).await;
                } else {
                    self.pending.push(candidate);
                }
            }
        }
    }

    async fn attach(&mut self, stream: LocalStream) {
        for track in stream.tracks {
            let id = track.id().to_owned();
            if self.attached.contains(&id) {
                continue;
            }
            match self.connection.add_track(track).await {
                Ok(()) => {
                    self.attached.insert(id);
                }
                Err(e) => {
                    self.sink.post(AttemptEventKind::ResourceFailed(e));
                    return;
                }
            }
        }
    }

    async fn apply_remote(&mut self, role: Role, sdp: SessionDescription) -> bool {
        match self.connection.apply_remote_description(role, sdp).await {
            Ok(()) => {
                self.remote_applied = true;
                self.sink.post(AttemptEventKind::RemoteDescriptionApplied(Ok(())));
                let pending = std::mem::take(&mut self.pending);
                if !pending.is_empty() {
                    debug!("Flushing {} buffered remote candidates", pending.len());
                }
                for candidate in pending {
                    self.apply_candidate(candidate).await;
                }
                true
            }
            Err(e) => {
                self.sink.post(AttemptEventKind::RemoteDescriptionApplied(Err(e)));
                false
            }
        }
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) {
        if let Err(e) = self.connection.add_ice_candidate(candidate).await {
            self.sink.post(AttemptEventKind::CandidateRejected(e));
        }
    }
}
