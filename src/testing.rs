//! Scriptable collaborators for driving sessions without a network or media stack.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep, timeout};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::capture::{LocalStream, LocalTrack, MediaCapture};
use crate::connection::Role;
use crate::engine::{MediaEngine, PeerConnection};
use crate::error::{CaptureError, EngineError, TransportError};
use crate::event::{AttemptEvent, EngineSink, Event};
use crate::relay::{MemberId, Rooms};
use crate::signaling::{IceCandidate, SessionDescription, SignalKind, SignalMessage};
use crate::transport::{DisconnectHandler, SignalHandler, SignalTransport, Subscribers};

const WAIT: Duration = Duration::from_secs(2);

pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let polled = timeout(WAIT, async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {}", what);
}

pub async fn next_attempt_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> AttemptEvent {
    loop {
        match timeout(WAIT, rx.recv()).await {
            Ok(Some(Event::Attempt(event))) => return event,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("event queue closed"),
            Err(_) => panic!("timed out waiting for an attempt event"),
        }
    }
}

pub fn local_stream(track_ids: &[&str]) -> LocalStream {
    let tracks = track_ids
        .iter()
        .map(|id| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: "audio/opus".to_owned(),
                    ..Default::default()
                },
                (*id).to_owned(),
                "test-stream".to_owned(),
            )) as LocalTrack
        })
        .collect();
    LocalStream::new("test-stream", tracks)
}

pub struct FakeCapture {
    pub result: Result<LocalStream, CaptureError>,
}

impl FakeCapture {
    pub fn working() -> Self {
        Self {
            result: Ok(local_stream(&["audio", "video"])),
        }
    }

    pub fn denied() -> Self {
        Self {
            result: Err(CaptureError::PermissionDenied("camera blocked".into())),
        }
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn local_stream(&self) -> Result<LocalStream, CaptureError> {
        self.result.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    AddTrack(String),
    CreateLocal(Role),
    ApplyRemote(Role, String),
    AddCandidate(String),
}

/// Descriptions equal to this, and candidates starting with it, are rejected.
pub const MALFORMED: &str = "malformed";

pub struct FakeConnection {
    index: usize,
    calls: Mutex<Vec<EngineCall>>,
    closes: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn add_track(&self, track: LocalTrack) -> Result<(), EngineError> {
        self.record(EngineCall::AddTrack(track.id().to_owned()));
        Ok(())
    }

    async fn create_local_description(
        &self,
        role: Role,
    ) -> Result<SessionDescription, EngineError> {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.record(EngineCall::CreateLocal(role));
        Ok(SessionDescription(format!("{} sdp #{}", role, self.index)))
    }

    async fn apply_remote_description(
        &self,
        role: Role,
        sdp: SessionDescription,
    ) -> Result<(), EngineError> {
        self.record(EngineCall::ApplyRemote(role, sdp.0.clone()));
        if sdp.0 == MALFORMED {
            return Err(EngineError::InvalidDescription(sdp.0));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.record(EngineCall::AddCandidate(candidate.candidate.clone()));
        if candidate.candidate.starts_with(MALFORMED) {
            return Err(EngineError::InvalidCandidate(candidate.candidate));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl FakeConnection {
    fn record(&self, call: EngineCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[derive(Default)]
struct EngineState {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    sinks: Mutex<Vec<EngineSink>>,
    fail_create: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

/// In-memory [`MediaEngine`] recording every call per connection.
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Holds local description creation on connections created from now on.
    pub fn hold_local_descriptions(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        if let Ok(mut slot) = self.state.gate.lock() {
            *slot = Some(gate.clone());
        }
        gate
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn calls(&self, index: usize) -> Vec<EngineCall> {
        self.connection(index)
            .and_then(|c| c.calls.lock().ok().map(|calls| calls.clone()))
            .unwrap_or_default()
    }

    pub fn close_count(&self, index: usize) -> usize {
        self.connection(index)
            .map(|c| c.closes.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn total_closes(&self) -> usize {
        (0..self.connection_count()).map(|i| self.close_count(i)).sum()
    }

    pub fn sink(&self, index: usize) -> Option<EngineSink> {
        self.state.sinks.lock().ok().and_then(|s| s.get(index).cloned())
    }

    pub async fn wait_for_connections(&self, count: usize) {
        eventually("connections", || self.connection_count() >= count).await;
    }

    pub async fn wait_for_calls(&self, index: usize, count: usize) {
        eventually("engine calls", || self.calls(index).len() >= count).await;
    }

    fn connection(&self, index: usize) -> Option<Arc<FakeConnection>> {
        self.state
            .connections
            .lock()
            .ok()
            .and_then(|c| c.get(index).cloned())
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn create_connection(
        &self,
        sink: EngineSink,
    ) -> Result<Arc<dyn PeerConnection>, EngineError> {
        if self.state.fail_create.load(Ordering::SeqCst) {
            return Err(EngineError::Create("no ICE agent".into()));
        }
        let gate = self.state.gate.lock().ok().and_then(|g| g.clone());
        let mut connections = self
            .state
            .connections
            .lock()
            .map_err(|_| EngineError::Create("poisoned".into()))?;
        let connection = Arc::new(FakeConnection {
            index: connections.len(),
            calls: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            gate,
        });
        connections.push(connection.clone());
        if let Ok(mut sinks) = self.state.sinks.lock() {
            sinks.push(sink);
        }
        Ok(connection)
    }
}

#[derive(Default)]
struct TransportState {
    subscribers: Subscribers,
    sent: Mutex<Vec<SignalMessage>>,
    connected: AtomicBool,
    unreachable: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

/// [`SignalTransport`] that records outbound messages and lets a test play
/// the relay's part by hand.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<TransportState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn deliver(&self, message: SignalMessage) {
        assert!(self.state.subscribers.dispatch(message), "no subscriber");
    }

    /// Simulates the relay connection dropping underneath the session.
    pub fn drop_link(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
        self.state
            .subscribers
            .disconnected(TransportError::Disconnected("reset by peer".into()));
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SignalMessage> {
        self.state.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_of(&self, kind: SignalKind) -> Vec<SignalMessage> {
        self.sent().into_iter().filter(|m| m.kind() == kind).collect()
    }

    pub async fn wait_for_sent(&self, kind: SignalKind, count: usize) {
        eventually(kind.as_str(), || self.sent_of(kind).len() >= count).await;
    }
}

#[async_trait]
impl SignalTransport for FakeTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("ws://relay.invalid".into()));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: SignalMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if let Ok(mut sent) = self.state.sent.lock() {
            sent.push(message);
        }
        Ok(())
    }

    fn subscribe(&self, kind: SignalKind, handler: SignalHandler) {
        self.state.subscribers.insert(kind, handler);
    }

    fn on_disconnect(&self, handler: DisconnectHandler) {
        self.state.subscribers.set_disconnect(handler);
    }

    async fn disconnect(&self) {
        if self.state.connected.swap(false, Ordering::SeqCst) {
            self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }
}

static NEXT_MEMBER: AtomicU64 = AtomicU64::new(1);

/// [`SignalTransport`] wired straight into an in-process [`Rooms`] table.
pub struct LoopbackTransport {
    rooms: Arc<Rooms>,
    member: MemberId,
    subscribers: Arc<Subscribers>,
    outbox: Mutex<Option<mpsc::UnboundedSender<SignalMessage>>>,
}

impl LoopbackTransport {
    pub fn new(rooms: Arc<Rooms>) -> Self {
        Self {
            rooms,
            member: NEXT_MEMBER.fetch_add(1, Ordering::SeqCst),
            subscribers: Arc::new(Subscribers::default()),
            outbox: Mutex::new(None),
        }
    }

    fn outbox(&self) -> Option<mpsc::UnboundedSender<SignalMessage>> {
        self.outbox.lock().ok().and_then(|o| o.clone())
    }
}

#[async_trait]
impl SignalTransport for LoopbackTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.outbox().is_some() {
            return Ok(());
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<SignalMessage>();
        let subscribers = self.subscribers.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                subscribers.dispatch(message);
            }
        });
        if let Ok(mut outbox) = self.outbox.lock() {
            *outbox = Some(tx);
        }
        Ok(())
    }

    async fn send(&self, message: SignalMessage) -> Result<(), TransportError> {
        let outbox = self.outbox().ok_or(TransportError::NotConnected)?;
        self.rooms
            .handle(self.member, &outbox, message)
            .map_err(|e| TransportError::Disconnected(e.to_string()))
    }

    fn subscribe(&self, kind: SignalKind, handler: SignalHandler) {
        self.subscribers.insert(kind, handler);
    }

    fn on_disconnect(&self, handler: DisconnectHandler) {
        self.subscribers.set_disconnect(handler);
    }

    async fn disconnect(&self) {
        let taken = self.outbox.lock().ok().and_then(|mut o| o.take());
        if taken.is_some() {
            self.rooms.leave(self.member);
        }
    }
}
