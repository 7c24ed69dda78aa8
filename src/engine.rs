use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as CodecRegistry;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::capture::LocalTrack;
use crate::connection::{RemoteTrack, Role};
use crate::error::EngineError;
use crate::event::{EngineEvent, EngineSink, PeerState};
use crate::signaling::{IceCandidate, SessionDescription};

/// Media-transport engine collaborator: hands out connection resources.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Creates a connection whose callbacks are posted through `sink`.
    async fn create_connection(
        &self,
        sink: EngineSink,
    ) -> Result<Arc<dyn PeerConnection>, EngineError>;
}

/// One peer connection resource.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: LocalTrack) -> Result<(), EngineError>;

    /// Creates and installs the local offer (offerer) or answer (answerer).
    async fn create_local_description(&self, role: Role)
        -> Result<SessionDescription, EngineError>;

    /// Installs the peer's description. `role` is the local role, so an
    /// offerer receives an answer and an answerer receives an offer.
    async fn apply_remote_description(
        &self,
        role: Role,
        sdp: SessionDescription,
    ) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    /// Stops every local sender and releases the connection.
    async fn close(&self) -> Result<(), EngineError>;
}

/// [`MediaEngine`] backed by webrtc-rs.
pub struct WebRtcEngine {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcEngine {
    pub fn new(ice_servers: Vec<String>) -> Result<Self, EngineError> {
        // Create a MediaEngine object to configure the supported codec
        let mut media_engine = CodecRegistry::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_connection(
        &self,
        sink: EngineSink,
    ) -> Result<Arc<dyn PeerConnection>, EngineError> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let peer_connection = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(|e| EngineError::Create(e.to_string()))?,
        );

        let candidates = sink.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = candidates.clone();
            Box::pin(async move {
                // None marks the end of gathering.
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete (attempt {})", sink.generation());
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => sink.emit(EngineEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    })),
                    Err(e) => warn!("Local candidate not serializable: {}", e),
                }
            })
        }));

        // Set up track handling
        let tracks = sink.clone();
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let remote = RemoteTrack {
                id: track.id(),
                stream_id: track.stream_id(),
                kind: track.kind().into(),
                handle: Some(track),
            };
            info!("Remote {:?} track {} arrived", remote.kind, remote.id);
            tracks.emit(EngineEvent::RemoteTrack(remote));
            Box::pin(async {})
        }));

        // Set up connection state monitoring
        let states = sink;
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                debug!("Peer Connection State has changed: {}", s);
                states.emit(EngineEvent::PeerState(PeerState::from(s)));
                Box::pin(async {})
            },
        ));

        Ok(Arc::new(WebRtcConnection { peer_connection }))
    }
}

struct WebRtcConnection {
    peer_connection: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn add_track(&self, track: LocalTrack) -> Result<(), EngineError> {
        self.peer_connection.add_track(track).await?;
        Ok(())
    }

    async fn create_local_description(
        &self,
        role: Role,
    ) -> Result<SessionDescription, EngineError> {
        let description = match role {
            Role::Offerer => self.peer_connection.create_offer(None).await?,
            Role::Answerer => self.peer_connection.create_answer(None).await?,
        };
        self.peer_connection
            .set_local_description(description.clone())
            .await?;
        Ok(SessionDescription(description.sdp))
    }

    async fn apply_remote_description(
        &self,
        role: Role,
        sdp: SessionDescription,
    ) -> Result<(), EngineError> {
        let description = match role {
            Role::Offerer => RTCSessionDescription::answer(sdp.0),
            Role::Answerer => RTCSessionDescription::offer(sdp.0),
        }
        .map_err(|e| EngineError::InvalidDescription(e.to_string()))?;
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| EngineError::InvalidDescription(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        let candidate_init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(candidate_init)
            .await
            .map_err(|e| EngineError::InvalidCandidate(e.to_string()))
    }

    async fn close(&self) -> Result<(), EngineError> {
        for sender in self.peer_connection.get_senders().await {
            if let Err(e) = sender.stop().await {
                debug!("Sender stop failed: {}", e);
            }
        }
        self.peer_connection
            .close()
            .await
            .map_err(|e| EngineError::Close(e.to_string()))
    }
}
