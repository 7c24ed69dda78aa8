use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use webrtc_pair::config::{DEFAULT_SIGNALING_URL, DEFAULT_STUN_SERVER};
use webrtc_pair::{RoomSession, SessionConfig, SilentCapture, WebRtcEngine, WsSignalTransport};

/// Join a room on a rendezvous relay and hold a call with the other member.
#[derive(Debug, Parser)]
#[command(name = "webrtc-pair", version)]
struct Args {
    /// Room to join
    #[arg(long, env = "PAIR_ROOM")]
    room: String,

    /// WebSocket URL of the rendezvous relay
    #[arg(long, env = "PAIR_SIGNALING_URL", default_value = DEFAULT_SIGNALING_URL)]
    signaling_url: String,

    /// STUN servers, comma separated
    #[arg(
        long,
        env = "PAIR_ICE_SERVERS",
        value_delimiter = ',',
        default_value = DEFAULT_STUN_SERVER
    )]
    ice_servers: Vec<String>,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            signaling_url: self.signaling_url.clone(),
            ice_servers: self.ice_servers.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.session_config();

    let engine = WebRtcEngine::new(config.ice_servers.clone()).context("media engine setup")?;
    let transport = WsSignalTransport::new(config.signaling_url.clone());
    let session = RoomSession::new(
        Arc::new(transport),
        Arc::new(engine),
        &SilentCapture::default(),
    )
    .await;

    session
        .join(args.room.clone())
        .await
        .with_context(|| format!("joining room {}", args.room))?;

    let mut status = session.subscribe();
    let mut remote = session.subscribe_remote();
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                info!("Status: {}", *status.borrow());
            }
            changed = remote.changed() => {
                if changed.is_err() {
                    break;
                }
                match &*remote.borrow() {
                    Some(stream) => info!("Receiving remote tracks {:?}", stream.track_ids()),
                    None => info!("Remote media detached"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, leaving room");
                break;
            }
        }
    }

    if let Err(e) = session.leave().await {
        warn!("Leave failed: {}", e);
    }
    Ok(())
}
