use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use webrtc_pair::config::DEFAULT_RELAY_ADDR;
use webrtc_pair::{Relay, RelayConfig};

/// Rendezvous relay pairing two members per room.
#[derive(Debug, Parser)]
#[command(name = "webrtc-pair-relay", version)]
struct Args {
    /// Address to accept WebSocket connections on
    #[arg(long, env = "PAIR_RELAY_ADDR", default_value = DEFAULT_RELAY_ADDR)]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = RelayConfig {
        listen_addr: args.listen,
    };
    let relay = Relay::bind(&config)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;

    tokio::select! {
        served = relay.serve() => served.context("relay stopped")?,
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(())
}
