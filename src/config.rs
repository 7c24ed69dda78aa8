use std::net::SocketAddr;

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8080";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub signaling_url: String,
    pub ice_servers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_owned(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_owned()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}
