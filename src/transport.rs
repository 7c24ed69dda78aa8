use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::signaling::{SignalKind, SignalMessage};

pub type SignalHandler = Arc<dyn Fn(SignalMessage) + Send + Sync>;
pub type DisconnectHandler = Arc<dyn Fn(TransportError) + Send + Sync>;

/// Persistent channel to the rendezvous relay.
///
/// Delivery order to handlers matches the relay's delivery order. There is
/// no retry here: an unexpected loss of the channel is reported once through
/// the disconnect handler and recovery is left to the caller.
#[async_trait]
pub trait SignalTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn send(&self, message: SignalMessage) -> Result<(), TransportError>;

    /// Registers the handler for one message kind, replacing any previous one.
    fn subscribe(&self, kind: SignalKind, handler: SignalHandler);

    fn on_disconnect(&self, handler: DisconnectHandler);

    /// Releases the channel. Calling it again, or before `connect`, is a no-op.
    async fn disconnect(&self);
}

/// Handler table shared between a transport and its reader task.
#[derive(Default)]
pub struct Subscribers {
    by_kind: StdMutex<HashMap<SignalKind, SignalHandler>>,
    disconnect: StdMutex<Option<DisconnectHandler>>,
}

impl Subscribers {
    pub fn insert(&self, kind: SignalKind, handler: SignalHandler) {
        if let Ok(mut handlers) = self.by_kind.lock() {
            handlers.insert(kind, handler);
        }
    }

    pub fn set_disconnect(&self, handler: DisconnectHandler) {
        if let Ok(mut slot) = self.disconnect.lock() {
            *slot = Some(handler);
        }
    }

    /// Hands a message to the handler registered for its kind.
    /// Returns false when nobody subscribed to that kind.
    pub fn dispatch(&self, message: SignalMessage) -> bool {
        let handler = match self.by_kind.lock() {
            Ok(handlers) => handlers.get(&message.kind()).cloned(),
            Err(_) => None,
        };
        match handler {
            Some(handler) => {
                handler(message);
                true
            }
            None => false,
        }
    }

    pub fn disconnected(&self, error: TransportError) {
        let handler = match self.disconnect.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        if let Some(handler) = handler {
            handler(error);
        }
    }
}

struct Link {
    outgoing: mpsc::Sender<SignalMessage>,
    closing: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

/// [`SignalTransport`] over a WebSocket, one JSON text frame per message.
pub struct WsSignalTransport {
    url: String,
    subscribers: Arc<Subscribers>,
    link: Mutex<Option<Link>>,
}

impl WsSignalTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subscribers: Arc::new(Subscribers::default()),
            link: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SignalTransport for WsSignalTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        if let Some(existing) = link.as_ref() {
            if !existing.reader.is_finished() {
                return Ok(());
            }
        }

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", self.url, e)))?;
        info!("Connected to signaling relay at {}", self.url);
        let (mut write, mut read) = ws_stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<SignalMessage>(100);
        let closing = Arc::new(AtomicBool::new(false));

        // Handle outgoing messages
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let json = match msg.encode() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Dropping unencodable {} message: {}", msg.kind(), e);
                        continue;
                    }
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Handle incoming messages
        let subscribers = self.subscribers.clone();
        let reader_closing = closing.clone();
        let reader = tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => match SignalMessage::decode(&text) {
                        Ok(signal) => {
                            debug!("Received {} from relay", signal.kind());
                            let kind = signal.kind();
                            if !subscribers.dispatch(signal) {
                                debug!("No handler for {}, dropped", kind);
                            }
                        }
                        Err(e) => warn!("Rejected signaling frame: {}", e),
                    },
                    Some(Ok(Message::Close(_))) => {
                        break TransportError::Disconnected("relay closed the connection".into())
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break TransportError::WebSocket(e),
                    None => break TransportError::Disconnected("connection ended".into()),
                }
            };
            if !reader_closing.load(Ordering::SeqCst) {
                warn!("Signaling transport lost: {}", reason);
                subscribers.disconnected(reason);
            }
        });

        *link = Some(Link {
            outgoing: outgoing_tx,
            closing,
            reader,
        });
        Ok(())
    }

    async fn send(&self, message: SignalMessage) -> Result<(), TransportError> {
        let outgoing = match self.link.lock().await.as_ref() {
            Some(link) => link.outgoing.clone(),
            None => return Err(TransportError::NotConnected),
        };
        outgoing
            .send(message)
            .await
            .map_err(|e| TransportError::Disconnected(format!("failed to send message: {}", e)))
    }

    fn subscribe(&self, kind: SignalKind, handler: SignalHandler) {
        self.subscribers.insert(kind, handler);
    }

    fn on_disconnect(&self, handler: DisconnectHandler) {
        self.subscribers.set_disconnect(handler);
    }

    async fn disconnect(&self) {
        if let Some(link) = self.link.lock().await.take() {
            link.closing.store(true, Ordering::SeqCst);
            drop(link.outgoing);
            link.reader.abort();
            info!("Disconnected from signaling relay");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn send_before_connect_is_rejected() {
        let transport = WsSignalTransport::new("ws://127.0.0.1:1");
        let err = transport.send(SignalMessage::Ready).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        transport.disconnect().await;
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn unreachable_relay_fails_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let transport = WsSignalTransport::new(format!("ws://{}", addr));
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }

    #[test]
    fn dispatch_routes_by_kind() {
        let subscribers = Subscribers::default();
        let ready = Arc::new(AtomicUsize::new(0));
        let counter = ready.clone();
        subscribers.insert(
            SignalKind::Ready,
            Arc::new(move |_: SignalMessage| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(subscribers.dispatch(SignalMessage::Ready));
        assert!(!subscribers.dispatch(SignalMessage::PeerLeft));
        assert_eq!(ready.load(Ordering::SeqCst), 1);
    }
}
