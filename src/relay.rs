//! Broadcast relay sitting between the simulator and controllers: every frame
//! of a known type is forwarded to all other connected clients.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

pub type ClientId = u64;

/// Frame types the relay forwards.
pub const RELAYED_TYPES: [&str; 4] = ["state", "control", "config", "reset"];

/// Connected clients keyed by id, each reached through its outbound queue.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_id: ClientId,
    clients: HashMap<ClientId, mpsc::UnboundedSender<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, outbound: mpsc::UnboundedSender<String>) -> ClientId {
        self.next_id += 1;
        let id = self.next_id;
        self.clients.insert(id, outbound);
        id
    }

    pub fn remove(&mut self, id: ClientId) -> bool {
        self.clients.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Queues `frame` for every client except `sender`; clients whose queue is
    /// closed are dropped. Returns the number of recipients.
    pub fn broadcast_except(&mut self, sender: ClientId, frame: &str) -> usize {
        let mut delivered = 0;
        self.clients.retain(|id, outbound| {
            if *id == sender {
                return true;
            }
            if outbound.send(frame.to_owned()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        delivered
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Verdict {
    Forward(String),
    Unknown(Option<String>),
    Invalid,
}

/// Decides what to do with one inbound frame.
pub fn classify(frame: &str) -> Verdict {
    let Ok(value) = serde_json::from_str::<Value>(frame) else {
        return Verdict::Invalid;
    };
    match value.get("type").and_then(Value::as_str) {
        Some(kind) if RELAYED_TYPES.contains(&kind) => Verdict::Forward(kind.to_owned()),
        other => Verdict::Unknown(other.map(str::to_owned)),
    }
}

pub type SharedRegistry = Arc<Mutex<SessionRegistry>>;

/// Accepts clients until the listener fails.
pub async fn serve(listener: TcpListener, registry: SharedRegistry) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "relay listening");
    }
    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(handle_client(stream, peer, Arc::clone(&registry)));
    }
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, registry: SharedRegistry) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(err) => {
            warn!(%peer, %err, "websocket handshake failed");
            return;
        }
    };
    let (mut writer, mut reader) = socket.split();
    let (outbound, mut queue) = mpsc::unbounded_channel::<String>();
    let id = {
        let mut registry = registry.lock().await;
        let id = registry.register(outbound);
        info!(client = id, %peer, total = registry.len(), "client connected");
        id
    };

    let forward = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if writer.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = reader.next().await {
        let frame = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(client = id, %err, "read failed");
                break;
            }
        };
        match classify(&frame) {
            Verdict::Forward(kind) => {
                let delivered = registry.lock().await.broadcast_except(id, &frame);
                if kind == "state" || kind == "control" {
                    debug!(client = id, kind = %kind, delivered, "relayed");
                } else {
                    info!(client = id, kind = %kind, delivered, "relayed");
                }
            }
            Verdict::Unknown(kind) => warn!(client = id, ?kind, "unknown message type"),
            Verdict::Invalid => error!(client = id, frame = %frame, "invalid JSON"),
        }
    }

    forward.abort();
    let mut registry = registry.lock().await;
    registry.remove(id);
    info!(client = id, total = registry.len(), "client removed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_skips_sender() {
        let mut registry = SessionRegistry::new();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let (c_tx, mut c_rx) = mpsc::unbounded_channel();
        let a = registry.register(a_tx);
        registry.register(b_tx);
        registry.register(c_tx);

        assert_eq!(registry.broadcast_except(a, "hello"), 2);
        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.try_recv().ok().as_deref(), Some("hello"));
        assert_eq!(c_rx.try_recv().ok().as_deref(), Some("hello"));
    }

    #[test]
    fn closed_clients_are_pruned() {
        let mut registry = SessionRegistry::new();
        let (a_tx, _a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = registry.register(a_tx);
        registry.register(b_tx);
        drop(b_rx);
        assert_eq!(registry.broadcast_except(a, "frame"), 0);
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(a));
        assert!(registry.is_empty());
    }

    #[test]
    fn classify_sorts_frames() {
        assert_eq!(
            classify(r#"{"type":"control","thrust":0.5}"#),
            Verdict::Forward(String::from("control"))
        );
        assert_eq!(
            classify(r#"{"type":"telemetry"}"#),
            Verdict::Unknown(Some(String::from("telemetry")))
        );
        assert_eq!(classify(r#"{"thrust":0.5}"#), Verdict::Unknown(None));
        assert_eq!(classify("{oops"), Verdict::Invalid);
    }

    #[tokio::test]
    async fn relays_between_websocket_clients() -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let registry: SharedRegistry = Arc::default();
        let server = tokio::spawn(serve(listener, Arc::clone(&registry)));

        let url = format!("ws://{addr}");
        let (mut simulator, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut controller, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        while registry.lock().await.len() < 2 {
            tokio::task::yield_now().await;
        }

        controller
            .send(Message::Text(String::from(r#"{"type":"mystery"}"#)))
            .await?;
        controller
            .send(Message::Text(String::from(r#"{"type":"reset","timestamp":1}"#)))
            .await?;
        let received = simulator.next().await.ok_or("simulator stream ended")??;
        assert_eq!(received, Message::Text(String::from(r#"{"type":"reset","timestamp":1}"#)));

        server.abort();
        Ok(())
    }
}
