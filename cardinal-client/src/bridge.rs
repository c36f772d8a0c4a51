//! The transport bridge the client consumes.
//!
//! The server side (request/response reachability plus the streaming upgrade)
//! and the host-process side (ask/say/listen) are separate traits so either can
//! be swapped out in tests.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    RequestResponse,
    Stream,
}

impl TransportKind {
    pub fn scheme(&self) -> &'static str {
        match self {
            TransportKind::RequestResponse => "http://",
            TransportKind::Stream => "ws://",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::RequestResponse => f.write_str("request-response"),
            TransportKind::Stream => f.write_str("stream"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub scheme: &'static str,
}

impl Endpoint {
    pub fn new(kind: TransportKind, host: &str, port: u16) -> Self {
        Self {
            host: host.to_owned(),
            port,
            scheme: kind.scheme(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}{}:{}/", self.scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{kind} transport unreachable at {url}: {reason}")]
    Unreachable {
        kind: TransportKind,
        url: String,
        reason: String,
    },
    #[error("{kind} transport timed out after {secs}s")]
    Timeout { kind: TransportKind, secs: u64 },
    #[error("request transport is not connected")]
    NotConnected,
    #[error("stream transport is closed")]
    StreamClosed,
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("host channel {channel} failed: {reason}")]
    Host { channel: String, reason: String },
    #[error("unsupported host channel {0}")]
    UnsupportedChannel(String),
}

/// Server-facing half of the bridge.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Opens the given transport. Any error means the transport is not up.
    async fn init(&self, kind: TransportKind, endpoint: Endpoint) -> Result<(), BridgeError>;

    /// GET against the request/response transport opened by `init`.
    async fn http_get(&self, path: &str) -> Result<HttpResponse, BridgeError>;

    /// Pushes a message down the streaming transport.
    fn send(&self, channel: &str, payload: Value) -> Result<(), BridgeError>;
}

/// Host-process half of the bridge.
#[async_trait]
pub trait HostChannel: Send + Sync {
    async fn ask(&self, channel: &str, payload: Value) -> Result<Value, BridgeError>;

    /// Fire-and-forget signal.
    fn say(&self, channel: &str, payload: Value);

    fn listen(&self, channel: &str) -> Listener;

    fn remove_listener(&self, channel: &str, id: ListenerId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug)]
pub struct Listener {
    pub id: ListenerId,
    pub rx: mpsc::UnboundedReceiver<Value>,
}

impl Listener {
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

/// Per-channel subscriber lists shared by bridge implementations.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    channels: Mutex<HashMap<String, Vec<(ListenerId, mpsc::UnboundedSender<Value>)>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(&self, channel: &str) -> Listener {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.to_owned())
            .or_default()
            .push((id, tx));
        Listener { id, rx }
    }

    pub fn remove(&self, channel: &str, id: ListenerId) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(listeners) = channels.get_mut(channel) {
            listeners.retain(|(listener_id, _)| *listener_id != id);
            if listeners.is_empty() {
                channels.remove(channel);
            }
        }
    }

    /// Delivers `payload` to every live listener on `channel` and returns how
    /// many received it. Listeners whose receiver was dropped are pruned.
    pub fn emit(&self, channel: &str, payload: &Value) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(listeners) = channels.get_mut(channel) else {
            return 0;
        };
        listeners.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        listeners.len()
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, Vec::len)
    }
}
