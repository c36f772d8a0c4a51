use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::bridge::{
    BridgeError, Endpoint, HttpResponse, Listener, ListenerId, ListenerRegistry, ServerTransport,
    TransportKind,
};

/// Channel used for stream messages that don't carry their own channel name.
pub const STREAM_CHANNEL: &str = "stream";

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

#[derive(Debug, Serialize, Deserialize)]
struct StreamEnvelope {
    channel: String,
    #[serde(default)]
    payload: Value,
}

struct StreamSession {
    outbound: mpsc::UnboundedSender<Message>,
    send_task: JoinHandle<()>,
    receive_task: JoinHandle<()>,
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.send_task.abort();
        self.receive_task.abort();
    }
}

/// Network-backed server transport: HTTP for reachability and requests,
/// WebSocket for the push channel.
pub struct NetTransport {
    client: reqwest::Client,
    connect_timeout: Duration,
    base_url: Mutex<Option<Url>>,
    stream: Mutex<Option<StreamSession>>,
    listeners: Arc<ListenerRegistry>,
}

impl NetTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(connect_timeout)
            .build()
            .map_err(|err| BridgeError::Request(err.to_string()))?;
        Ok(Self {
            client,
            connect_timeout,
            base_url: Mutex::new(None),
            stream: Mutex::new(None),
            listeners: Arc::new(ListenerRegistry::new()),
        })
    }

    /// Subscribes to messages pushed by the server over the stream.
    pub fn listen(&self, channel: &str) -> Listener {
        self.listeners.listen(channel)
    }

    pub fn remove_listener(&self, channel: &str, id: ListenerId) {
        self.listeners.remove(channel, id);
    }

    pub fn is_stream_open(&self) -> bool {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|session| !session.outbound.is_closed())
    }

    fn parse_url(endpoint: &Endpoint) -> Result<Url, BridgeError> {
        let raw = endpoint.base_url();
        Url::parse(&raw).map_err(|err| BridgeError::InvalidUrl {
            url: raw,
            reason: err.to_string(),
        })
    }

    async fn init_request_response(&self, endpoint: &Endpoint) -> Result<(), BridgeError> {
        let kind = TransportKind::RequestResponse;
        *self.base_url.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let url = Self::parse_url(endpoint)?;
        let response = timeout(self.connect_timeout, self.client.get(url.clone()).send())
            .await
            .map_err(|_| BridgeError::Timeout {
                kind,
                secs: self.connect_timeout.as_secs(),
            })?
            .map_err(|err| BridgeError::Unreachable {
                kind,
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Unreachable {
                kind,
                url: url.to_string(),
                reason: format!("status {status}"),
            });
        }

        info!(url = %url, "request transport reachable");
        *self.base_url.lock().unwrap_or_else(PoisonError::into_inner) = Some(url);
        Ok(())
    }

    async fn init_stream(&self, endpoint: &Endpoint) -> Result<(), BridgeError> {
        let kind = TransportKind::Stream;
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let url = Self::parse_url(endpoint)?;
        let (ws_stream, _) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| BridgeError::Timeout {
                kind,
                secs: self.connect_timeout.as_secs(),
            })?
            .map_err(|err| BridgeError::Unreachable {
                kind,
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        info!(url = %url, "stream transport connected");

        let (write_half, read_half) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
        let send_task = tokio::spawn(stream_send_task(write_half, outbound_rx));
        let receive_task = tokio::spawn(stream_receive_task(read_half, Arc::clone(&self.listeners)));

        *self.stream.lock().unwrap_or_else(PoisonError::into_inner) = Some(StreamSession {
            outbound: outbound_tx,
            send_task,
            receive_task,
        });
        Ok(())
    }
}

#[async_trait]
impl ServerTransport for NetTransport {
    async fn init(&self, kind: TransportKind, endpoint: Endpoint) -> Result<(), BridgeError> {
        match kind {
            TransportKind::RequestResponse => self.init_request_response(&endpoint).await,
            TransportKind::Stream => self.init_stream(&endpoint).await,
        }
    }

    async fn http_get(&self, path: &str) -> Result<HttpResponse, BridgeError> {
        let base = self
            .base_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(BridgeError::NotConnected)?;
        let url = base
            .join(path.trim_start_matches('/'))
            .map_err(|err| BridgeError::InvalidUrl {
                url: format!("{base}{path}"),
                reason: err.to_string(),
            })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| BridgeError::Request(err.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| BridgeError::Request(err.to_string()))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(HttpResponse { status, body })
    }

    fn send(&self, channel: &str, payload: Value) -> Result<(), BridgeError> {
        let envelope = StreamEnvelope {
            channel: channel.to_owned(),
            payload,
        };
        let text = serde_json::to_string(&envelope)
            .map_err(|err| BridgeError::Request(err.to_string()))?;

        let stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        let session = stream.as_ref().ok_or(BridgeError::StreamClosed)?;
        session
            .outbound
            .send(Message::Text(text.into()))
            .map_err(|_| BridgeError::StreamClosed)
    }
}

async fn stream_send_task(
    mut ws_write: futures::stream::SplitSink<WsStream, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound_rx.recv().await {
        if let Err(err) = ws_write.send(message).await {
            warn!("stream send failed: {}", err);
            break;
        }
    }
}

async fn stream_receive_task(
    mut ws_read: futures::stream::SplitStream<WsStream>,
    listeners: Arc<ListenerRegistry>,
) {
    while let Some(next) = ws_read.next().await {
        let message = match next {
            Ok(message) => message,
            Err(err) => {
                warn!("stream read failed: {}", err);
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let delivered = match serde_json::from_str::<StreamEnvelope>(text.as_str()) {
                    Ok(envelope) => listeners.emit(&envelope.channel, &envelope.payload),
                    Err(_) => listeners.emit(STREAM_CHANNEL, &Value::String(text.to_string())),
                };
                debug!(delivered, "stream message received");
            }
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
    info!("stream closed");
}
