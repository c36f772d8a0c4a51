#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use cardinal_client::{
    bridge::{BridgeError, Endpoint, HttpResponse, ServerTransport, TransportKind},
    host::{HostDocument, LocalHost},
};
use cardinal_core::{ServerRecord, keys};
use serde_json::{Value, json};

/// Scripted `ServerTransport` that counts every call.
#[derive(Default)]
pub struct FakeTransport {
    pub http_inits: AtomicUsize,
    pub stream_inits: AtomicUsize,
    pub http_gets: AtomicUsize,
    pub sends: AtomicUsize,
    fail_http: bool,
    fail_stream: bool,
    i18n: Option<(u16, Value)>,
    endpoints: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn reachable() -> Self {
        Self {
            i18n: Some((200, json!({"settings.title": "Settings"}))),
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            fail_http: true,
            ..Self::default()
        }
    }

    pub fn without_stream() -> Self {
        Self {
            fail_stream: true,
            ..Self::reachable()
        }
    }

    pub fn with_i18n(mut self, status: u16, body: Value) -> Self {
        self.i18n = Some((status, body));
        self
    }

    pub fn total_calls(&self) -> usize {
        self.http_inits.load(Ordering::SeqCst)
            + self.stream_inits.load(Ordering::SeqCst)
            + self.http_gets.load(Ordering::SeqCst)
            + self.sends.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServerTransport for FakeTransport {
    async fn init(&self, kind: TransportKind, endpoint: Endpoint) -> Result<(), BridgeError> {
        self.endpoints.lock().unwrap().push(endpoint.base_url());
        let fail = match kind {
            TransportKind::RequestResponse => {
                self.http_inits.fetch_add(1, Ordering::SeqCst);
                self.fail_http
            }
            TransportKind::Stream => {
                self.stream_inits.fetch_add(1, Ordering::SeqCst);
                self.fail_stream
            }
        };
        if fail {
            return Err(BridgeError::Unreachable {
                kind,
                url: endpoint.base_url(),
                reason: "connection refused".to_owned(),
            });
        }
        Ok(())
    }

    async fn http_get(&self, path: &str) -> Result<HttpResponse, BridgeError> {
        self.http_gets.fetch_add(1, Ordering::SeqCst);
        match (&self.i18n, path) {
            (Some((status, body)), "/i18n") => Ok(HttpResponse {
                status: *status,
                body: body.clone(),
            }),
            _ => Ok(HttpResponse {
                status: 404,
                body: Value::Null,
            }),
        }
    }

    fn send(&self, _channel: &str, _payload: Value) -> Result<(), BridgeError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn server(id: &str, host: &str, port: u16) -> ServerRecord {
    ServerRecord {
        id: id.to_owned(),
        host: host.to_owned(),
        http_port: port,
    }
}

/// Host with `server` stored and remembered as the default.
pub fn host_with_default(server: ServerRecord) -> Arc<LocalHost> {
    let mut document = HostDocument::default();
    document
        .options
        .insert(keys::DEFAULT_SERVER.to_owned(), Value::String(server.id.clone()));
    document.servers.push(server);
    Arc::new(LocalHost::in_memory(document))
}

pub fn empty_host() -> Arc<LocalHost> {
    Arc::new(LocalHost::in_memory(HostDocument::default()))
}
