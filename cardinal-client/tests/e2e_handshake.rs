mod common;

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{WebSocketUpgrade, ws::Message},
    response::IntoResponse,
    routing::get,
};
use cardinal_client::{
    bootstrap::ConnectionBootstrap,
    bridge::{BridgeError, ServerTransport},
    net::NetTransport,
    surface::{UiSurface, with_surface},
};
use common::{empty_host, host_with_default, server};
use serde_json::json;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};

struct TestServer {
    port: u16,
    shutdown: Vec<oneshot::Sender<()>>,
}

impl TestServer {
    fn stop(self) {
        for tx in self.shutdown {
            let _ = tx.send(());
        }
    }
}

/// Binds two listeners on consecutive ports, request transport first.
async fn bind_port_pair() -> (TcpListener, TcpListener) {
    for _ in 0..50 {
        let http = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral http socket");
        let port = http.local_addr().expect("http local addr").port();
        if port == u16::MAX {
            continue;
        }
        if let Ok(ws) = TcpListener::bind(("127.0.0.1", port + 1)).await {
            return (http, ws);
        }
    }
    panic!("no consecutive free ports found");
}

fn http_router() -> Router {
    Router::new()
        .route("/", get(|| async { "cardinal" }))
        .route(
            "/i18n",
            get(|| async { Json(json!({"settings.title": "Einstellungen"})) }),
        )
}

fn ws_router() -> Router {
    Router::new().route("/", get(ws_handler))
}

/// Echoes every text frame back to the client.
async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket| async move {
        while let Some(Ok(message)) = socket.recv().await {
            match message {
                Message::Text(text) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    })
}

fn spawn(listener: TcpListener, router: Router) -> oneshot::Sender<()> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });
    shutdown_tx
}

async fn start_server(with_stream: bool) -> TestServer {
    let (http, ws) = bind_port_pair().await;
    let port = http.local_addr().expect("http local addr").port();
    let mut shutdown = vec![spawn(http, http_router())];
    if with_stream {
        shutdown.push(spawn(ws, ws_router()));
    } else {
        drop(ws);
    }
    TestServer { port, shutdown }
}

fn transport() -> Arc<NetTransport> {
    Arc::new(NetTransport::new(Duration::from_secs(3)).expect("build transport"))
}

#[tokio::test]
async fn autoconnect_completes_both_phases_against_live_server() {
    let server_handle = start_server(true).await;
    let net = transport();
    let surface = UiSurface::shared();
    let mut bootstrap = ConnectionBootstrap::new(
        net.clone(),
        host_with_default(server("1", "127.0.0.1", server_handle.port)),
        surface.clone(),
    );

    assert!(bootstrap.auto_connect_or_lock().await);
    assert!(bootstrap.state().http_connected());
    assert!(bootstrap.state().ws_connected());
    assert!(net.is_stream_open());
    with_surface(&surface, |surface| {
        assert!(!surface.is_lock_screen_showing());
        assert_eq!(
            surface.strings(),
            Some(&json!({"settings.title": "Einstellungen"}))
        );
    });

    let mut listener = net.listen("echo");
    net.send("echo", json!({"n": 1})).expect("send over stream");
    let echoed = timeout(Duration::from_secs(3), listener.recv())
        .await
        .expect("echo arrives in time")
        .expect("listener still open");
    assert_eq!(echoed, json!({"n": 1}));

    server_handle.stop();
}

#[tokio::test]
async fn missing_stream_endpoint_leaves_client_unusable() {
    let server_handle = start_server(false).await;
    let net = transport();
    let mut bootstrap = ConnectionBootstrap::new(net.clone(), empty_host(), UiSurface::shared());

    let connected = bootstrap
        .connect_to_server("127.0.0.1", server_handle.port)
        .await
        .expect("endpoint is valid");
    assert!(!connected);
    assert!(bootstrap.state().http_connected());
    assert!(!bootstrap.state().ws_connected());
    assert!(matches!(
        net.send("echo", json!(null)),
        Err(BridgeError::StreamClosed)
    ));

    let response = net.http_get("/i18n").await.expect("request transport still up");
    assert_eq!(response.status, 200);

    server_handle.stop();
}

#[tokio::test]
async fn unreachable_server_locks_after_autoconnect() {
    let (http, ws) = bind_port_pair().await;
    let port = http.local_addr().expect("http local addr").port();
    drop(http);
    drop(ws);

    let surface = UiSurface::shared();
    let mut bootstrap = ConnectionBootstrap::new(
        transport(),
        host_with_default(server("1", "127.0.0.1", port)),
        surface.clone(),
    );

    assert!(!bootstrap.auto_connect_or_lock().await);
    assert!(!bootstrap.state().http_connected());
    assert!(with_surface(&surface, |surface| surface.is_lock_screen_showing()));
}
