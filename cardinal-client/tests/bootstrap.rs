mod common;

use std::sync::{Arc, atomic::Ordering};

use cardinal_client::{
    bootstrap::{BootstrapError, BootstrapPhase, ConnectionBootstrap},
    bridge::HostChannel,
    surface::{UiSurface, with_surface},
};
use cardinal_core::{
    CHANNEL_GET_OPTION, ConnectionState, CoreError, LockReason, keys,
};
use common::{FakeTransport, empty_host, host_with_default, server};
use serde_json::{Value, json};

fn bootstrap_with(
    transport: &Arc<FakeTransport>,
    host: Arc<dyn HostChannel>,
) -> ConnectionBootstrap {
    ConnectionBootstrap::new(transport.clone(), host, UiSurface::shared())
}

#[tokio::test]
async fn invalid_endpoints_fail_before_any_transport_call() {
    let transport = Arc::new(FakeTransport::reachable());
    let mut bootstrap = bootstrap_with(&transport, empty_host());

    assert_eq!(
        bootstrap.connect_to_server("", 7000).await,
        Err(BootstrapError::Validation(CoreError::MissingHost))
    );
    assert_eq!(
        bootstrap.connect_to_server("   ", 7000).await,
        Err(BootstrapError::Validation(CoreError::MissingHost))
    );
    assert_eq!(
        bootstrap.connect_to_server("media.local", 0).await,
        Err(BootstrapError::Validation(CoreError::MissingPort))
    );
    assert_eq!(
        bootstrap.connect_to_server("media.local", u16::MAX).await,
        Err(BootstrapError::Validation(CoreError::StreamPortOutOfRange(u16::MAX)))
    );

    assert_eq!(transport.total_calls(), 0);
    assert_eq!(bootstrap.phase(), BootstrapPhase::Idle);
}

#[tokio::test]
async fn stream_is_not_attempted_after_request_transport_fails() {
    let transport = Arc::new(FakeTransport::unreachable());
    let mut bootstrap = bootstrap_with(&transport, empty_host());

    assert_eq!(bootstrap.connect_to_server("media.local", 7000).await, Ok(false));
    assert_eq!(transport.http_inits.load(Ordering::SeqCst), 1);
    assert_eq!(transport.stream_inits.load(Ordering::SeqCst), 0);
    assert!(!bootstrap.state().http_connected());
    assert!(!bootstrap.state().ws_connected());
    assert_eq!(bootstrap.phase(), BootstrapPhase::HandshakeFailed);
}

#[tokio::test]
async fn stream_uses_the_next_port() {
    let transport = Arc::new(FakeTransport::reachable());
    let mut bootstrap = bootstrap_with(&transport, empty_host());

    assert_eq!(bootstrap.connect_to_server("media.local", 7000).await, Ok(true));
    assert_eq!(
        transport.endpoints(),
        vec![
            "http://media.local:7000/".to_owned(),
            "ws://media.local:7001/".to_owned()
        ]
    );
    assert!(bootstrap.state().is_usable());
    assert_eq!(bootstrap.phase(), BootstrapPhase::Connected);
}

#[tokio::test]
async fn failed_stream_upgrade_leaves_request_transport_up() {
    let transport = Arc::new(FakeTransport::without_stream());
    let mut bootstrap = bootstrap_with(&transport, empty_host());

    assert_eq!(bootstrap.connect_to_server("media.local", 7000).await, Ok(false));
    assert!(bootstrap.state().http_connected());
    assert!(!bootstrap.state().ws_connected());
    assert!(!bootstrap.state().is_usable());
}

#[tokio::test]
async fn already_connected_short_circuits_without_calls() {
    let transport = Arc::new(FakeTransport::reachable());
    let mut state = ConnectionState::new();
    state.mark_http(true);
    state.mark_ws(true).unwrap();
    let surface = UiSurface::shared();
    let mut bootstrap = ConnectionBootstrap::with_state(
        transport.clone(),
        host_with_default(server("1", "media.local", 7000)),
        surface.clone(),
        state,
    );

    assert!(bootstrap.auto_connect_or_lock().await);
    assert!(bootstrap.auto_connect_or_lock().await);
    assert_eq!(transport.total_calls(), 0);
    assert!(!with_surface(&surface, |surface| surface.is_lock_screen_showing()));
}

#[tokio::test]
async fn no_default_server_locks_without_reason() {
    let transport = Arc::new(FakeTransport::reachable());
    let surface = UiSurface::shared();
    let mut bootstrap = ConnectionBootstrap::new(transport.clone(), empty_host(), surface.clone());

    assert!(!bootstrap.auto_connect_or_lock().await);
    assert_eq!(transport.total_calls(), 0);
    assert_eq!(bootstrap.phase(), BootstrapPhase::Locked);
    with_surface(&surface, |surface| {
        let lock = surface.lock_screen().expect("lock screen shown");
        assert_eq!(lock.reason, None);
    });
}

#[tokio::test]
async fn stale_default_server_counts_as_no_default() {
    let host = empty_host();
    host.ask(
        cardinal_core::CHANNEL_SET_OPTION,
        json!({"option": keys::DEFAULT_SERVER, "value": "42"}),
    )
    .await
    .unwrap();
    let transport = Arc::new(FakeTransport::reachable());
    let bootstrap = bootstrap_with(&transport, host);

    assert_eq!(bootstrap.get_default_server().await, None);
}

#[tokio::test]
async fn zero_default_server_id_means_no_default() {
    let host = empty_host();
    host.upsert_server(server("0", "media.local", 7000)).await.unwrap();
    host.upsert_server(server("7", "media.local", 7100)).await.unwrap();
    let transport = Arc::new(FakeTransport::reachable());

    host.ask(
        cardinal_core::CHANNEL_SET_OPTION,
        json!({"option": keys::DEFAULT_SERVER, "value": 0}),
    )
    .await
    .unwrap();
    let bootstrap = bootstrap_with(&transport, host.clone());
    assert_eq!(bootstrap.get_default_server().await, None);

    host.ask(
        cardinal_core::CHANNEL_SET_OPTION,
        json!({"option": keys::DEFAULT_SERVER, "value": 7}),
    )
    .await
    .unwrap();
    assert_eq!(
        bootstrap.get_default_server().await,
        Some(server("7", "media.local", 7100))
    );
}

#[tokio::test]
async fn failed_autoconnect_locks_with_reason() {
    let transport = Arc::new(FakeTransport::unreachable());
    let surface = UiSurface::shared();
    let mut bootstrap = ConnectionBootstrap::new(
        transport.clone(),
        host_with_default(server("1", "media.local", 7000)),
        surface.clone(),
    );

    assert!(!bootstrap.auto_connect_or_lock().await);
    assert_eq!(transport.stream_inits.load(Ordering::SeqCst), 0);
    with_surface(&surface, |surface| {
        let lock = surface.lock_screen().expect("lock screen shown");
        assert_eq!(lock.reason, Some(LockReason::AutoconnectFailed));
    });
}

#[tokio::test]
async fn lock_screen_is_inserted_once() {
    let transport = Arc::new(FakeTransport::reachable());
    let bootstrap = bootstrap_with(&transport, empty_host());

    assert!(bootstrap.show_connection_lock_screen(None));
    assert!(!bootstrap.show_connection_lock_screen(Some(LockReason::AutoconnectFailed)));
    assert!(bootstrap.is_connection_lock_screen_showing());
}

#[tokio::test]
async fn autoconnect_fetches_strings_over_http() {
    let transport = Arc::new(FakeTransport::reachable());
    let surface = UiSurface::shared();
    let mut bootstrap = ConnectionBootstrap::new(
        transport.clone(),
        host_with_default(server("1", "media.local", 7000)),
        surface.clone(),
    );

    assert!(bootstrap.auto_connect_or_lock().await);
    assert_eq!(transport.http_gets.load(Ordering::SeqCst), 1);
    assert_eq!(
        bootstrap.state().active_server().map(|server| server.id.as_str()),
        Some("1")
    );
    with_surface(&surface, |surface| {
        assert_eq!(surface.strings(), Some(&json!({"settings.title": "Settings"})));
        assert!(!surface.is_lock_screen_showing());
    });
}

#[tokio::test]
async fn preloaded_strings_skip_the_http_fetch() {
    let transport = Arc::new(FakeTransport::reachable());
    let surface = UiSurface::shared();
    with_surface(&surface, |surface| surface.set_strings(json!({"from": "host"})));
    let mut bootstrap = ConnectionBootstrap::new(
        transport.clone(),
        host_with_default(server("1", "media.local", 7000)),
        surface.clone(),
    );

    assert!(bootstrap.auto_connect_or_lock().await);
    assert_eq!(transport.http_gets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_strings_route_does_not_fail_the_connection() {
    let transport =
        Arc::new(FakeTransport::reachable().with_i18n(500, Value::String("boom".to_owned())));
    let surface = UiSurface::shared();
    let mut bootstrap = ConnectionBootstrap::new(
        transport.clone(),
        host_with_default(server("1", "media.local", 7000)),
        surface.clone(),
    );

    assert!(bootstrap.auto_connect_or_lock().await);
    assert_eq!(with_surface(&surface, |surface| surface.strings().cloned()), None);
}

#[tokio::test]
async fn manual_connection_unlocks_and_remembers_default() {
    let host = empty_host();
    let transport = Arc::new(FakeTransport::reachable());
    let surface = UiSurface::shared();
    let mut bootstrap = ConnectionBootstrap::new(transport.clone(), host.clone(), surface.clone());

    assert!(!bootstrap.auto_connect_or_lock().await);
    let manual = server("media.local:7000", "media.local", 7000);
    assert_eq!(bootstrap.connect_manually(&manual, true).await, Ok(true));

    assert!(!bootstrap.is_connection_lock_screen_showing());
    assert_eq!(bootstrap.phase(), BootstrapPhase::Connected);
    assert_eq!(
        host.ask(CHANNEL_GET_OPTION, json!(keys::DEFAULT_SERVER))
            .await
            .unwrap(),
        json!("media.local:7000")
    );
}

#[tokio::test]
async fn failed_manual_connection_stays_locked() {
    let host = empty_host();
    let transport = Arc::new(FakeTransport::unreachable());
    let mut bootstrap = bootstrap_with(&transport, host.clone());

    let manual = server("media.local:7000", "media.local", 7000);
    assert_eq!(bootstrap.connect_manually(&manual, true).await, Ok(false));
    assert!(bootstrap.is_connection_lock_screen_showing());
    assert_eq!(
        host.ask(CHANNEL_GET_OPTION, json!(keys::DEFAULT_SERVER))
            .await
            .unwrap(),
        Value::Null
    );
}
