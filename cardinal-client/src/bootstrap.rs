//! Connection bootstrap: find the remembered server, run the two-phase
//! handshake, and fall back to the connection lock screen.

use std::sync::Arc;

use cardinal_core::{
    CHANNEL_DB_API, CHANNEL_GET_OPTION, CHANNEL_SET_OPTION, ConnectionState, CoreError,
    DbApiRequest, I18N_HTTP_PATH, LockReason, SERVERS_TABLE, ServerRecord, SetOptionRequest,
    keys, stream_port, validate_endpoint,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    bridge::{Endpoint, HostChannel, ServerTransport, TransportKind},
    surface::{SharedSurface, with_surface},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    Idle,
    CheckingDefault,
    NoDefault,
    Handshaking,
    HandshakeFailed,
    Connected,
    Locked,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("invalid server endpoint: {0}")]
    Validation(#[from] CoreError),
}

/// Owns the process-wide `ConnectionState`. Methods that can start a
/// handshake take `&mut self`, so only one bootstrap runs at a time.
pub struct ConnectionBootstrap {
    transport: Arc<dyn ServerTransport>,
    host: Arc<dyn HostChannel>,
    surface: SharedSurface,
    state: ConnectionState,
    phase: BootstrapPhase,
}

impl ConnectionBootstrap {
    pub fn new(
        transport: Arc<dyn ServerTransport>,
        host: Arc<dyn HostChannel>,
        surface: SharedSurface,
    ) -> Self {
        Self::with_state(transport, host, surface, ConnectionState::new())
    }

    /// Starts from a state established elsewhere, e.g. by a host that
    /// connected before the UI was created.
    pub fn with_state(
        transport: Arc<dyn ServerTransport>,
        host: Arc<dyn HostChannel>,
        surface: SharedSurface,
        state: ConnectionState,
    ) -> Self {
        let phase = if state.is_usable() {
            BootstrapPhase::Connected
        } else {
            BootstrapPhase::Idle
        };
        Self {
            transport,
            host,
            surface,
            state,
            phase,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn phase(&self) -> BootstrapPhase {
        self.phase
    }

    /// Resolves the remembered server, or `None` when no default is set or its
    /// row is gone. Host failures are logged and treated as "no default".
    pub async fn get_default_server(&self) -> Option<ServerRecord> {
        let id = match self
            .host
            .ask(CHANNEL_GET_OPTION, Value::String(keys::DEFAULT_SERVER.to_owned()))
            .await
        {
            Ok(Value::String(id)) if !id.trim().is_empty() => id,
            Ok(Value::Number(id)) if id.as_f64() != Some(0.0) => id.to_string(),
            Ok(_) => return None,
            Err(err) => {
                warn!("default server lookup failed: {}", err);
                return None;
            }
        };

        let request = match DbApiRequest::get_row(SERVERS_TABLE, &id).to_value() {
            Ok(request) => request,
            Err(err) => {
                warn!("failed to build server row request: {}", err);
                return None;
            }
        };

        match self.host.ask(CHANNEL_DB_API, request).await {
            Ok(row) => {
                let record = ServerRecord::from_row(&row);
                if record.is_none() {
                    debug!(server_id = %id, "default server row no longer exists");
                }
                record
            }
            Err(err) => {
                warn!(server_id = %id, "default server row lookup failed: {}", err);
                None
            }
        }
    }

    /// Request transport first; the stream on `port + 1` is only attempted
    /// once the request transport answered. Returns whether both are up.
    pub async fn connect_to_server(&mut self, host: &str, port: u16) -> Result<bool, BootstrapError> {
        validate_endpoint(host, port)?;
        let ws_port = stream_port(port)?;

        self.phase = BootstrapPhase::Handshaking;
        info!(host, port, "connecting to server");

        let http = Endpoint::new(TransportKind::RequestResponse, host, port);
        if let Err(err) = self.transport.init(TransportKind::RequestResponse, http).await {
            self.state.mark_http(false);
            self.phase = BootstrapPhase::HandshakeFailed;
            warn!(host, port, "request transport unreachable, not attempting stream: {}", err);
            return Ok(false);
        }
        self.state.mark_http(true);

        let ws = Endpoint::new(TransportKind::Stream, host, ws_port);
        match self.transport.init(TransportKind::Stream, ws).await {
            Ok(()) => {
                if let Err(err) = self.state.mark_ws(true) {
                    warn!("stream flag rejected: {}", err);
                }
            }
            Err(err) => {
                let _ = self.state.mark_ws(false);
                warn!(host, port = ws_port, "stream upgrade failed: {}", err);
            }
        }

        let connected = self.state.is_usable();
        self.phase = if connected {
            BootstrapPhase::Connected
        } else {
            BootstrapPhase::HandshakeFailed
        };
        Ok(connected)
    }

    pub async fn auto_connect_or_lock(&mut self) -> bool {
        if self.state.is_usable() {
            info!("autoconnect: already connected");
            self.phase = BootstrapPhase::Connected;
            return true;
        }

        self.phase = BootstrapPhase::CheckingDefault;
        let Some(server) = self.get_default_server().await else {
            info!("autoconnect: no default server set, showing connection screen");
            self.phase = BootstrapPhase::NoDefault;
            self.lock(None);
            return false;
        };

        let address = server.address();
        match self.connect_to_server(&server.host, server.http_port).await {
            Ok(true) => {
                info!(server = %address, "autoconnect: connected");
                self.state.set_active_server(Some(server));
                self.maybe_set_strings_via_http().await;
                true
            }
            Ok(false) => {
                warn!(server = %address, "autoconnect: could not connect");
                self.lock(Some(LockReason::AutoconnectFailed));
                false
            }
            Err(err) => {
                warn!(server = %address, "autoconnect: stored server is invalid: {}", err);
                self.phase = BootstrapPhase::HandshakeFailed;
                self.lock(Some(LockReason::AutoconnectFailed));
                false
            }
        }
    }

    /// Connection entered from the lock screen. On success the lock screen is
    /// removed and, if `remember` is set, the server becomes the default.
    pub async fn connect_manually(
        &mut self,
        server: &ServerRecord,
        remember: bool,
    ) -> Result<bool, BootstrapError> {
        let connected = self.connect_to_server(&server.host, server.http_port).await?;
        if !connected {
            self.lock(None);
            return Ok(false);
        }

        self.state.set_active_server(Some(server.clone()));
        with_surface(&self.surface, |surface| surface.hide_lock_screen());
        info!(server = %server.address(), "manual connection established");

        if remember {
            self.remember_default(&server.id).await;
        }
        self.maybe_set_strings_via_http().await;
        Ok(true)
    }

    /// Inserts the lock screen unless it is already showing.
    pub fn show_connection_lock_screen(&self, reason: Option<LockReason>) -> bool {
        let inserted = with_surface(&self.surface, |surface| surface.show_lock_screen(reason));
        if inserted {
            info!(reason = ?reason, "connection lock screen shown");
        }
        inserted
    }

    pub fn is_connection_lock_screen_showing(&self) -> bool {
        with_surface(&self.surface, |surface| surface.is_lock_screen_showing())
    }

    fn lock(&mut self, reason: Option<LockReason>) {
        self.phase = BootstrapPhase::Locked;
        self.show_connection_lock_screen(reason);
    }

    async fn remember_default(&self, id: &str) {
        let request = SetOptionRequest {
            option: keys::DEFAULT_SERVER.to_owned(),
            value: Value::String(id.to_owned()),
        };
        let payload = match serde_json::to_value(&request) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to encode default server: {}", err);
                return;
            }
        };
        if let Err(err) = self.host.ask(CHANNEL_SET_OPTION, payload).await {
            warn!(server_id = id, "failed to remember default server: {}", err);
        }
    }

    /// Strings may already have come from the host; only fetch over HTTP when
    /// nothing is loaded yet.
    async fn maybe_set_strings_via_http(&self) {
        if with_surface(&self.surface, |surface| surface.strings().is_some()) {
            debug!("translation strings already loaded");
            return;
        }

        match self.transport.http_get(I18N_HTTP_PATH).await {
            Ok(response) if response.status == 200 => {
                with_surface(&self.surface, |surface| surface.set_strings(response.body));
            }
            Ok(response) => {
                error!(status = response.status, "i18n strings route did not return 200");
            }
            Err(err) => {
                error!("i18n strings request failed: {}", err);
            }
        }
    }
}
