//! Composition root: wires the bootstrap, the settings engine and the view
//! together and runs the startup sequence.

use std::{sync::Arc, time::Duration};

use cardinal_core::{
    CHANNEL_CHECK_FOR_UPDATES, CHANNEL_I18N, ConnectionState, ServerRecord, SettingValue, keys,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    bootstrap::{BootstrapError, ConnectionBootstrap},
    bridge::{HostChannel, ServerTransport},
    config::Environment,
    directives::{DirectiveDispatcher, HistoryRouter, HostPlayer, Player, Router},
    reactions::{apply_colors, inject_custom_css, maybe_enable_developer_mode, register_reactions},
    settings::{SettingsEngine, default_declarations, default_form},
    store::{LocalStore, RemoteStore, SettingsBackends},
    surface::{SharedSurface, UiSurface, with_surface},
};

pub const UPDATE_CHECK_DELAY: Duration = Duration::from_secs(4);
const DEFAULT_START_PAGE: &str = "artists";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupOutcome {
    Connected,
    Locked,
}

pub struct App {
    bootstrap: ConnectionBootstrap,
    settings: SettingsEngine,
    local: Arc<LocalStore>,
    host: Arc<dyn HostChannel>,
    surface: SharedSurface,
    router: Arc<HistoryRouter>,
    player: Arc<dyn Player>,
    env: Environment,
    settings_ready: bool,
}

impl App {
    pub fn new(
        transport: Arc<dyn ServerTransport>,
        host: Arc<dyn HostChannel>,
        local: Arc<LocalStore>,
        env: Environment,
    ) -> Self {
        Self::with_state(transport, host, local, env, ConnectionState::new())
    }

    pub fn with_state(
        transport: Arc<dyn ServerTransport>,
        host: Arc<dyn HostChannel>,
        local: Arc<LocalStore>,
        env: Environment,
        state: ConnectionState,
    ) -> Self {
        let surface = UiSurface::shared();
        let start_page = local
            .read(keys::START_PAGE)
            .unwrap_or_else(|| DEFAULT_START_PAGE.to_owned());
        let router = Arc::new(HistoryRouter::new(&start_page));
        let player: Arc<dyn Player> = Arc::new(HostPlayer::new(Arc::clone(&host)));

        let backends = SettingsBackends::new(
            local.clone(),
            Arc::new(RemoteStore::new(Arc::clone(&host))),
        );
        let settings = SettingsEngine::new(
            default_form(),
            default_declarations(),
            backends,
            Arc::clone(&host),
            Arc::clone(&surface),
        );
        let bootstrap =
            ConnectionBootstrap::with_state(transport, Arc::clone(&host), Arc::clone(&surface), state);

        Self {
            bootstrap,
            settings,
            local,
            host,
            surface,
            router,
            player,
            env,
            settings_ready: false,
        }
    }

    pub fn surface(&self) -> &SharedSurface {
        &self.surface
    }

    pub fn router(&self) -> &Arc<HistoryRouter> {
        &self.router
    }

    pub fn bootstrap(&self) -> &ConnectionBootstrap {
        &self.bootstrap
    }

    pub fn settings(&self) -> &SettingsEngine {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SettingsEngine {
        &mut self.settings
    }

    /// Applies the stored appearance, then connects or locks. Settings are only
    /// loaded once a server connection exists.
    pub async fn start(&mut self) -> StartupOutcome {
        apply_colors(&self.local, &self.surface);
        inject_custom_css(&self.local, &self.surface);
        maybe_enable_developer_mode(&self.local, &self.surface);

        if self.env == Environment::Desktop {
            self.preload_strings().await;
        }

        if !self.bootstrap.auto_connect_or_lock().await {
            return StartupOutcome::Locked;
        }
        self.init_settings().await;
        StartupOutcome::Connected
    }

    pub async fn connect_manually(
        &mut self,
        server: &ServerRecord,
        remember: bool,
    ) -> Result<bool, BootstrapError> {
        let connected = self.bootstrap.connect_manually(server, remember).await?;
        if connected {
            self.init_settings().await;
        }
        Ok(connected)
    }

    /// Desktop only: after `UPDATE_CHECK_DELAY`, asks the host to check for
    /// updates if the user opted in.
    pub fn spawn_update_check(&self) -> Option<JoinHandle<bool>> {
        if self.env != Environment::Desktop {
            return None;
        }
        let local = Arc::clone(&self.local);
        let host = Arc::clone(&self.host);
        Some(tokio::spawn(async move {
            tokio::time::sleep(UPDATE_CHECK_DELAY).await;
            let enabled = local
                .read(keys::AUTO_CHECK_FOR_UPDATES)
                .is_some_and(|raw| SettingValue::decode(&raw).is_truthy());
            if enabled {
                info!("checking for updates");
                host.say(CHANNEL_CHECK_FOR_UPDATES, Value::Null);
            }
            enabled
        }))
    }

    pub fn dispatcher(&self) -> DirectiveDispatcher {
        let router: Arc<dyn Router> = self.router.clone();
        DirectiveDispatcher::new(
            Arc::clone(&self.surface),
            Arc::clone(&self.player),
            router,
            self.env,
        )
    }

    async fn init_settings(&mut self) {
        if self.settings_ready {
            return;
        }
        let loaded = self.settings.load_all().await;
        debug!(count = loaded.len(), "settings applied to form");
        register_reactions(&mut self.settings, &self.surface, self.router.clone());
        self.settings.watch_all();
        self.settings_ready = true;
    }

    async fn preload_strings(&self) {
        match self.host.ask(CHANNEL_I18N, Value::Null).await {
            Ok(Value::Null) => debug!("host has no translation strings"),
            Ok(strings) => with_surface(&self.surface, |surface| surface.set_strings(strings)),
            Err(err) => warn!("failed to load translation strings from host: {}", err),
        }
    }
}
