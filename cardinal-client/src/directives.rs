//! Directive dispatcher: maps host `announcements` onto view, router and player
//! collaborators.

use std::sync::{Arc, Mutex, PoisonError};

use cardinal_core::{CHANNEL_PLAYER, Directive, SwipeDirection, parse_directive};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{
    bridge::{HostChannel, Listener},
    config::Environment,
    surface::{
        CLASS_MAXIMIZED, CLASS_MINIMIZED, CLASS_QUEUE_OPEN, InfoPanel, SharedSurface,
        with_surface,
    },
};

pub const ZOOM_STEP: f64 = 0.5;

pub trait Player: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn play_pause(&self);
    fn stop(&self);
    fn next(&self);
    fn previous(&self);
}

pub trait Router: Send + Sync {
    fn back(&self);
    fn forward(&self);
    fn set_lang(&self, lang: &str);
}

/// Forwards player commands to the host, which owns audio playback.
pub struct HostPlayer {
    host: Arc<dyn HostChannel>,
}

impl HostPlayer {
    pub fn new(host: Arc<dyn HostChannel>) -> Self {
        Self { host }
    }

    fn command(&self, command: &str) {
        self.host.say(CHANNEL_PLAYER, json!({ "command": command }));
    }
}

impl Player for HostPlayer {
    fn play(&self) {
        self.command("play");
    }

    fn pause(&self) {
        self.command("pause");
    }

    fn play_pause(&self) {
        self.command("playpause");
    }

    fn stop(&self) {
        self.command("stop");
    }

    fn next(&self) {
        self.command("next");
    }

    fn previous(&self) {
        self.command("previous");
    }
}

#[derive(Debug, Default)]
struct History {
    entries: Vec<String>,
    position: usize,
    lang: Option<String>,
}

/// In-memory navigation history.
#[derive(Debug, Default)]
pub struct HistoryRouter {
    history: Mutex<History>,
}

impl HistoryRouter {
    pub fn new(start_page: &str) -> Self {
        Self {
            history: Mutex::new(History {
                entries: vec![start_page.to_owned()],
                ..History::default()
            }),
        }
    }

    /// Pushes a page, dropping any forward entries.
    pub fn navigate(&self, page: &str) {
        let mut history = self.lock();
        if !history.entries.is_empty() {
            let keep = history.position + 1;
            history.entries.truncate(keep);
        }
        history.entries.push(page.to_owned());
        history.position = history.entries.len() - 1;
    }

    pub fn current(&self) -> Option<String> {
        let history = self.lock();
        history.entries.get(history.position).cloned()
    }

    pub fn lang(&self) -> Option<String> {
        self.lock().lang.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Router for HistoryRouter {
    fn back(&self) {
        let mut history = self.lock();
        history.position = history.position.saturating_sub(1);
    }

    fn forward(&self) {
        let mut history = self.lock();
        if history.position + 1 < history.entries.len() {
            history.position += 1;
        }
    }

    fn set_lang(&self, lang: &str) {
        self.lock().lang = Some(lang.to_owned());
    }
}

#[derive(Clone)]
pub struct DirectiveDispatcher {
    surface: SharedSurface,
    player: Arc<dyn Player>,
    router: Arc<dyn Router>,
    env: Environment,
}

impl DirectiveDispatcher {
    pub fn new(
        surface: SharedSurface,
        player: Arc<dyn Player>,
        router: Arc<dyn Router>,
        env: Environment,
    ) -> Self {
        Self {
            surface,
            player,
            router,
            env,
        }
    }

    pub fn dispatch(&self, directive: &Directive) {
        debug!(?directive, "dispatching directive");
        match directive {
            Directive::Maximized => with_surface(&self.surface, |surface| {
                surface.remove_class(CLASS_MINIMIZED);
                surface.add_class(CLASS_MAXIMIZED);
            }),
            Directive::OpenSettings => {
                with_surface(&self.surface, |surface| surface.open_settings_panel(None));
            }
            Directive::Swipe { direction } => match direction {
                SwipeDirection::Left => self.router.back(),
                SwipeDirection::Right => self.router.forward(),
                SwipeDirection::Other => debug!("ignoring swipe without a direction"),
            },
            Directive::Back => self.router.back(),
            Directive::Forward => self.router.forward(),
            Directive::Play => self.player.play(),
            Directive::Pause => self.player.pause(),
            Directive::PlayPause => self.player.play_pause(),
            Directive::Stop => self.player.stop(),
            Directive::Next => self.player.next(),
            Directive::Previous => self.player.previous(),
            Directive::ToggleQueue => {
                with_surface(&self.surface, |surface| surface.toggle_class(CLASS_QUEUE_OPEN));
            }
            Directive::Alert { message } => {
                with_surface(&self.surface, |surface| surface.push_alert(message));
            }
            Directive::ShowWelcome => self.show_panel(InfoPanel::Welcome),
            Directive::ShowOpenSource => self.show_panel(InfoPanel::OpenSource),
            Directive::ShowAbout => self.show_panel(InfoPanel::About),
            Directive::ZoomIn => self.zoom(|level| level + ZOOM_STEP),
            Directive::ZoomOut => self.zoom(|level| level - ZOOM_STEP),
            Directive::ResetZoom => self.zoom(|_| 0.0),
        }
    }

    /// Parses and dispatches a raw announcement. Returns false for payloads
    /// that aren't a known directive.
    pub fn handle_value(&self, payload: &Value) -> bool {
        match parse_directive(payload) {
            Ok(directive) => {
                self.dispatch(&directive);
                true
            }
            Err(err) => {
                debug!(%payload, "ignoring announcement: {}", err);
                false
            }
        }
    }

    /// Dispatches announcements until the listener's sender goes away.
    pub async fn run(self, mut listener: Listener) {
        while let Some(payload) = listener.recv().await {
            self.handle_value(&payload);
        }
        info!("announcement listener closed");
    }

    fn show_panel(&self, panel: InfoPanel) {
        with_surface(&self.surface, |surface| surface.show_info_panel(panel));
    }

    fn zoom(&self, step: impl FnOnce(f64) -> f64) {
        if self.env != Environment::Desktop {
            debug!("zoom directives only apply to the desktop environment");
            return;
        }
        with_surface(&self.surface, |surface| {
            let level = step(surface.zoom_level());
            surface.set_zoom_level(level);
        });
    }
}
