//! In-process view model the client core mutates.
//!
//! Rendering lives elsewhere; this only records what the UI should show so the
//! bootstrap, the settings reactions and the directive dispatcher agree on it.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, PoisonError},
};

use cardinal_core::LockReason;
use serde_json::Value;

pub const CUSTOM_CSS_ELEMENT_ID: &str = "user-custom-css";
pub const ACCENT_COLOR_PROPERTY: &str = "--accent-color";
pub const COLOR_THEME_ATTRIBUTE: &str = "color-theme";

pub const CLASS_DEVELOPER_MODE: &str = "developer-mode";
pub const CLASS_SETTINGS_OPEN: &str = "settings-open";
pub const CLASS_MAXIMIZED: &str = "maximized";
pub const CLASS_MINIMIZED: &str = "minimized";
pub const CLASS_QUEUE_OPEN: &str = "queue-open";

pub type SharedSurface = Arc<Mutex<UiSurface>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockScreen {
    pub reason: Option<LockReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleBlock {
    pub id: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoPanel {
    Welcome,
    OpenSource,
    About,
}

#[derive(Debug, Default)]
struct SettingsPanel {
    open: bool,
    current_tab: Option<String>,
}

#[derive(Debug, Default)]
pub struct UiSurface {
    lock_screen: Option<LockScreen>,
    classes: BTreeSet<String>,
    attributes: BTreeMap<String, String>,
    style_properties: BTreeMap<String, String>,
    style_blocks: Vec<StyleBlock>,
    locale: Option<String>,
    render_count: u64,
    settings_panel: SettingsPanel,
    alerts: Vec<String>,
    info_panel: Option<InfoPanel>,
    zoom_level: f64,
    strings: Option<Value>,
}

impl UiSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedSurface {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Inserts the lock screen unless one is already showing.
    /// Returns whether a new lock screen was inserted.
    pub fn show_lock_screen(&mut self, reason: Option<LockReason>) -> bool {
        if self.lock_screen.is_some() {
            return false;
        }
        self.lock_screen = Some(LockScreen { reason });
        true
    }

    pub fn hide_lock_screen(&mut self) -> bool {
        self.lock_screen.take().is_some()
    }

    pub fn lock_screen(&self) -> Option<&LockScreen> {
        self.lock_screen.as_ref()
    }

    pub fn is_lock_screen_showing(&self) -> bool {
        self.lock_screen.is_some()
    }

    pub fn add_class(&mut self, class: &str) {
        self.classes.insert(class.to_owned());
    }

    pub fn remove_class(&mut self, class: &str) {
        self.classes.remove(class);
    }

    pub fn toggle_class(&mut self, class: &str) -> bool {
        if self.classes.remove(class) {
            false
        } else {
            self.classes.insert(class.to_owned());
            true
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_owned(), value.to_owned());
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_style_property(&mut self, name: &str, value: &str) {
        self.style_properties
            .insert(name.to_owned(), value.to_owned());
    }

    pub fn style_property(&self, name: &str) -> Option<&str> {
        self.style_properties.get(name).map(String::as_str)
    }

    /// Drops any block with `id`, then appends `content` if it is non-empty.
    /// At most one block per id exists afterwards.
    pub fn replace_style_block(&mut self, id: &str, content: Option<&str>) {
        self.remove_style_block(id);
        if let Some(content) = content.filter(|c| !c.is_empty()) {
            self.style_blocks.push(StyleBlock {
                id: id.to_owned(),
                content: content.to_owned(),
            });
        }
    }

    pub fn remove_style_block(&mut self, id: &str) -> bool {
        let before = self.style_blocks.len();
        self.style_blocks.retain(|block| block.id != id);
        before != self.style_blocks.len()
    }

    pub fn style_blocks(&self) -> &[StyleBlock] {
        &self.style_blocks
    }

    pub fn set_locale(&mut self, locale: &str) {
        self.locale = Some(locale.to_owned());
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    /// Marks the whole root view stale.
    pub fn rerender(&mut self) {
        self.render_count = self.render_count.saturating_add(1);
    }

    pub fn render_count(&self) -> u64 {
        self.render_count
    }

    /// Opens the settings panel on `tab`, or the last used tab.
    /// Returns false if it was already open.
    pub fn open_settings_panel(&mut self, tab: Option<&str>) -> bool {
        if self.settings_panel.open {
            return false;
        }
        self.settings_panel.open = true;
        if let Some(tab) = tab {
            self.settings_panel.current_tab = Some(tab.to_owned());
        }
        self.add_class(CLASS_SETTINGS_OPEN);
        true
    }

    pub fn close_settings_panel(&mut self) -> bool {
        let was_open = self.settings_panel.open;
        self.settings_panel.open = false;
        self.remove_class(CLASS_SETTINGS_OPEN);
        was_open
    }

    pub fn is_settings_panel_open(&self) -> bool {
        self.settings_panel.open
    }

    pub fn current_settings_tab(&self) -> Option<&str> {
        self.settings_panel.current_tab.as_deref()
    }

    pub fn push_alert(&mut self, message: &str) {
        self.alerts.push(message.to_owned());
    }

    pub fn alerts(&self) -> &[String] {
        &self.alerts
    }

    pub fn show_info_panel(&mut self, panel: InfoPanel) {
        self.info_panel = Some(panel);
    }

    pub fn info_panel(&self) -> Option<InfoPanel> {
        self.info_panel
    }

    pub fn zoom_level(&self) -> f64 {
        self.zoom_level
    }

    pub fn set_zoom_level(&mut self, level: f64) {
        self.zoom_level = level;
    }

    pub fn strings(&self) -> Option<&Value> {
        self.strings.as_ref()
    }

    pub fn set_strings(&mut self, strings: Value) {
        self.strings = Some(strings);
    }
}

/// Runs `f` against the shared surface. A poisoned lock is recovered since the
/// surface holds plain view state.
pub fn with_surface<R>(surface: &SharedSurface, f: impl FnOnce(&mut UiSurface) -> R) -> R {
    let mut guard = surface.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}
