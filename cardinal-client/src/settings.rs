//! Settings synchronization: load persisted values into the settings form,
//! write control changes through to their backend, and fan changes out to
//! subscribers.

use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use cardinal_core::{BackendKind, CHANNEL_FACTORY_RESET, SettingValue, keys};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    bridge::HostChannel,
    store::{SettingsBackends, StoreError},
    surface::{SharedSurface, with_surface},
};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown settings event {0}")]
    UnknownEventName(String),
    #[error("no control named {0} in the settings form")]
    UnknownSetting(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Checkbox,
    Radio,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub name: String,
    pub kind: ControlKind,
    pub value: String,
    pub checked: bool,
}

impl Control {
    pub fn checkbox(name: &str, checked: bool) -> Self {
        Self {
            name: name.to_owned(),
            kind: ControlKind::Checkbox,
            value: String::new(),
            checked,
        }
    }

    pub fn radio(name: &str, value: &str, checked: bool) -> Self {
        Self {
            name: name.to_owned(),
            kind: ControlKind::Radio,
            value: value.to_owned(),
            checked,
        }
    }

    pub fn text(name: &str, value: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: ControlKind::Text,
            value: value.to_owned(),
            checked: false,
        }
    }
}

/// The settings panel's controls. Radio groups are controls sharing a name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsForm {
    controls: Vec<Control>,
}

impl SettingsForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    pub fn push(&mut self, control: Control) {
        self.controls.push(control);
    }

    pub fn control(&self, name: &str) -> Option<&Control> {
        self.controls.iter().find(|control| control.name == name)
    }

    pub fn controls_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Control> + 'a {
        self.controls.iter().filter(move |control| control.name == name)
    }

    pub fn set_checked(&mut self, name: &str, checked: bool) -> bool {
        let mut found = false;
        for control in self.named_mut(name, ControlKind::Checkbox) {
            control.checked = checked;
            found = true;
        }
        found
    }

    /// Checks the radio sibling whose value is `value` and unchecks the rest.
    /// Nothing changes if no sibling carries that value.
    pub fn check_radio(&mut self, name: &str, value: &str) -> bool {
        if !self
            .controls_named(name)
            .any(|control| control.kind == ControlKind::Radio && control.value == value)
        {
            return false;
        }
        for control in self.named_mut(name, ControlKind::Radio) {
            control.checked = control.value == value;
        }
        true
    }

    pub fn set_value(&mut self, name: &str, value: &str) -> bool {
        let mut found = false;
        for control in self.named_mut(name, ControlKind::Text) {
            control.value = value.to_owned();
            found = true;
        }
        found
    }

    /// Current raw value of a setting: `1`/`0` for checkboxes, the checked
    /// sibling's value for radio groups, the text otherwise.
    pub fn read_value(&self, name: &str, kind: ControlKind) -> Option<String> {
        match kind {
            ControlKind::Checkbox => self
                .controls_named(name)
                .find(|control| control.kind == ControlKind::Checkbox)
                .map(|control| if control.checked { "1" } else { "0" }.to_owned()),
            ControlKind::Radio => self
                .controls_named(name)
                .find(|control| control.kind == ControlKind::Radio && control.checked)
                .map(|control| control.value.clone()),
            ControlKind::Text => self
                .controls_named(name)
                .find(|control| control.kind == ControlKind::Text)
                .map(|control| control.value.clone()),
        }
    }

    fn apply(&mut self, name: &str, kind: ControlKind, value: &SettingValue) {
        match kind {
            ControlKind::Checkbox => {
                self.set_checked(name, value.is_truthy());
            }
            ControlKind::Radio => {
                self.check_radio(name, &value.encode());
            }
            ControlKind::Text => {
                let text = match value {
                    SettingValue::Null => String::new(),
                    other => other.encode(),
                };
                self.set_value(name, &text);
            }
        }
    }

    fn named_mut<'a>(
        &'a mut self,
        name: &'a str,
        kind: ControlKind,
    ) -> impl Iterator<Item = &'a mut Control> + 'a {
        self.controls
            .iter_mut()
            .filter(move |control| control.name == name && control.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingDecl {
    pub name: String,
    pub backend: BackendKind,
    pub kind: ControlKind,
}

impl SettingDecl {
    pub fn new(name: &str, backend: BackendKind, kind: ControlKind) -> Self {
        Self {
            name: name.to_owned(),
            backend,
            kind,
        }
    }

    /// Declares a setting, taking the control kind from the form.
    pub fn from_form(
        form: &SettingsForm,
        name: &str,
        backend: BackendKind,
    ) -> Result<Self, SettingsError> {
        let control = form
            .control(name)
            .ok_or_else(|| SettingsError::UnknownSetting(name.to_owned()))?;
        Ok(Self::new(name, backend, control.kind))
    }
}

pub const ACCENT_COLORS: &[&str] = &["#f39a11", "#5fb64a", "#47aac9", "#d61fd0", "#e0323c"];

/// The application's settings panel with its default control values.
pub fn default_form() -> SettingsForm {
    let mut form = SettingsForm::new()
        .with(Control::text(keys::LANG, "en"))
        .with(Control::text(keys::START_PAGE, "artists"))
        .with(Control::text(keys::COLOR_THEME, "dark"))
        .with(Control::text(keys::CUSTOM_CSS, ""))
        .with(Control::checkbox(keys::DEVELOPER_MODE, false))
        .with(Control::checkbox(keys::AUTO_CHECK_FOR_UPDATES, true))
        .with(Control::checkbox(keys::NOTIFICATION_ON_SONG_CHANGE, true))
        .with(Control::checkbox(keys::CONFIRM_ELECTRON_QUIT, true));
    for color in ACCENT_COLORS {
        form.push(Control::radio(keys::ACCENT_COLOR, color, false));
    }
    form
}

pub fn default_declarations() -> Vec<SettingDecl> {
    use BackendKind::{Local, Remote};
    use ControlKind::{Checkbox, Radio, Text};

    vec![
        SettingDecl::new(keys::LANG, Local, Text),
        SettingDecl::new(keys::START_PAGE, Local, Text),
        SettingDecl::new(keys::COLOR_THEME, Local, Text),
        SettingDecl::new(keys::CUSTOM_CSS, Local, Text),
        SettingDecl::new(keys::ACCENT_COLOR, Local, Radio),
        SettingDecl::new(keys::DEVELOPER_MODE, Local, Checkbox),
        SettingDecl::new(keys::AUTO_CHECK_FOR_UPDATES, Local, Checkbox),
        SettingDecl::new(keys::NOTIFICATION_ON_SONG_CHANGE, Remote, Checkbox),
        SettingDecl::new(keys::CONFIRM_ELECTRON_QUIT, Remote, Checkbox),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SettingChange,
    Close,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SettingChange => "onSettingChange",
            EventKind::Close => "onClose",
        }
    }
}

impl FromStr for EventKind {
    type Err = SettingsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "onSettingChange" => Ok(EventKind::SettingChange),
            "onClose" => Ok(EventKind::Close),
            other => Err(SettingsError::UnknownEventName(other.to_owned())),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The control mutation that triggered a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub name: String,
}

impl ChangeEvent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettingChange {
    pub name: String,
    pub value: SettingValue,
    pub origin: ChangeEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsEvent<'a> {
    Changed(&'a SettingChange),
    Closed,
}

impl SettingsEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            SettingsEvent::Changed(_) => EventKind::SettingChange,
            SettingsEvent::Closed => EventKind::Close,
        }
    }
}

pub type Handler = Box<dyn FnMut(&SettingsEvent<'_>) + Send>;

/// Ordered subscriber lists, one per event kind.
#[derive(Default)]
pub struct EventBus {
    on_setting_change: Vec<Handler>,
    on_close: Vec<Handler>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: EventKind, handler: Handler) {
        self.handlers_mut(kind).push(handler);
    }

    /// Runs every handler for the event's kind in registration order.
    pub fn emit(&mut self, event: &SettingsEvent<'_>) {
        for handler in self.handlers_mut(event.kind()).iter_mut() {
            handler(event);
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::SettingChange => self.on_setting_change.len(),
            EventKind::Close => self.on_close.len(),
        }
    }

    fn handlers_mut(&mut self, kind: EventKind) -> &mut Vec<Handler> {
        match kind {
            EventKind::SettingChange => &mut self.on_setting_change,
            EventKind::Close => &mut self.on_close,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub name: String,
    pub backend: BackendKind,
    pub result: Result<(), String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    Loaded,
    Watching,
}

pub struct SettingsEngine {
    form: SettingsForm,
    declarations: Vec<SettingDecl>,
    backends: SettingsBackends,
    bus: EventBus,
    host: Arc<dyn HostChannel>,
    surface: SharedSurface,
    phase: EnginePhase,
    outcomes_tx: mpsc::UnboundedSender<WriteOutcome>,
    outcomes_rx: Option<mpsc::UnboundedReceiver<WriteOutcome>>,
}

impl SettingsEngine {
    pub fn new(
        form: SettingsForm,
        declarations: Vec<SettingDecl>,
        backends: SettingsBackends,
        host: Arc<dyn HostChannel>,
        surface: SharedSurface,
    ) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Self {
            form,
            declarations,
            backends,
            bus: EventBus::new(),
            host,
            surface,
            phase: EnginePhase::Idle,
            outcomes_tx,
            outcomes_rx: Some(outcomes_rx),
        }
    }

    pub fn form(&self) -> &SettingsForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut SettingsForm {
        &mut self.form
    }

    pub fn backends(&self) -> &SettingsBackends {
        &self.backends
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn declaration(&self, name: &str) -> Option<&SettingDecl> {
        self.declarations.iter().find(|decl| decl.name == name)
    }

    /// Completion reports for every write-through, Local and Remote.
    /// Can only be taken once.
    pub fn take_write_outcomes(&mut self) -> Option<mpsc::UnboundedReceiver<WriteOutcome>> {
        self.outcomes_rx.take()
    }

    /// Reads every declared setting from its backend and applies it to the
    /// form. Unset keys keep the control's default. Returns what was applied.
    pub async fn load_all(&mut self) -> BTreeMap<String, SettingValue> {
        let mut applied = BTreeMap::new();
        for decl in &self.declarations {
            if applied.contains_key(&decl.name) {
                continue;
            }
            let raw = match self.backends.for_kind(decl.backend).get(&decl.name).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    warn!(setting = %decl.name, "failed to read setting: {}", err);
                    continue;
                }
            };
            let value = SettingValue::decode(&raw);
            self.form.apply(&decl.name, decl.kind, &value);
            applied.insert(decl.name.clone(), value);
        }
        if self.phase == EnginePhase::Idle {
            self.phase = EnginePhase::Loaded;
        }
        debug!(count = applied.len(), "settings loaded");
        applied
    }

    /// Starts routing control changes through `handle_change`.
    pub fn watch_all(&mut self) {
        self.phase = EnginePhase::Watching;
    }

    pub fn register_callback(&mut self, kind: EventKind, handler: Handler) {
        self.bus.register(kind, handler);
    }

    pub fn register_named_callback(
        &mut self,
        event: &str,
        handler: Handler,
    ) -> Result<(), SettingsError> {
        let kind = event.parse::<EventKind>()?;
        self.register_callback(kind, handler);
        Ok(())
    }

    pub fn callback_count(&self, kind: EventKind) -> usize {
        self.bus.handler_count(kind)
    }

    /// Handles a mutation of a declared control: writes it through to its
    /// backend, then notifies `onSettingChange` subscribers. Local writes are
    /// awaited; Remote writes run in the background and report on the
    /// write-outcome channel.
    pub async fn handle_change(&mut self, event: ChangeEvent) -> Option<SettingValue> {
        if self.phase != EnginePhase::Watching {
            debug!(setting = %event.name, "change ignored, settings not watched yet");
            return None;
        }
        let decl = self.declaration(&event.name)?.clone();
        let raw = self.form.read_value(&decl.name, decl.kind)?;

        let backend = Arc::clone(self.backends.for_kind(decl.backend));
        match decl.backend {
            BackendKind::Local => {
                let result = backend.set(&decl.name, &raw).await;
                if let Err(err) = &result {
                    warn!(setting = %decl.name, "local write failed: {}", err);
                }
                let _ = self.outcomes_tx.send(WriteOutcome {
                    name: decl.name.clone(),
                    backend: decl.backend,
                    result: result.map_err(|err| err.to_string()),
                });
            }
            BackendKind::Remote => {
                let outcomes_tx = self.outcomes_tx.clone();
                let name = decl.name.clone();
                let raw = raw.clone();
                tokio::spawn(async move {
                    let result = backend.set(&name, &raw).await;
                    if let Err(err) = &result {
                        warn!(setting = %name, "remote write failed: {}", err);
                    }
                    let _ = outcomes_tx.send(WriteOutcome {
                        name,
                        backend: BackendKind::Remote,
                        result: result.map_err(|err| err.to_string()),
                    });
                });
            }
        }

        let change = SettingChange {
            name: decl.name,
            value: SettingValue::decode(&raw),
            origin: event,
        };
        self.bus.emit(&SettingsEvent::Changed(&change));
        Some(change.value)
    }

    /// Applies user input to the named control as the UI would, then runs the
    /// change through `handle_change`.
    pub async fn apply_user_input(
        &mut self,
        name: &str,
        raw: &str,
    ) -> Result<Option<SettingValue>, SettingsError> {
        let kind = self
            .declaration(name)
            .map(|decl| decl.kind)
            .ok_or_else(|| SettingsError::UnknownSetting(name.to_owned()))?;
        let updated = match kind {
            ControlKind::Checkbox => self
                .form
                .set_checked(name, SettingValue::decode(raw).is_truthy()),
            ControlKind::Radio => self.form.check_radio(name, raw),
            ControlKind::Text => self.form.set_value(name, raw),
        };
        if !updated {
            return Err(SettingsError::UnknownSetting(name.to_owned()));
        }
        Ok(self.handle_change(ChangeEvent::new(name)).await)
    }

    pub fn open_panel(&self, tab: Option<&str>) -> bool {
        with_surface(&self.surface, |surface| surface.open_settings_panel(tab))
    }

    /// Closes the settings panel and fires every `onClose` subscriber.
    pub fn close(&mut self) {
        with_surface(&self.surface, |surface| surface.close_settings_panel());
        self.bus.emit(&SettingsEvent::Closed);
    }

    /// Asks the host to wipe all persisted data. The caller is responsible for
    /// the confirmation prompts.
    pub fn factory_reset(&self, confirmed: bool) -> bool {
        if !confirmed {
            return false;
        }
        info!("factory reset requested");
        self.host.say(CHANNEL_FACTORY_RESET, Value::Null);
        true
    }
}
