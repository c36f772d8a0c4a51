//! Built-in `onSettingChange` subscribers and the appearance applied at
//! startup, before any setting has been loaded into the form.

use std::sync::Arc;

use cardinal_core::{BackendKind, SettingValue, keys};
use tracing::{debug, info};

use crate::{
    directives::Router,
    settings::{EventKind, SettingsEngine, SettingsEvent},
    store::{LocalStore, StoreError},
    surface::{
        ACCENT_COLOR_PROPERTY, CLASS_DEVELOPER_MODE, COLOR_THEME_ATTRIBUTE,
        CUSTOM_CSS_ELEMENT_ID, SharedSurface, UiSurface, with_surface,
    },
};

pub const DEFAULT_COLOR_THEME: &str = "dark";

/// Registers the language and appearance subscribers. Both ignore keys they
/// don't own and can run any number of times.
pub fn register_reactions(
    engine: &mut SettingsEngine,
    surface: &SharedSurface,
    router: Arc<dyn Router>,
) {
    let lang_surface = Arc::clone(surface);
    engine.register_callback(
        EventKind::SettingChange,
        Box::new(move |event| {
            if let Some(value) = changed(event, keys::LANG) {
                let lang = value.encode();
                router.set_lang(&lang);
                with_surface(&lang_surface, |surface| {
                    surface.set_locale(&lang);
                    surface.close_settings_panel();
                    surface.rerender();
                });
                info!(lang = %lang, "language changed");
            }
        }),
    );

    let appearance_surface = Arc::clone(surface);
    engine.register_callback(
        EventKind::SettingChange,
        Box::new(move |event| {
            let SettingsEvent::Changed(change) = event else {
                return;
            };
            with_surface(&appearance_surface, |surface| {
                apply_appearance(surface, &change.name, &change.value);
            });
        }),
    );
}

fn changed<'a>(event: &'a SettingsEvent<'_>, name: &str) -> Option<&'a SettingValue> {
    match event {
        SettingsEvent::Changed(change) if change.name == name => Some(&change.value),
        _ => None,
    }
}

fn apply_appearance(surface: &mut UiSurface, name: &str, value: &SettingValue) {
    match name {
        keys::ACCENT_COLOR => surface.set_style_property(ACCENT_COLOR_PROPERTY, &value.encode()),
        keys::CUSTOM_CSS => {
            let css = match value {
                SettingValue::Null => String::new(),
                other => other.encode(),
            };
            surface.replace_style_block(CUSTOM_CSS_ELEMENT_ID, Some(&css));
        }
        keys::COLOR_THEME => surface.set_attribute(COLOR_THEME_ATTRIBUTE, &value.encode()),
        // View-only; the stored value belongs to the write-through path.
        keys::DEVELOPER_MODE => {
            if value.is_truthy() {
                surface.add_class(CLASS_DEVELOPER_MODE);
            } else {
                surface.remove_class(CLASS_DEVELOPER_MODE);
            }
        }
        _ => {}
    }
}

pub fn apply_colors(store: &LocalStore, surface: &SharedSurface) {
    let theme = store
        .read(keys::COLOR_THEME)
        .filter(|theme| !theme.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_COLOR_THEME.to_owned());
    let accent = store.read(keys::ACCENT_COLOR);
    with_surface(surface, |surface| {
        surface.set_attribute(COLOR_THEME_ATTRIBUTE, &theme);
        if let Some(accent) = &accent {
            surface.set_style_property(ACCENT_COLOR_PROPERTY, accent);
        }
    });
}

pub fn inject_custom_css(store: &LocalStore, surface: &SharedSurface) -> bool {
    let Some(css) = store.read(keys::CUSTOM_CSS).filter(|css| !css.is_empty()) else {
        return false;
    };
    with_surface(surface, |surface| {
        surface.replace_style_block(CUSTOM_CSS_ELEMENT_ID, Some(&css));
    });
    true
}

pub fn maybe_enable_developer_mode(store: &LocalStore, surface: &SharedSurface) -> bool {
    let enabled = store
        .read(keys::DEVELOPER_MODE)
        .is_some_and(|raw| SettingValue::decode(&raw).is_truthy());
    with_surface(surface, |surface| {
        if enabled {
            surface.add_class(CLASS_DEVELOPER_MODE);
        } else {
            surface.remove_class(CLASS_DEVELOPER_MODE);
        }
    });
    debug!(enabled, "developer mode applied");
    enabled
}

/// Drops the user's custom CSS everywhere: the injected block, the form
/// control and the stored value.
pub async fn disable_custom_css(
    engine: &mut SettingsEngine,
    surface: &SharedSurface,
) -> Result<(), StoreError> {
    with_surface(surface, |surface| surface.remove_style_block(CUSTOM_CSS_ELEMENT_ID));
    engine.form_mut().set_value(keys::CUSTOM_CSS, "");
    let local = Arc::clone(engine.backends().for_kind(BackendKind::Local));
    local.remove(keys::CUSTOM_CSS).await?;
    info!("custom css disabled");
    Ok(())
}
