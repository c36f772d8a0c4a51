//! Settings store adapter: one `SettingsBackend` per storage tier.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use cardinal_core::{
    BackendKind, CHANNEL_GET_OPTION, CHANNEL_SET_OPTION, SetOptionRequest, SettingValue,
    raw_from_json,
};
use serde_json::Value;
use thiserror::Error;

use crate::{
    bridge::{BridgeError, HostChannel},
    persist::{JsonFile, PersistLoadError, PersistSaveError, load_json_or_default},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to load local settings: {0}")]
    Load(#[from] PersistLoadError),
    #[error("failed to persist local settings: {0}")]
    Persist(#[from] PersistSaveError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Key/value storage for settings in their raw string encoding.
/// `get` returns `None` when the key was never written.
#[async_trait]
pub trait SettingsBackend: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, name: &str, raw: &str) -> Result<(), StoreError>;
    async fn remove(&self, name: &str) -> Result<(), StoreError>;
}

/// On-device settings, optionally mirrored to a JSON file.
#[derive(Debug, Default)]
pub struct LocalStore {
    file: Option<JsonFile>,
    values: Mutex<BTreeMap<String, String>>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let values: BTreeMap<String, String> = load_json_or_default(path)?;
        Ok(Self {
            file: Some(JsonFile::new(path)),
            values: Mutex::new(values),
        })
    }

    /// Synchronous read for startup paths that run before any await point.
    pub fn read(&self, name: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    async fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<(), StoreError> {
        f(&mut self.values.lock().unwrap_or_else(PoisonError::into_inner));
        if let Some(file) = &self.file {
            file.save_latest(&self.values).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsBackend for LocalStore {
    async fn get(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read(name))
    }

    async fn set(&self, name: &str, raw: &str) -> Result<(), StoreError> {
        self.update(|values| {
            values.insert(name.to_owned(), raw.to_owned());
        })
        .await
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.update(|values| {
            values.remove(name);
        })
        .await
    }
}

/// Authoritative settings held by the host process, reached over
/// `get-option` / `set-option`.
#[derive(Clone)]
pub struct RemoteStore {
    host: Arc<dyn HostChannel>,
}

impl RemoteStore {
    pub fn new(host: Arc<dyn HostChannel>) -> Self {
        Self { host }
    }

    async fn write(&self, name: &str, value: Value) -> Result<(), StoreError> {
        let request = SetOptionRequest {
            option: name.to_owned(),
            value,
        };
        let payload =
            serde_json::to_value(&request).map_err(|err| StoreError::Serialization(err.to_string()))?;
        self.host.ask(CHANNEL_SET_OPTION, payload).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsBackend for RemoteStore {
    async fn get(&self, name: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .host
            .ask(CHANNEL_GET_OPTION, Value::String(name.to_owned()))
            .await?;
        Ok(raw_from_json(&value))
    }

    /// A JSON null on `set-option` deletes the option, so a stored null
    /// literal travels as its raw text and decodes back to null on load.
    async fn set(&self, name: &str, raw: &str) -> Result<(), StoreError> {
        let value = match SettingValue::decode(raw) {
            SettingValue::Null => Value::String(raw.to_owned()),
            decoded => decoded.to_json(),
        };
        self.write(name, value).await
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.write(name, Value::Null).await
    }
}

/// Binding from `BackendKind` to a concrete backend.
#[derive(Clone)]
pub struct SettingsBackends {
    local: Arc<dyn SettingsBackend>,
    remote: Arc<dyn SettingsBackend>,
}

impl SettingsBackends {
    pub fn new(local: Arc<dyn SettingsBackend>, remote: Arc<dyn SettingsBackend>) -> Self {
        Self { local, remote }
    }

    pub fn for_kind(&self, kind: BackendKind) -> &Arc<dyn SettingsBackend> {
        match kind {
            BackendKind::Local => &self.local,
            BackendKind::Remote => &self.remote,
        }
    }
}
