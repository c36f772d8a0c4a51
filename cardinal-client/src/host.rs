//! In-process host: answers the host channel from a persisted JSON document.

use std::{
    collections::BTreeMap,
    mem,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use cardinal_core::{
    CHANNEL_ANNOUNCEMENTS, CHANNEL_DB_API, CHANNEL_FACTORY_RESET, CHANNEL_GET_OPTION,
    CHANNEL_I18N, CHANNEL_SET_OPTION, DbApiRequest, SERVERS_TABLE, ServerRecord,
    SetOptionRequest, keys,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    bridge::{BridgeError, HostChannel, Listener, ListenerId, ListenerRegistry},
    persist::{JsonFile, PersistLoadError, load_json_or_default, save_json_with_retry},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostDocument {
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    #[serde(default)]
    pub servers: Vec<ServerRecord>,
    /// Translation strings the host can hand out before any server connection.
    #[serde(default)]
    pub strings: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostSignal {
    pub channel: String,
    pub payload: Value,
}

#[derive(Debug, Default)]
pub struct LocalHost {
    file: Option<JsonFile>,
    document: Arc<Mutex<HostDocument>>,
    signals: Mutex<Vec<HostSignal>>,
    listeners: ListenerRegistry,
    background_saves: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalHost {
    pub fn in_memory(document: HostDocument) -> Self {
        Self {
            document: Arc::new(Mutex::new(document)),
            ..Self::default()
        }
    }

    pub fn open(path: &Path) -> Result<Self, PersistLoadError> {
        let document: HostDocument = load_json_or_default(path)?;
        Ok(Self {
            file: Some(JsonFile::new(path)),
            document: Arc::new(Mutex::new(document)),
            ..Self::default()
        })
    }

    pub fn document(&self) -> HostDocument {
        self.lock_document().clone()
    }

    /// Adds or replaces a server row.
    pub async fn upsert_server(&self, record: ServerRecord) -> Result<(), BridgeError> {
        self.modify(|document| {
            document.servers.retain(|existing| existing.id != record.id);
            document.servers.push(record);
        })
        .await
    }

    pub async fn set_default_server(&self, id: &str) -> Result<(), BridgeError> {
        self.modify(|document| {
            document
                .options
                .insert(keys::DEFAULT_SERVER.to_owned(), Value::String(id.to_owned()));
        })
        .await
    }

    /// Pushes a directive to every `announcements` listener.
    pub fn announce(&self, directive: Value) -> usize {
        self.listeners.emit(CHANNEL_ANNOUNCEMENTS, &directive)
    }

    /// Signals received through `say`, oldest first.
    pub fn signals(&self) -> Vec<HostSignal> {
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_document(&self) -> std::sync::MutexGuard<'_, HostDocument> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for saves started by `say`, which cannot await them itself.
    pub async fn flush(&self) {
        let pending = mem::take(
            &mut *self
                .background_saves
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for save in pending {
            let _ = save.await;
        }
    }

    async fn modify(&self, f: impl FnOnce(&mut HostDocument)) -> Result<(), BridgeError> {
        f(&mut self.lock_document());
        let Some(file) = &self.file else {
            return Ok(());
        };
        file.save_latest(&*self.document)
            .await
            .map_err(|err| BridgeError::Host {
                channel: CHANNEL_SET_OPTION.to_owned(),
                reason: err.to_string(),
            })
    }

    fn save_in_background(&self) {
        let Some(file) = self.file.clone() else {
            return;
        };
        let document = Arc::clone(&self.document);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let save = runtime.spawn(async move {
                    if let Err(err) = file.save_latest(&*document).await {
                        warn!("host document could not be persisted: {}", err);
                    }
                });
                self.background_saves
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(save);
            }
            Err(_) => {
                let snapshot = document.lock().unwrap_or_else(PoisonError::into_inner).clone();
                if let Err(err) = save_json_with_retry(file.path(), &snapshot) {
                    warn!("host document could not be persisted: {}", err);
                }
            }
        }
    }

    fn db_api(&self, payload: Value) -> Result<Value, BridgeError> {
        let request: DbApiRequest =
            serde_json::from_value(payload).map_err(|err| BridgeError::Host {
                channel: CHANNEL_DB_API.to_owned(),
                reason: err.to_string(),
            })?;

        match (request.function.as_str(), request.args.as_slice()) {
            ("getRow", [table, id]) if table.as_str() == Some(SERVERS_TABLE) => {
                let id = match id {
                    Value::String(id) => id.clone(),
                    Value::Number(id) => id.to_string(),
                    _ => return Ok(Value::Null),
                };
                let document = self.lock_document();
                let row = document
                    .servers
                    .iter()
                    .find(|server| server.id == id)
                    .map(serde_json::to_value)
                    .transpose()
                    .map_err(|err| BridgeError::Host {
                        channel: CHANNEL_DB_API.to_owned(),
                        reason: err.to_string(),
                    })?;
                Ok(row.unwrap_or(Value::Null))
            }
            ("getRow", _) => Ok(Value::Null),
            (other, _) => Err(BridgeError::Host {
                channel: CHANNEL_DB_API.to_owned(),
                reason: format!("unsupported db-api function {other}"),
            }),
        }
    }
}

#[async_trait]
impl HostChannel for LocalHost {
    async fn ask(&self, channel: &str, payload: Value) -> Result<Value, BridgeError> {
        debug!(channel, "host ask");
        match channel {
            CHANNEL_GET_OPTION => {
                let name = payload.as_str().ok_or_else(|| BridgeError::Host {
                    channel: channel.to_owned(),
                    reason: "option name must be a string".to_owned(),
                })?;
                Ok(self
                    .lock_document()
                    .options
                    .get(name)
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            CHANNEL_SET_OPTION => {
                let request: SetOptionRequest =
                    serde_json::from_value(payload).map_err(|err| BridgeError::Host {
                        channel: channel.to_owned(),
                        reason: err.to_string(),
                    })?;
                self.modify(|document| {
                    if request.value.is_null() {
                        document.options.remove(&request.option);
                    } else {
                        document.options.insert(request.option, request.value);
                    }
                })
                .await?;
                Ok(Value::Bool(true))
            }
            CHANNEL_DB_API => self.db_api(payload),
            CHANNEL_I18N => Ok(self.lock_document().strings.clone().unwrap_or(Value::Null)),
            other => Err(BridgeError::UnsupportedChannel(other.to_owned())),
        }
    }

    fn say(&self, channel: &str, payload: Value) {
        info!(channel, %payload, "host signal");
        if channel == CHANNEL_FACTORY_RESET {
            {
                let mut document = self.lock_document();
                document.options.clear();
                document.servers.clear();
            }
            self.save_in_background();
        }
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(HostSignal {
                channel: channel.to_owned(),
                payload,
            });
    }

    fn listen(&self, channel: &str) -> Listener {
        self.listeners.listen(channel)
    }

    fn remove_listener(&self, channel: &str, id: ListenerId) {
        self.listeners.remove(channel, id);
    }
}
