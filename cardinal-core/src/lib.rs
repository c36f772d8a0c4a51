use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;
use thiserror::Error;

/// The streaming transport always listens one port above the request port.
pub const STREAM_PORT_OFFSET: u16 = 1;

pub const CHANNEL_GET_OPTION: &str = "get-option";
pub const CHANNEL_SET_OPTION: &str = "set-option";
pub const CHANNEL_DB_API: &str = "db-api";
pub const CHANNEL_FACTORY_RESET: &str = "factory-reset";
pub const CHANNEL_ANNOUNCEMENTS: &str = "announcements";
pub const CHANNEL_PLAYER: &str = "player";
pub const CHANNEL_I18N: &str = "i18n";
pub const CHANNEL_CHECK_FOR_UPDATES: &str = "check-for-updates-silently";

pub const I18N_HTTP_PATH: &str = "/i18n";
pub const SERVERS_TABLE: &str = "servers";

/// Persisted option names referenced by the client.
pub mod keys {
    pub const DEFAULT_SERVER: &str = "default_server";
    pub const LANG: &str = "lang";
    pub const START_PAGE: &str = "start_page";
    pub const ACCENT_COLOR: &str = "accent_color";
    pub const CUSTOM_CSS: &str = "custom_css";
    pub const COLOR_THEME: &str = "color_theme";
    pub const DEVELOPER_MODE: &str = "developer_mode";
    pub const AUTO_CHECK_FOR_UPDATES: &str = "auto_check_for_updates";
    pub const NOTIFICATION_ON_SONG_CHANGE: &str = "notification_on_song_change";
    pub const CONFIRM_ELECTRON_QUIT: &str = "confirm_electron_quit";
}

pub type ServerId = String;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("host is required")]
    MissingHost,
    #[error("port is required")]
    MissingPort,
    #[error("stream port for request port {0} is out of range")]
    StreamPortOutOfRange(u16),
    #[error("stream transport cannot be marked connected before the request transport")]
    StreamWithoutRequestTransport,
    #[error("directive has no action")]
    MissingDirectiveAction,
    #[error("unsupported directive {action}: {reason}")]
    UnsupportedDirective { action: String, reason: String },
    #[error("unknown settings backend {0}")]
    UnknownBackend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: ServerId,
    #[serde(rename = "server_host")]
    pub host: String,
    #[serde(rename = "server_port_http", deserialize_with = "port_from_string_or_number")]
    pub http_port: u16,
}

impl ServerRecord {
    pub fn ws_port(&self) -> Result<u16, CoreError> {
        stream_port(self.http_port)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    /// Decode a row returned by the host's `db-api getRow` call.
    ///
    /// Missing rows come back as `null`; rows that no longer match the record
    /// shape are treated the same way.
    pub fn from_row(row: &Value) -> Option<Self> {
        if row.is_null() {
            return None;
        }
        serde_json::from_value(row.clone()).ok()
    }
}

pub fn stream_port(http_port: u16) -> Result<u16, CoreError> {
    http_port
        .checked_add(STREAM_PORT_OFFSET)
        .ok_or(CoreError::StreamPortOutOfRange(http_port))
}

pub fn validate_endpoint(host: &str, port: u16) -> Result<(), CoreError> {
    if host.trim().is_empty() {
        return Err(CoreError::MissingHost);
    }
    if port == 0 {
        return Err(CoreError::MissingPort);
    }
    stream_port(port)?;
    Ok(())
}

/// Process-wide connection flags.
///
/// The stream flag can only be raised while the request flag is up, and
/// lowering the request flag lowers the stream flag with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    http_connected: bool,
    ws_connected: bool,
    active_server: Option<ServerRecord>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn http_connected(&self) -> bool {
        self.http_connected
    }

    pub fn ws_connected(&self) -> bool {
        self.ws_connected
    }

    pub fn is_usable(&self) -> bool {
        self.http_connected && self.ws_connected
    }

    pub fn active_server(&self) -> Option<&ServerRecord> {
        self.active_server.as_ref()
    }

    pub fn mark_http(&mut self, connected: bool) {
        self.http_connected = connected;
        if !connected {
            self.ws_connected = false;
        }
    }

    pub fn mark_ws(&mut self, connected: bool) -> Result<(), CoreError> {
        if connected && !self.http_connected {
            return Err(CoreError::StreamWithoutRequestTransport);
        }
        self.ws_connected = connected;
        Ok(())
    }

    pub fn set_active_server(&mut self, server: Option<ServerRecord>) {
        self.active_server = server;
    }
}

/// A setting value after primitive-literal decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl SettingValue {
    /// Parses `true`/`false`/`null`/numbers, falling back to the raw string.
    pub fn decode(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw.trim()) {
            Ok(Value::Null) => SettingValue::Null,
            Ok(Value::Bool(value)) => SettingValue::Bool(value),
            Ok(Value::Number(value)) => SettingValue::Number(value),
            _ => SettingValue::Text(raw.to_owned()),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SettingValue::Null => "null".to_owned(),
            SettingValue::Bool(value) => value.to_string(),
            SettingValue::Number(value) => value.to_string(),
            SettingValue::Text(value) => value.clone(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            SettingValue::Null => false,
            SettingValue::Bool(value) => *value,
            SettingValue::Number(value) => value.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
            SettingValue::Text(value) => !value.is_empty(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            SettingValue::Null => Value::Null,
            SettingValue::Bool(value) => Value::Bool(*value),
            SettingValue::Number(value) => Value::Number(value.clone()),
            SettingValue::Text(value) => Value::String(value.clone()),
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Raw storage encoding of a JSON value as handed back by the host.
/// `null` means the option was never written.
pub fn raw_from_json(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
}

impl FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "local" => Ok(BackendKind::Local),
            "remote" => Ok(BackendKind::Remote),
            other => Err(CoreError::UnknownBackend(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    AutoconnectFailed,
}

impl LockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockReason::AutoconnectFailed => "autoconnect-failed",
        }
    }
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDirection {
    Left,
    Right,
    #[serde(other)]
    Other,
}

/// Directives pushed by the host process on the `announcements` channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Directive {
    #[serde(rename = "maximized")]
    Maximized,
    #[serde(rename = "openSettings")]
    OpenSettings,
    Swipe {
        direction: SwipeDirection,
    },
    Back,
    Forward,
    Play,
    Pause,
    #[serde(rename = "playpause")]
    PlayPause,
    Stop,
    Next,
    Previous,
    #[serde(rename = "togglequeue")]
    ToggleQueue,
    Alert {
        message: String,
    },
    ShowWelcome,
    ShowOpenSource,
    ShowAbout,
    ZoomIn,
    ZoomOut,
    ResetZoom,
}

pub fn parse_directive(value: &Value) -> Result<Directive, CoreError> {
    let action = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or(CoreError::MissingDirectiveAction)?;
    serde_json::from_value(value.clone()).map_err(|err| CoreError::UnsupportedDirective {
        action: action.to_owned(),
        reason: err.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbApiRequest {
    #[serde(rename = "fn")]
    pub function: String,
    pub args: Vec<Value>,
}

impl DbApiRequest {
    pub fn get_row(table: &str, id: &str) -> Self {
        Self {
            function: "getRow".to_owned(),
            args: vec![Value::String(table.to_owned()), Value::String(id.to_owned())],
        }
    }

    pub fn to_value(&self) -> Result<Value, CoreError> {
        serde_json::to_value(self).map_err(|err| CoreError::Serialization(err.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetOptionRequest {
    pub option: String,
    pub value: Value,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn port_from_string_or_number<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_u64()
            .and_then(|port| u16::try_from(port).ok())
            .ok_or_else(|| de::Error::custom(format!("port {number} out of range"))),
        Value::String(text) => text
            .trim()
            .parse::<u16>()
            .map_err(|err| de::Error::custom(format!("invalid port {text:?}: {err}"))),
        other => Err(de::Error::custom(format!("expected port, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decode_primitive_literals() {
        assert_eq!(SettingValue::decode("true"), SettingValue::Bool(true));
        assert_eq!(SettingValue::decode("false"), SettingValue::Bool(false));
        assert_eq!(SettingValue::decode("null"), SettingValue::Null);
        assert_eq!(SettingValue::decode("42"), SettingValue::Number(42.into()));
        assert_eq!(
            SettingValue::decode("#ff0066"),
            SettingValue::Text("#ff0066".to_owned())
        );
        assert_eq!(SettingValue::decode(""), SettingValue::Text(String::new()));
    }

    #[test]
    fn decode_does_not_unwrap_json_strings_or_objects() {
        assert_eq!(
            SettingValue::decode("{\"a\":1}"),
            SettingValue::Text("{\"a\":1}".to_owned())
        );
        assert_eq!(
            SettingValue::decode("\"quoted\""),
            SettingValue::Text("\"quoted\"".to_owned())
        );
    }

    #[test]
    fn truthiness_follows_primitive_rules() {
        assert!(SettingValue::decode("1").is_truthy());
        assert!(!SettingValue::decode("0").is_truthy());
        assert!(!SettingValue::decode("null").is_truthy());
        assert!(!SettingValue::decode("").is_truthy());
        assert!(SettingValue::decode("en").is_truthy());
    }

    #[test]
    fn raw_from_json_treats_null_as_unset() {
        assert_eq!(raw_from_json(&Value::Null), None);
        assert_eq!(raw_from_json(&json!("dark")), Some("dark".to_owned()));
        assert_eq!(raw_from_json(&json!(1)), Some("1".to_owned()));
        assert_eq!(raw_from_json(&json!(false)), Some("false".to_owned()));
    }

    #[test]
    fn endpoint_validation() {
        assert_eq!(validate_endpoint("", 8080), Err(CoreError::MissingHost));
        assert_eq!(validate_endpoint("   ", 8080), Err(CoreError::MissingHost));
        assert_eq!(validate_endpoint("media.local", 0), Err(CoreError::MissingPort));
        assert_eq!(
            validate_endpoint("media.local", u16::MAX),
            Err(CoreError::StreamPortOutOfRange(u16::MAX))
        );
        assert!(validate_endpoint("media.local", 8080).is_ok());
    }

    #[test]
    fn server_record_from_row_accepts_string_port_and_numeric_id() {
        let row = json!({"id": 3, "server_host": "10.0.0.2", "server_port_http": "7000"});
        let record = ServerRecord::from_row(&row).unwrap();
        assert_eq!(record.id, "3");
        assert_eq!(record.http_port, 7000);
        assert_eq!(record.ws_port().unwrap(), 7001);
        assert_eq!(record.address(), "10.0.0.2:7000");

        assert!(ServerRecord::from_row(&Value::Null).is_none());
        assert!(ServerRecord::from_row(&json!({"id": 1})).is_none());
    }

    #[test]
    fn stream_flag_requires_request_flag() {
        let mut state = ConnectionState::new();
        assert_eq!(
            state.mark_ws(true),
            Err(CoreError::StreamWithoutRequestTransport)
        );

        state.mark_http(true);
        state.mark_ws(true).unwrap();
        assert!(state.is_usable());

        state.mark_http(false);
        assert!(!state.ws_connected());
        assert!(!state.is_usable());
    }

    #[test]
    fn directive_parsing() {
        assert_eq!(
            parse_directive(&json!({"action": "playpause"})).unwrap(),
            Directive::PlayPause
        );
        assert_eq!(
            parse_directive(&json!({"action": "openSettings"})).unwrap(),
            Directive::OpenSettings
        );
        assert_eq!(
            parse_directive(&json!({"action": "swipe", "direction": "left"})).unwrap(),
            Directive::Swipe {
                direction: SwipeDirection::Left
            }
        );
        assert_eq!(
            parse_directive(&json!({"action": "swipe", "direction": "up"})).unwrap(),
            Directive::Swipe {
                direction: SwipeDirection::Other
            }
        );
        assert_eq!(
            parse_directive(&json!({"action": "show-open-source"})).unwrap(),
            Directive::ShowOpenSource
        );
        assert_eq!(
            parse_directive(&json!({"action": "alert", "message": "hi"})).unwrap(),
            Directive::Alert {
                message: "hi".to_owned()
            }
        );
        assert_eq!(
            parse_directive(&json!({"direction": "left"})),
            Err(CoreError::MissingDirectiveAction)
        );
        assert!(matches!(
            parse_directive(&json!({"action": "self-destruct"})),
            Err(CoreError::UnsupportedDirective { .. })
        ));
    }

    #[test]
    fn db_api_get_row_shape() {
        let request = DbApiRequest::get_row(SERVERS_TABLE, "7").to_value().unwrap();
        assert_eq!(request, json!({"fn": "getRow", "args": ["servers", "7"]}));
    }

    #[test]
    fn backend_kind_from_attribute() {
        assert_eq!("local".parse::<BackendKind>(), Ok(BackendKind::Local));
        assert_eq!("remote".parse::<BackendKind>(), Ok(BackendKind::Remote));
        assert_eq!(
            "db".parse::<BackendKind>(),
            Err(CoreError::UnknownBackend("db".to_owned()))
        );
    }
}
