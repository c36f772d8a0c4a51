use std::{path::PathBuf, time::Duration};

use cardinal_core::{ServerRecord, validate_endpoint};
use clap::{Parser, ValueEnum};

pub const CONFIG_DIR_ENV: &str = "CARDINAL_CONFIG_DIR";
pub const HOST_STORE_FILE: &str = "host.json";
pub const LOCAL_SETTINGS_FILE: &str = "local_settings.json";
pub const LOG_FILE: &str = "cardinal-client.log";

const MAX_HOST_LEN: usize = 253;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 12;

/// Where the UI is hosted. Zoom directives and the update check only apply
/// to the desktop shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Desktop,
    Browser,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "cardinal-client")]
pub struct ClientArgs {
    /// Directory holding host.json, local_settings.json and logs.
    #[arg(long)]
    pub config_dir: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Environment::Desktop)]
    pub env: Environment,
    /// Server to try from the lock screen when autoconnect fails.
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    /// Store the manually entered server as the default.
    #[arg(long, default_value_t = false)]
    pub remember: bool,
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ManualServer {
    pub host: String,
    pub port: u16,
    pub remember: bool,
}

impl ManualServer {
    /// Server row for a manually entered endpoint, keyed by its address.
    pub fn record(&self) -> ServerRecord {
        ServerRecord {
            id: format!("{}:{}", self.host, self.port),
            host: self.host.clone(),
            http_port: self.port,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub config_dir: PathBuf,
    pub env: Environment,
    pub manual_server: Option<ManualServer>,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn host_store_path(&self) -> PathBuf {
        self.config_dir.join(HOST_STORE_FILE)
    }

    pub fn local_settings_path(&self) -> PathBuf {
        self.config_dir.join(LOCAL_SETTINGS_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.config_dir.join("logs").join(LOG_FILE)
    }
}

pub fn resolve_config(args: &ClientArgs) -> Result<ClientConfig, String> {
    let config_dir = args.config_dir.clone().unwrap_or_else(default_config_dir);
    std::fs::create_dir_all(&config_dir)
        .map_err(|err| format!("failed to create {}: {err}", config_dir.display()))?;

    let manual_server = match (args.host.as_deref(), args.port) {
        (Some(host), Some(port)) => Some(ManualServer {
            host: host.trim().to_owned(),
            port,
            remember: args.remember,
        }),
        (None, None) => None,
        _ => return Err("--host and --port must be given together".to_owned()),
    };

    let config = ClientConfig {
        config_dir,
        env: args.env,
        manual_server,
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
    };
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &ClientConfig) -> Result<(), String> {
    let mut errors: Vec<String> = Vec::new();

    if config.connect_timeout.is_zero() {
        errors.push("Connect timeout must be at least one second.".to_string());
    }

    if let Some(server) = &config.manual_server {
        if let Err(err) = validate_endpoint(&server.host, server.port) {
            errors.push(format!("Server is invalid: {err}."));
        } else if server.host.len() > MAX_HOST_LEN {
            errors.push(format!(
                "Host is too long ({} > {} chars).",
                server.host.len(),
                MAX_HOST_LEN
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "Please fix the following:\n\n- {}",
            errors.join("\n- ")
        ))
    }
}

pub fn default_config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return PathBuf::from(override_dir);
    }

    let base = std::env::var_os("LOCALAPPDATA")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("Cardinal")
}
