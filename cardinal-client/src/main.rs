use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::{Arc, Mutex},
};

use cardinal_client::{
    app::{App, StartupOutcome},
    bridge::{HostChannel, ServerTransport},
    config::{ClientArgs, ClientConfig, resolve_config},
    host::{HostDocument, LocalHost},
    net::NetTransport,
    store::LocalStore,
};
use cardinal_core::CHANNEL_ANNOUNCEMENTS;
use clap::Parser;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::MakeWriter;

struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct FileWriterGuard {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.flush()
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            file: Arc::clone(&self.file),
        }
    }
}

fn init_logging(log_path: &Path) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open log file {}: {err}", log_path.display());
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
            return;
        }
    };

    let make_writer = FileMakeWriter {
        file: Arc::new(Mutex::new(file)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(make_writer)
        .init();
}

/// One line of stdin: either a directive for the host to announce, or a
/// setting edit as the settings panel would make it.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConsoleInput {
    Setting { setting: String, value: String },
    Directive(Value),
}

fn open_host(config: &ClientConfig) -> Arc<LocalHost> {
    let path = config.host_store_path();
    match LocalHost::open(&path) {
        Ok(host) => Arc::new(host),
        Err(err) => {
            warn!("host store {} unusable, starting empty: {}", path.display(), err);
            Arc::new(LocalHost::in_memory(HostDocument::default()))
        }
    }
}

fn open_local_store(config: &ClientConfig) -> Arc<LocalStore> {
    let path = config.local_settings_path();
    match LocalStore::open(&path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            warn!("local settings {} unusable, starting empty: {}", path.display(), err);
            Arc::new(LocalStore::in_memory())
        }
    }
}

#[tokio::main]
async fn main() {
    let args = ClientArgs::parse();
    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    init_logging(&config.log_path());
    info!(config_dir = %config.config_dir.display(), env = ?config.env, "cardinal client starting");

    let transport: Arc<dyn ServerTransport> = match NetTransport::new(config.connect_timeout) {
        Ok(transport) => Arc::new(transport),
        Err(err) => {
            error!("failed to create network transport: {}", err);
            std::process::exit(1);
        }
    };
    let host = open_host(&config);
    let local = open_local_store(&config);

    let host_channel: Arc<dyn HostChannel> = host.clone();
    let mut app = App::new(transport, host_channel, local, config.env);

    let mut outcome = app.start().await;
    if outcome == StartupOutcome::Locked
        && let Some(manual) = &config.manual_server
    {
        let record = manual.record();
        if manual.remember
            && let Err(err) = host.upsert_server(record.clone()).await
        {
            warn!("failed to store manual server: {}", err);
        }
        match app.connect_manually(&record, manual.remember).await {
            Ok(true) => outcome = StartupOutcome::Connected,
            Ok(false) => warn!(server = %record.address(), "manual connection failed"),
            Err(err) => warn!("manual server rejected: {}", err),
        }
    }
    info!(?outcome, "startup finished");

    let update_check = app.spawn_update_check();
    let mut outcomes = app.settings_mut().take_write_outcomes();
    let announcements = host.listen(CHANNEL_ANNOUNCEMENTS);
    let announcements_id = announcements.id;
    let dispatch_task = tokio::spawn(app.dispatcher().run(announcements));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        warn!("stdin read failed: {}", err);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ConsoleInput>(&line) {
                    Ok(ConsoleInput::Setting { setting, value }) => {
                        if let Err(err) = app.settings_mut().apply_user_input(&setting, &value).await {
                            warn!(setting = %setting, "setting edit rejected: {}", err);
                        }
                    }
                    Ok(ConsoleInput::Directive(directive)) => {
                        host.announce(directive);
                    }
                    Err(err) => warn!("ignoring console input: {}", err),
                }
            }
            Some(write) = async {
                match outcomes.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                if let Err(err) = &write.result {
                    warn!(setting = %write.name, backend = ?write.backend, "write failed: {}", err);
                }
            }
        }
    }

    host.remove_listener(CHANNEL_ANNOUNCEMENTS, announcements_id);
    let _ = dispatch_task.await;
    if let Some(handle) = update_check {
        handle.abort();
    }
    info!("cardinal client exiting");
}
