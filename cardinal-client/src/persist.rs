use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Persisted client files are small key/value documents.
///
/// This prevents pathological reads if a file is corrupted or replaced.
pub const MAX_PERSISTED_BYTES: u64 = 64 * 1024;

const SAVE_ATTEMPTS: u32 = 3;
const SAVE_BACKOFF_BASE: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum PersistLoadError {
    #[error("cannot stat {path}: {source}")]
    Metadata { path: String, source: io::Error },
    #[error("{path} holds {size} bytes, more than the {max} allowed")]
    TooLarge { path: String, size: u64, max: u64 },
    #[error("cannot read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("parse failed for {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum PersistSaveError {
    #[error("cannot encode document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{path} has no parent directory")]
    NoParent { path: String },
    #[error("cannot stage {path}: {source}")]
    Stage { path: String, source: io::Error },
    #[error("cannot replace {path}: {source}")]
    Replace { path: String, source: io::Error },
    #[error("save task failed: {0}")]
    Background(#[from] tokio::task::JoinError),
}

/// A JSON document on disk whose saves run one at a time.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl JsonFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for earlier saves, then snapshots `source` and writes it off the
    /// async workers. The snapshot is taken after every mutation that preceded
    /// the call, so the last save to finish holds the newest document.
    pub async fn save_latest<T>(&self, source: &Mutex<T>) -> Result<(), PersistSaveError>
    where
        T: Serialize + Clone + Send + 'static,
    {
        let turn = Arc::clone(&self.gate).lock_owned().await;
        let snapshot = source.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let _turn = turn;
            save_json_with_retry(&path, &snapshot)
        })
        .await?
    }
}

pub fn load_json_from_path<T: DeserializeOwned>(path: &Path) -> Result<T, PersistLoadError> {
    let shown = || path.display().to_string();
    let size = fs::metadata(path)
        .map_err(|source| PersistLoadError::Metadata {
            path: shown(),
            source,
        })?
        .len();
    if size > MAX_PERSISTED_BYTES {
        return Err(PersistLoadError::TooLarge {
            path: shown(),
            size,
            max: MAX_PERSISTED_BYTES,
        });
    }

    let data = fs::read(path).map_err(|source| PersistLoadError::Read {
        path: shown(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| PersistLoadError::Parse {
        path: shown(),
        source,
    })
}

/// Missing files load as the default document.
pub fn load_json_or_default<T: DeserializeOwned + Default>(
    path: &Path,
) -> Result<T, PersistLoadError> {
    if !path.exists() {
        return Ok(T::default());
    }
    load_json_from_path(path)
}

/// Writes `value` to a fresh temp file beside `path`, then renames it over
/// `path`. Each call stages under its own name, so concurrent saves never
/// share a temp file.
pub fn save_json_to_path<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistSaveError> {
    let payload = serde_json::to_vec_pretty(value)?;
    let shown = || path.display().to_string();
    let dir = path
        .parent()
        .map(|parent| if parent.as_os_str().is_empty() { Path::new(".") } else { parent })
        .ok_or_else(|| PersistSaveError::NoParent { path: shown() })?;

    let mut staged = NamedTempFile::new_in(dir).map_err(|source| PersistSaveError::Stage {
        path: shown(),
        source,
    })?;
    staged
        .write_all(&payload)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|source| PersistSaveError::Stage {
            path: shown(),
            source,
        })?;
    staged
        .persist(path)
        .map_err(|err| PersistSaveError::Replace {
            path: shown(),
            source: err.error,
        })?;
    Ok(())
}

/// Retries `save_json_to_path` with exponential backoff. Blocks the calling
/// thread, so async callers run it under `spawn_blocking`.
pub fn save_json_with_retry<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistSaveError> {
    let mut backoff = SAVE_BACKOFF_BASE;
    for _ in 1..SAVE_ATTEMPTS {
        match save_json_to_path(path, value) {
            Ok(()) => return Ok(()),
            Err(PersistSaveError::Encode(err)) => return Err(PersistSaveError::Encode(err)),
            Err(_) => {
                std::thread::sleep(backoff);
                backoff *= 2;
            }
        }
    }
    save_json_to_path(path, value)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn save_leaves_no_staging_files_behind() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join("doc.json");

        for round in 0..5 {
            let doc = BTreeMap::from([("round".to_owned(), round)]);
            save_json_with_retry(&path, &doc).expect("save document");
        }

        let loaded: BTreeMap<String, i32> = load_json_from_path(&path).expect("load document");
        assert_eq!(loaded["round"], 4);
        let entries: Vec<_> = fs::read_dir(dir.path())
            .expect("list tempdir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("doc.json")]);
    }

    #[test]
    fn oversized_files_are_refused() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join("doc.json");
        let padding = "x".repeat(MAX_PERSISTED_BYTES as usize + 1);
        fs::write(&path, format!("\"{padding}\"")).expect("write oversized file");

        let err = load_json_from_path::<String>(&path).expect_err("oversized file should error");
        assert!(matches!(err, PersistLoadError::TooLarge { .. }), "unexpected error: {err}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_end_on_the_newest_document() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let file = JsonFile::new(&dir.path().join("doc.json"));
        let doc = Arc::new(Mutex::new(BTreeMap::<String, u32>::new()));

        let mut tasks = Vec::new();
        for n in 0..40 {
            doc.lock().unwrap().insert("n".to_owned(), n);
            let file = file.clone();
            let doc = Arc::clone(&doc);
            tasks.push(tokio::spawn(async move { file.save_latest(&*doc).await }));
        }
        for task in tasks {
            task.await.expect("join save").expect("save document");
        }

        let on_disk: BTreeMap<String, u32> = load_json_from_path(file.path()).expect("load");
        assert_eq!(on_disk["n"], 39);
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let loaded: BTreeMap<String, String> =
            load_json_or_default(&dir.path().join("absent.json")).expect("default document");
        assert!(loaded.is_empty());
    }
}
