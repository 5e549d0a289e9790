//! Durable key-value backends for credential storage
//!
//! Credentials are kept under three string keys, so the backend contract is a
//! plain string map with an all-or-nothing batch mutation. `FileStore`
//! persists the map as a JSON object; every mutation is written to a temp
//! file and renamed over the target so a crash never leaves a torn file.
//! `MemoryStore` keeps the map in process for embedding and tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// One key mutation: `Some` sets the value, `None` removes the key.
pub type Change<'a> = (&'a str, Option<&'a str>);

/// String key-value persistence used by `CredentialStore`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a key. `Ok(None)` means the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Apply every change or none of them.
    ///
    /// Readers must never observe a subset of `changes`, and an error must
    /// leave the map as it was.
    async fn apply(&self, changes: &[Change<'_>]) -> Result<()>;

    /// Insert or replace a key.
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.apply(&[(key, Some(value))]).await
    }

    /// Remove a key. Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<()> {
        self.apply(&[(key, None)]).await
    }
}

fn apply_changes(entries: &mut HashMap<String, String>, changes: &[Change<'_>]) {
    for (key, value) in changes {
        match value {
            Some(v) => {
                entries.insert(key.to_string(), v.to_string());
            }
            None => {
                entries.remove(*key);
            }
        }
    }
}

/// In-process key-value map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn apply(&self, changes: &[Change<'_>]) -> Result<()> {
        apply_changes(&mut *self.entries.lock().await, changes);
        Ok(())
    }
}

/// JSON file backed key-value map.
///
/// The Mutex serializes writers. A batch is applied to a copy of the map,
/// persisted with a single atomic write, and only then committed in memory,
/// so a failed write leaves both the file and the in-memory view at their
/// previous state.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Load the map from the given file path.
    ///
    /// A missing file is created as `{}`. A file that exists but does not
    /// parse is treated as empty and overwritten by the next write, since
    /// unreadable credentials are equivalent to no credentials.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
                Error::StorageUnavailable(format!("reading credential file: {e}"))
            })?;
            match serde_json::from_str::<HashMap<String, String>>(&contents) {
                Ok(entries) => {
                    info!(path = %path.display(), keys = entries.len(), "loaded credential file");
                    entries
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "credential file is corrupted, starting empty");
                    HashMap::new()
                }
            }
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let entries = HashMap::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().await.get(key).cloned())
    }

    async fn apply(&self, changes: &[Change<'_>]) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        apply_changes(&mut next, changes);
        if next == *state {
            return Ok(());
        }
        write_atomic(&self.path, &next).await?;
        *state = next;
        debug!(changes = changes.len(), "applied credential changes");
        Ok(())
    }
}

/// Distinguishes temp files of concurrent writes within one process.
static TEMP_FILE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write the map to a file atomically.
///
/// Writes to a uniquely named temporary file in the same directory, then
/// renames it over the target. Permissions are 0600 on unix since the file
/// holds tokens. The temp file is removed if any step fails.
async fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::StorageUnavailable(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::StorageUnavailable("credential path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::StorageUnavailable("credential path has no file name".into()))?;

    let tmp_path = dir.join(format!(
        ".{}.tmp.{}.{}",
        file_name.to_string_lossy(),
        std::process::id(),
        TEMP_FILE_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = write_and_rename(&tmp_path, path, json.as_bytes()).await {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await
            && cleanup.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %tmp_path.display(), error = %cleanup, "failed to remove temp credential file");
        }
        return Err(e);
    }

    debug!(path = %path.display(), "persisted credential file");
    Ok(())
}

async fn write_and_rename(tmp_path: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    tokio::fs::write(tmp_path, contents)
        .await
        .map_err(|e| Error::StorageUnavailable(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(tmp_path, perms)
            .await
            .map_err(|e| {
                Error::StorageUnavailable(format!("setting credential file permissions: {e}"))
            })?;
    }

    tokio::fs::rename(tmp_path, path)
        .await
        .map_err(|e| Error::StorageUnavailable(format!("renaming temp credential file: {e}")))
}
