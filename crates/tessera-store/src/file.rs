//! Filesystem-backed credential store.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use fs2::FileExt;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use tessera_core::error::StoreError;
use tessera_core::traits::CredentialStore;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Stores each key as a JSON file under a root directory.
///
/// Writes go to a unique temp file that is renamed over the target while an
/// exclusive lock on `<root>/.lock` is held, so concurrent writers (including
/// other processes) never leave a torn file behind. Files are created with
/// `0600` permissions on Unix.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    /// Create a new file store at the given root directory.
    ///
    /// The directory is created lazily on first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Get the root directory path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a key into a filesystem-safe file name.
    fn file_name(key: &str) -> String {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}.json", safe.trim_start_matches('.'))
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(Self::file_name(key))
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }

    fn read_value(path: &Path, key: &str, bytes: &[u8]) -> Result<Value, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| {
            warn!(path = %path.display(), "credential file is not valid JSON");
            StoreError::serialization(key, e)
        })
    }

    fn with_lock<T>(
        &self,
        key: &str,
        op: impl FnOnce() -> std::io::Result<T>,
    ) -> Result<T, StoreError> {
        fs::create_dir_all(&self.root).map_err(|e| StoreError::io(key, e))?;

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| StoreError::io(key, e))?;

        lock_file
            .lock_exclusive()
            .map_err(|e| StoreError::io(key, e))?;
        let result = op().map_err(|e| StoreError::io(key, e));
        if let Err(e) = lock_file.unlock() {
            warn!(error = %e, "failed to release credential store lock");
        }
        result
    }

    fn write_blocking(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let path = self.key_path(key);
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self.root.join(format!(
            ".{}.{}.{}.tmp",
            Self::file_name(key),
            std::process::id(),
            seq
        ));

        self.with_lock(key, || {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;

            #[cfg(unix)]
            file.set_permissions(fs::Permissions::from_mode(0o600))?;

            file.write_all(bytes)?;
            file.sync_data()?;
            drop(file);

            fs::rename(&tmp_path, &path).inspect_err(|_| {
                let _ = fs::remove_file(&tmp_path);
            })
        })
    }

    fn remove_blocking(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_path(key);
        self.with_lock(key, || match fs::remove_file(&path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        })
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.key_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Self::read_value(&path, key, &bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    fn get_sync(&self, key: &str) -> Option<Value> {
        let path = self.key_path(key);
        let bytes = fs::read(&path).ok()?;
        Self::read_value(&path, key, &bytes).ok()
    }

    #[instrument(skip(self, value), fields(root = %self.root.display()))]
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(&value).map_err(|e| StoreError::serialization(key, e))?;
        let store = self.clone();
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || store.write_blocking(&owned_key, &bytes))
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("write task failed: {e}"),
            })??;
        debug!("credential file written");
        Ok(())
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let store = self.clone();
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || store.remove_blocking(&owned_key))
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("remove task failed: {e}"),
            })?
    }
}
