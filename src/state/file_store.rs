//! File system state store
//!
//! One JSON file per key under a base directory. The ETag of a key is the
//! SHA-256 of its stored bytes, so any change on disk changes the token.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::errors::{StateError, StateResult};
use super::store::{check_condition, StateItem, StateStore, WriteCondition};

/// File-backed [`StateStore`]
///
/// Compare-and-swap is serialized by an in-process lock; the store is safe
/// for many tasks in one process, not for several processes sharing a directory.
pub struct FileStateStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStateStore {
    /// Create a new file state store, creating `base_path` if needed.
    ///
    /// A `base_path` that exists but is not a directory is a configuration error.
    pub fn new<P: AsRef<Path>>(base_path: P) -> StateResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        if base_path.exists() && !base_path.is_dir() {
            return Err(StateError::config(format!(
                "state path {} is not a directory",
                base_path.display()
            )));
        }

        // Synchronous so the constructor stays non-async
        std::fs::create_dir_all(&base_path)?;

        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Keys may contain ':' and '/', so they are percent-encoded into a flat file name
    fn key_to_path(&self, key: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.json", urlencoding::encode(key)))
    }

    fn etag_of(bytes: &[u8]) -> String {
        let digest = Sha256::digest(bytes);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    async fn read_bytes(&self, path: &Path) -> StateResult<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn current_etag(&self, path: &Path) -> StateResult<Option<String>> {
        Ok(self.read_bytes(path).await?.map(|bytes| Self::etag_of(&bytes)))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    fn backend_type(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> StateResult<Option<StateItem>> {
        let path = self.key_to_path(key);
        let Some(bytes) = self.read_bytes(&path).await? else {
            return Ok(None);
        };

        let value: Value = serde_json::from_slice(&bytes)?;
        Ok(Some(StateItem {
            value,
            etag: Self::etag_of(&bytes),
        }))
    }

    async fn save(&self, key: &str, value: &Value, condition: WriteCondition<'_>) -> StateResult<String> {
        let data = serde_json::to_vec_pretty(value)?;
        let path = self.key_to_path(key);

        let _guard = self.write_lock.lock().await;
        let current = self.current_etag(&path).await?;
        check_condition(key, current.as_deref(), condition)?;

        // Write atomically using temp file + rename pattern
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &path).await?;

        Ok(Self::etag_of(&data))
    }

    async fn delete(&self, key: &str, etag: Option<&str>) -> StateResult<()> {
        let path = self.key_to_path(key);

        let _guard = self.write_lock.lock().await;
        let Some(current) = self.current_etag(&path).await? else {
            return Ok(()); // Idempotent delete
        };

        if let Some(expected) = etag {
            if expected != current {
                return Err(StateError::etag_mismatch(key));
            }
        }

        fs::remove_file(&path).await?;
        Ok(())
    }
}
