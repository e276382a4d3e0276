//! Local filesystem backend
//!
//! Stores each object as a file under a root directory, using the object key
//! as the relative path. Locking uses `<key>.lock` marker files created with
//! `create_new`, so acquisition stays atomic between processes sharing the
//! directory. Meant for development and single-machine use.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::backend::{BackendError, BackendResult};
use crate::lock::LockInfo;
use crate::store::{LockClient, ObjectStore};

/// Object store over a local directory
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at the given directory. The directory does not
    /// have to exist yet; it is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn collect_keys(&self, dir: &Path, keys: &mut Vec<String>) -> BackendResult<()> {
        let entries = fs::read_dir(dir)
            .map_err(|e| BackendError::Io(format!("Failed to read directory: {}", e)))?;

        for entry in entries {
            let entry = entry
                .map_err(|e| BackendError::Io(format!("Failed to read directory entry: {}", e)))?;
            let path = entry.path();
            if path.is_dir() {
                self.collect_keys(&path, keys)?;
                continue;
            }

            let relative = match path.strip_prefix(&self.root) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            let key = relative.to_string_lossy().into_owned();
            // lock markers live alongside objects but are not objects
            if key.ends_with(".lock") {
                continue;
            }
            keys.push(key);
        }

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        self.collect_keys(&self.root, &mut keys)?;
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let path = self.object_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path)
            .map_err(|e| BackendError::Io(format!("Failed to read object: {}", e)))?;
        Ok(Some(data))
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> BackendResult<()> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BackendError::Io(format!("Failed to create directory: {}", e)))?;
        }

        fs::write(&path, data)
            .map_err(|e| BackendError::Io(format!("Failed to write object: {}", e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let path = self.object_path(key);
        if !path.exists() {
            return Ok(());
        }

        fs::remove_file(&path)
            .map_err(|e| BackendError::Io(format!("Failed to remove object: {}", e)))?;
        Ok(())
    }
}

/// Lock client over `.lock` marker files in the same directory tree
pub struct LocalLockClient {
    root: PathBuf,
}

impl LocalLockClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.lock", key))
    }

    fn read_holder(path: &Path) -> Option<LockInfo> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

#[async_trait]
impl LockClient for LocalLockClient {
    async fn try_acquire(&self, key: &str, info: &LockInfo) -> BackendResult<String> {
        let path = self.lock_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BackendError::Io(format!("Failed to create directory: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(info)
            .map_err(|e| BackendError::Serialization(format!("Failed to serialize lock: {}", e)))?;

        // create_new makes existence-check and creation one atomic step
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = Self::read_holder(&path).unwrap_or_else(|| LockInfo {
                    id: "unknown".to_string(),
                    operation: "unknown".to_string(),
                    who: "unknown".to_string(),
                    version: String::new(),
                    created: chrono::Utc::now(),
                    path: key.to_string(),
                });
                return Err(BackendError::locked(&holder));
            }
            Err(e) => {
                return Err(BackendError::Io(format!(
                    "Failed to create lock file: {}",
                    e
                )));
            }
        };

        if let Err(e) = file.write_all(content.as_bytes()) {
            // half-written marker would wedge the key forever
            let _ = fs::remove_file(&path);
            return Err(BackendError::Io(format!(
                "Failed to write lock file: {}",
                e
            )));
        }

        Ok(info.id.clone())
    }

    async fn release(&self, key: &str, lock_id: &str) -> BackendResult<()> {
        let path = self.lock_path(key);
        if !path.exists() {
            return Err(BackendError::LockNotFound(key.to_string()));
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| BackendError::Io(format!("Failed to read lock file: {}", e)))?;
        let holder: LockInfo = serde_json::from_str(&content)
            .map_err(|e| BackendError::InvalidState(format!("Failed to parse lock file: {}", e)))?;

        if holder.id != lock_id {
            return Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: holder.id,
            });
        }

        fs::remove_file(&path)
            .map_err(|e| BackendError::Io(format!("Failed to remove lock file: {}", e)))?;
        Ok(())
    }
}
