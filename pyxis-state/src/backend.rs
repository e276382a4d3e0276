//! Workspace orchestration and error types
//!
//! The [`Backend`] is what the evaluation engine talks to: it lists, deletes,
//! and initializes workspaces over one shared object store and one lock
//! table, and hands out a [`StateManager`] per workspace for everything else.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::key::{DEFAULT_WORKSPACE, WORKSPACE_KEY_PREFIX, derive_key, parse_workspace};
use crate::lock::LockInfo;
use crate::manager::StateManager;
use crate::state::StateFile;
use crate::store::{LockClient, ObjectStore};

/// Errors that can occur when interacting with a state backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The state is locked by another process
    #[error("State is locked by {who} (lock ID: {lock_id}, operation: {operation})")]
    Locked {
        lock_id: String,
        who: String,
        operation: String,
    },

    /// The lock was not found (for release/force-unlock operations)
    #[error("Lock not found: {0}")]
    LockNotFound(String),

    /// Lock ID mismatch when trying to release
    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },

    /// The backend type is not supported
    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    /// Configuration error, including empty workspace names
    #[error("Backend configuration error: {0}")]
    Configuration(String),

    /// Attempt to delete a workspace that must always exist
    #[error("Workspace {0:?} is protected and cannot be deleted")]
    ProtectedWorkspace(String),

    /// State document is corrupted or invalid
    #[error("Invalid state document: {0}")]
    InvalidState(String),

    /// Network or filesystem error
    #[error("I/O error: {0}")]
    Io(String),

    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Releasing the lock failed after a workspace was initialized. The
    /// state content itself is fine, but the lock is stuck until broken.
    #[error(
        "Failed to release lock {lock_id}: {source}; \
         the workspace may need to be force-unlocked before it can be used again"
    )]
    UnlockFailed {
        lock_id: String,
        #[source]
        source: Box<BackendError>,
    },

    /// A step of the initialization transaction failed and releasing the
    /// lock afterwards failed too. Both causes are preserved so neither is
    /// lost; the lock id names what an operator has to break manually.
    #[error(
        "{source}; additionally, releasing lock {lock_id} failed: {unlock}; \
         the lock must be force-unlocked manually"
    )]
    InitFailed {
        lock_id: String,
        #[source]
        source: Box<BackendError>,
        unlock: Box<BackendError>,
    },
}

impl BackendError {
    /// Create a Locked error from the holder's LockInfo
    pub fn locked(lock: &LockInfo) -> Self {
        Self::Locked {
            lock_id: lock.id.clone(),
            who: lock.who.clone(),
            operation: lock.operation.clone(),
        }
    }

    /// Create an unsupported backend error
    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Configuration for a state backend
///
/// Read from the caller's backend block (the CLI keeps it in a JSON file).
/// Which attributes are required depends on the backend type; see
/// [`create_backend`](crate::backends::create_backend).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend type (e.g., "s3", "local", "memory")
    pub backend_type: String,
    /// Backend-specific attributes
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl BackendConfig {
    /// Get a string attribute value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(serde_json::Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get a boolean attribute value
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.attributes.get(key) {
            Some(serde_json::Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Get a boolean attribute with a default value
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }
}

/// Multi-workspace state backend over an object store and a lock table.
///
/// One `Backend` serves every workspace sharing a base key. The capability
/// handles and the base key are fixed for its lifetime and shared read-only
/// by every [`StateManager`] it constructs.
pub struct Backend {
    store: Arc<dyn ObjectStore>,
    locks: Arc<dyn LockClient>,
    base_key: String,
}

impl Backend {
    /// Create a backend over already-constructed capabilities.
    ///
    /// `base_key` is the object key of the default workspace's state; named
    /// workspaces derive their keys from it.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        locks: Arc<dyn LockClient>,
        base_key: impl Into<String>,
    ) -> BackendResult<Self> {
        let base_key = base_key.into();
        if base_key.is_empty() {
            return Err(BackendError::configuration("state key must not be empty"));
        }
        Ok(Self {
            store,
            locks,
            base_key,
        })
    }

    /// Object key of the default workspace's state
    pub fn base_key(&self) -> &str {
        &self.base_key
    }

    /// List all workspaces visible in the store.
    ///
    /// The default workspace is always first and always present, whether or
    /// not an object backs it yet; the rest are sorted lexicographically.
    /// Keys under the workspace prefix whose final segment is a different
    /// base key belong to another backend sharing the bucket and are skipped
    /// silently.
    pub async fn list_workspaces(&self) -> BackendResult<Vec<String>> {
        let keys = self
            .store
            .list(&format!("{}/", WORKSPACE_KEY_PREFIX))
            .await?;

        let mut named: Vec<String> = keys
            .iter()
            .filter_map(|key| parse_workspace(key, &self.base_key))
            .map(str::to_string)
            .collect();
        named.sort();

        let mut workspaces = vec![DEFAULT_WORKSPACE.to_string()];
        workspaces.extend(named);
        Ok(workspaces)
    }

    /// Delete a workspace's state object.
    ///
    /// The default workspace can never be deleted; an empty name is a caller
    /// bug. Both are rejected before any store call. Deleting a workspace
    /// that has no backing object is not an error.
    pub async fn delete_workspace(&self, name: &str) -> BackendResult<()> {
        if name.is_empty() {
            return Err(BackendError::configuration(
                "workspace name must not be empty",
            ));
        }
        if name == DEFAULT_WORKSPACE {
            return Err(BackendError::ProtectedWorkspace(name.to_string()));
        }

        self.store.delete(&derive_key(name, &self.base_key)).await?;
        info!(workspace = %name, "deleted workspace state");
        Ok(())
    }

    /// Hand out the state manager for a workspace, materializing an empty
    /// state object first for named workspaces that do not have one yet.
    ///
    /// The default workspace is returned as-is: it exists implicitly, and
    /// absence of its object is a valid state the caller materializes on
    /// first write. Any other workspace is bootstrapped under a lock so it
    /// shows up in [`list_workspaces`](Self::list_workspaces) from here on,
    /// even if the caller never writes real content.
    ///
    /// A lock conflict during the bootstrap means another process is
    /// initializing the same workspace right now; it is returned verbatim
    /// for the caller to retry or surface.
    pub async fn get_or_init_state(&self, name: &str) -> BackendResult<StateManager> {
        if name.is_empty() {
            return Err(BackendError::configuration(
                "workspace name must not be empty",
            ));
        }

        let manager = StateManager::new(
            self.store.clone(),
            self.locks.clone(),
            name,
            derive_key(name, &self.base_key),
        );

        if name == DEFAULT_WORKSPACE {
            return Ok(manager);
        }

        // Observe-and-maybe-create runs under the lock, and the lock is
        // released on every path out of the transaction, exactly once.
        let lock_id = manager.lock(&LockInfo::new("init")).await?;

        let outcome = self.bootstrap(&manager).await;
        let unlocked = manager.unlock(&lock_id).await;

        match (outcome, unlocked) {
            (Ok(created), Ok(())) => {
                if created {
                    info!(
                        workspace = %name,
                        key = %manager.key(),
                        "initialized workspace with empty state"
                    );
                }
                Ok(manager)
            }
            (Ok(_), Err(unlock_err)) => {
                warn!(
                    workspace = %name,
                    lock_id = %lock_id,
                    "workspace state initialized, but its lock could not be released"
                );
                Err(BackendError::UnlockFailed {
                    lock_id,
                    source: Box::new(unlock_err),
                })
            }
            (Err(primary), Ok(())) => Err(primary),
            (Err(primary), Err(unlock_err)) => Err(BackendError::InitFailed {
                lock_id,
                source: Box::new(primary),
                unlock: Box::new(unlock_err),
            }),
        }
    }

    /// Write a fresh empty document unless a meaningful one already exists.
    /// Returns whether a document was written. Absent and explicitly-empty
    /// documents are treated alike; an empty object is re-bootstrapped.
    async fn bootstrap(&self, manager: &StateManager) -> BackendResult<bool> {
        match manager.refresh().await? {
            Some(existing) if !existing.is_empty() => Ok(false),
            _ => {
                manager.persist(&StateFile::new()).await?;
                Ok(true)
            }
        }
    }

    /// Break a workspace's lock by id, without the manager that acquired it.
    ///
    /// This is the operator recovery path the unlock-failure errors point
    /// at. The usual mismatch rules still apply: the id must name the lock
    /// actually held.
    pub async fn force_unlock(&self, name: &str, lock_id: &str) -> BackendResult<()> {
        if name.is_empty() {
            return Err(BackendError::configuration(
                "workspace name must not be empty",
            ));
        }

        let key = derive_key(name, &self.base_key);
        self.locks.release(&key, lock_id).await?;
        info!(workspace = %name, lock_id = %lock_id, "force-unlocked workspace state");
        Ok(())
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("base_key", &self.base_key)
            .finish_non_exhaustive()
    }
}
