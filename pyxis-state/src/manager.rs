//! Per-workspace state manager

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::backend::{BackendError, BackendResult};
use crate::lock::LockInfo;
use crate::state::StateFile;
use crate::store::{LockClient, ObjectStore};

/// Reads, writes, locks, and unlocks the state object for one workspace.
///
/// A `StateManager` binds a workspace's derived key to the object store and
/// lock client; it performs all I/O for that single object and caches
/// nothing between calls. Plain reads take no lock; a caller doing a
/// read-modify-write of real content (an apply, say) is expected to hold the
/// lock across the whole span itself.
pub struct StateManager {
    store: Arc<dyn ObjectStore>,
    locks: Arc<dyn LockClient>,
    workspace: String,
    key: String,
}

impl StateManager {
    pub(crate) fn new(
        store: Arc<dyn ObjectStore>,
        locks: Arc<dyn LockClient>,
        workspace: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            locks,
            workspace: workspace.into(),
            key: key.into(),
        }
    }

    /// Workspace this manager is bound to
    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// Derived object key this manager reads and writes
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the current state document from the store.
    ///
    /// An absent or zero-length object is a valid `None` ("no state yet"),
    /// not an error; bytes that fail to decode are.
    pub async fn refresh(&self) -> BackendResult<Option<StateFile>> {
        let bytes = match self.store.get(&self.key).await? {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Ok(None),
        };

        let state: StateFile = serde_json::from_slice(&bytes)
            .map_err(|e| BackendError::InvalidState(e.to_string()))?;
        Ok(Some(state))
    }

    /// Serialize and write the state document.
    ///
    /// The serial should have been incremented by the caller before this is
    /// called, and the lock held if anyone else could be writing.
    pub async fn persist(&self, state: &StateFile) -> BackendResult<()> {
        let body = serde_json::to_vec_pretty(state)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;
        self.store.put(&self.key, body).await
    }

    /// Acquire the lock for this state object.
    ///
    /// Stamps `info` with the derived key (and a fresh id if the caller left
    /// it empty) before handing it to the lock client. A conflict is
    /// surfaced verbatim; retry policy belongs to the caller, since how long
    /// the other holder needs is workload-dependent.
    pub async fn lock(&self, info: &LockInfo) -> BackendResult<String> {
        let mut info = info.clone();
        if info.id.is_empty() {
            info.id = uuid::Uuid::new_v4().to_string();
        }
        info.path = self.key.clone();

        let lock_id = self.locks.try_acquire(&self.key, &info).await?;
        debug!(
            workspace = %self.workspace,
            lock_id = %lock_id,
            operation = %info.operation,
            "acquired state lock"
        );
        Ok(lock_id)
    }

    /// Release a previously acquired lock.
    ///
    /// Fails if `lock_id` does not match the currently held lock; a stale id
    /// here usually means the lock was force-broken externally.
    pub async fn unlock(&self, lock_id: &str) -> BackendResult<()> {
        self.locks.release(&self.key, lock_id).await?;
        debug!(workspace = %self.workspace, lock_id = %lock_id, "released state lock");
        Ok(())
    }
}

impl fmt::Debug for StateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateManager")
            .field("workspace", &self.workspace)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::{MemoryLockClient, MemoryObjectStore};
    use crate::state::ResourceState;

    fn manager(store: Arc<MemoryObjectStore>, locks: Arc<MemoryLockClient>) -> StateManager {
        StateManager::new(store, locks, "dev", "env:/dev/pyxis.state.json")
    }

    #[test]
    fn test_debug_names_workspace_and_key() {
        let mgr = manager(
            Arc::new(MemoryObjectStore::new()),
            Arc::new(MemoryLockClient::new()),
        );
        let rendered = format!("{mgr:?}");
        assert!(rendered.contains("dev"));
        assert!(rendered.contains("env:/dev/pyxis.state.json"));
    }

    #[tokio::test]
    async fn test_refresh_absent_is_none() {
        let mgr = manager(
            Arc::new(MemoryObjectStore::new()),
            Arc::new(MemoryLockClient::new()),
        );
        assert!(mgr.refresh().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_zero_length_object_is_none() {
        let store = Arc::new(MemoryObjectStore::new());
        store
            .put("env:/dev/pyxis.state.json", Vec::new())
            .await
            .unwrap();

        let mgr = manager(store, Arc::new(MemoryLockClient::new()));
        assert!(mgr.refresh().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persist_then_refresh_round_trip() {
        let mgr = manager(
            Arc::new(MemoryObjectStore::new()),
            Arc::new(MemoryLockClient::new()),
        );

        let mut state = StateFile::new();
        state.upsert_resource(ResourceState::new("s3.bucket", "assets", "aws"));
        state.increment_serial();
        mgr.persist(&state).await.unwrap();

        let read = mgr.refresh().await.unwrap().unwrap();
        assert_eq!(read.serial, 1);
        assert_eq!(read.lineage, state.lineage);
        assert!(read.find_resource("s3.bucket", "assets").is_some());
    }

    #[tokio::test]
    async fn test_refresh_rejects_undecodable_bytes() {
        let store = Arc::new(MemoryObjectStore::new());
        store
            .put("env:/dev/pyxis.state.json", b"not json".to_vec())
            .await
            .unwrap();

        let mgr = manager(store, Arc::new(MemoryLockClient::new()));
        let err = mgr.refresh().await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_lock_stamps_path_and_conflicts_verbatim() {
        let locks = Arc::new(MemoryLockClient::new());
        let mgr = manager(Arc::new(MemoryObjectStore::new()), locks.clone());

        let info = LockInfo::new("apply");
        let lock_id = mgr.lock(&info).await.unwrap();
        assert_eq!(lock_id, info.id);

        let held = locks.holder("env:/dev/pyxis.state.json").unwrap();
        assert_eq!(held.path, "env:/dev/pyxis.state.json");

        let err = mgr.lock(&LockInfo::new("plan")).await.unwrap_err();
        match err {
            BackendError::Locked {
                lock_id: held_id,
                operation,
                ..
            } => {
                assert_eq!(held_id, lock_id);
                assert_eq!(operation, "apply");
            }
            other => panic!("expected Locked, got {other:?}"),
        }

        mgr.unlock(&lock_id).await.unwrap();
        assert!(locks.holder("env:/dev/pyxis.state.json").is_none());
    }

    #[tokio::test]
    async fn test_lock_generates_id_when_caller_left_it_empty() {
        let mgr = manager(
            Arc::new(MemoryObjectStore::new()),
            Arc::new(MemoryLockClient::new()),
        );

        let mut info = LockInfo::new("apply");
        info.id.clear();
        let lock_id = mgr.lock(&info).await.unwrap();
        assert!(!lock_id.is_empty());
    }

    #[tokio::test]
    async fn test_unlock_with_stale_id_is_mismatch() {
        let mgr = manager(
            Arc::new(MemoryObjectStore::new()),
            Arc::new(MemoryLockClient::new()),
        );

        let lock_id = mgr.lock(&LockInfo::new("apply")).await.unwrap();
        let err = mgr.unlock("some-other-id").await.unwrap_err();
        assert!(matches!(err, BackendError::LockMismatch { .. }));

        // the real holder can still release
        mgr.unlock(&lock_id).await.unwrap();
    }
}
