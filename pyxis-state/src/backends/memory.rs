//! In-memory backend
//!
//! Keeps objects and locks in process-local maps. Ephemeral by nature, so it
//! is mostly useful for tests and for trying out workspace workflows without
//! any infrastructure. The lock client still enforces the same atomic
//! acquire semantics as the real ones.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::backend::{BackendError, BackendResult};
use crate::lock::LockInfo;
use crate::store::{LockClient, ObjectStore};

/// Object store over a process-local map
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // a panicked holder cannot corrupt a plain map, so poisoning is
        // recovered rather than propagated
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All stored keys, in lexicographic order
    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        // BTreeMap iterates in key order, which matches the trait's
        // lexicographic listing contract
        Ok(self
            .objects()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.objects().get(key).cloned())
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> BackendResult<()> {
        self.objects().insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.objects().remove(key);
        Ok(())
    }
}

/// Lock client over a process-local map
pub struct MemoryLockClient {
    locks: Mutex<HashMap<String, LockInfo>>,
}

impl MemoryLockClient {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<String, LockInfo>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current holder of a key's lock, if any
    pub fn holder(&self, key: &str) -> Option<LockInfo> {
        self.locks().get(key).cloned()
    }
}

impl Default for MemoryLockClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockClient for MemoryLockClient {
    async fn try_acquire(&self, key: &str, info: &LockInfo) -> BackendResult<String> {
        // check and insert under one guard, so concurrent acquirers cannot
        // both succeed
        let mut locks = self.locks();
        if let Some(holder) = locks.get(key) {
            return Err(BackendError::locked(holder));
        }
        locks.insert(key.to_string(), info.clone());
        Ok(info.id.clone())
    }

    async fn release(&self, key: &str, lock_id: &str) -> BackendResult<()> {
        let mut locks = self.locks();
        match locks.get(key) {
            None => Err(BackendError::LockNotFound(key.to_string())),
            Some(holder) if holder.id != lock_id => Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: holder.id.clone(),
            }),
            Some(_) => {
                locks.remove(key);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_absent_returns_none() {
        let store = MemoryObjectStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_get_delete_cycle() {
        let store = MemoryObjectStore::new();
        store.put("a", b"one".to_vec()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"one".to_vec()));

        store.put("a", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"two".to_vec()));

        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        // deleting again is fine
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_is_prefix_filtered_and_sorted() {
        let store = MemoryObjectStore::new();
        for key in ["env:/b/state", "other/key", "env:/a/state", "env:/c/state"] {
            store.put(key, Vec::new()).await.unwrap();
        }

        assert_eq!(
            store.list("env:/").await.unwrap(),
            vec!["env:/a/state", "env:/b/state", "env:/c/state"]
        );
        assert!(store.list("nope/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acquire_conflict_reports_holder() {
        let locks = MemoryLockClient::new();
        let first = LockInfo::new("apply");
        locks.try_acquire("key", &first).await.unwrap();

        let second = LockInfo::new("plan");
        let err = locks.try_acquire("key", &second).await.unwrap_err();
        match err {
            BackendError::Locked {
                lock_id, operation, ..
            } => {
                assert_eq!(lock_id, first.id);
                assert_eq!(operation, "apply");
            }
            other => panic!("expected Locked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_release_requires_matching_id() {
        let locks = MemoryLockClient::new();
        let info = LockInfo::new("apply");
        locks.try_acquire("key", &info).await.unwrap();

        let err = locks.release("key", "bogus").await.unwrap_err();
        match err {
            BackendError::LockMismatch { expected, actual } => {
                assert_eq!(expected, "bogus");
                assert_eq!(actual, info.id);
            }
            other => panic!("expected LockMismatch, got {other:?}"),
        }

        // still held until the right id shows up
        assert!(locks.holder("key").is_some());
        locks.release("key", &info.id).await.unwrap();
        assert!(locks.holder("key").is_none());
    }

    #[tokio::test]
    async fn test_release_without_lock_is_not_found() {
        let locks = MemoryLockClient::new();
        let err = locks.release("key", "any").await.unwrap_err();
        assert!(matches!(err, BackendError::LockNotFound(_)));
    }

    #[tokio::test]
    async fn test_keys_lock_independently() {
        let locks = MemoryLockClient::new();
        locks.try_acquire("a", &LockInfo::new("apply")).await.unwrap();
        // a lock on one key does not block another
        locks.try_acquire("b", &LockInfo::new("apply")).await.unwrap();
        assert!(locks.holder("a").is_some());
        assert!(locks.holder("b").is_some());
    }
}
