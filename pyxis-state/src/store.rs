//! Capability traits for the backing object store and lock table
//!
//! The backend never talks to S3 or DynamoDB directly; it is handed these
//! two capabilities at construction and every component downstream shares
//! them read-only. Implementations live in [`crate::backends`].

use async_trait::async_trait;

use crate::backend::BackendResult;
use crate::lock::LockInfo;

/// Blob storage the backend keeps state documents in.
///
/// One object per workspace. Assumed read-after-write consistent for a
/// single key; nothing here requires multi-key transactions.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List all object keys starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>>;

    /// Read an object. An absent key is `Ok(None)`, not an error.
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Write an object, overwriting any existing content.
    async fn put(&self, key: &str, data: Vec<u8>) -> BackendResult<()>;

    /// Delete an object. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> BackendResult<()>;
}

/// Conditional-create lock table used only for mutual exclusion.
///
/// This is the one capability that needs strong consistency: two callers
/// racing `try_acquire` for the same key must never both succeed.
#[async_trait]
pub trait LockClient: Send + Sync {
    /// Atomically create the lock for `key`, recording `info`.
    ///
    /// Returns the lock id on success. When another holder is active, fails
    /// with [`Locked`](crate::backend::BackendError::Locked) describing the
    /// holder; the conflict is never retried here, contention policy belongs
    /// to the caller.
    async fn try_acquire(&self, key: &str, info: &LockInfo) -> BackendResult<String>;

    /// Release the lock for `key`.
    ///
    /// Fails with [`LockMismatch`](crate::backend::BackendError::LockMismatch)
    /// if `lock_id` is not the currently held id, and with
    /// [`LockNotFound`](crate::backend::BackendError::LockNotFound) if no
    /// lock is held at all.
    async fn release(&self, key: &str, lock_id: &str) -> BackendResult<()>;
}
