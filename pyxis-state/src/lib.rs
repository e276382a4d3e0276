//! Pyxis State Management
//!
//! This crate provides remote state storage for the Pyxis infrastructure
//! tool. State lives in an object store (S3 in production, a local directory
//! or memory for development), guarded by a distributed lock so concurrent
//! runs cannot corrupt it, and partitioned into named workspaces so one
//! configuration can track several deployments side by side.
//!
//! # Overview
//!
//! The state management system consists of:
//!
//! - **Backend**: lists, deletes, and initializes workspaces over a shared
//!   object store and lock table
//! - **StateManager**: reads, writes, locks, and unlocks one workspace's
//!   state document
//! - **ObjectStore** / **LockClient**: the storage capabilities a backend is
//!   assembled from (S3 + DynamoDB, local filesystem, in-memory)
//! - **StateFile**: the versioned state document itself
//! - **LockInfo**: metadata describing who holds a lock and why
//!
//! # Example
//!
//! ```ignore
//! use pyxis_state::{BackendConfig, create_backend};
//!
//! let config: BackendConfig = serde_json::from_str(r#"{
//!     "backend_type": "s3",
//!     "attributes": {
//!         "bucket": "my-state-bucket",
//!         "key": "infra/prod/pyxis.state.json",
//!         "region": "ap-northeast-1",
//!         "lock_table": "pyxis-state-locks"
//!     }
//! }"#)?;
//!
//! let backend = create_backend(&config).await?;
//!
//! // Workspaces partition the state; "default" always exists
//! let workspaces = backend.list_workspaces().await?;
//!
//! // Get a manager for one workspace, creating its state if needed
//! let manager = backend.get_or_init_state("staging").await?;
//!
//! // Lock, read-modify-write, unlock
//! let lock_id = manager.lock(&LockInfo::new("apply")).await?;
//! let mut state = manager.refresh().await?.unwrap_or_default();
//! state.increment_serial();
//! manager.persist(&state).await?;
//! manager.unlock(&lock_id).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod key;
pub mod lock;
pub mod manager;
pub mod state;
pub mod store;

// Re-export main types for convenience
pub use backend::{Backend, BackendConfig, BackendError, BackendResult};
pub use backends::create_backend;
pub use key::{DEFAULT_WORKSPACE, derive_key, parse_workspace};
pub use lock::LockInfo;
pub use manager::StateManager;
pub use state::{ResourceState, StateFile};
pub use store::{LockClient, ObjectStore};
