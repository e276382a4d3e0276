//! Backend implementations for state storage

pub mod local;
pub mod memory;
pub mod s3;

use std::sync::Arc;

pub use local::{LocalLockClient, LocalObjectStore};
pub use memory::{MemoryLockClient, MemoryObjectStore};
pub use s3::{DynamoLockClient, S3ObjectStore, S3Settings};

use crate::backend::{Backend, BackendConfig, BackendError, BackendResult};

/// Default object key for the default workspace's state
pub const DEFAULT_STATE_KEY: &str = "pyxis.state.json";

/// Default root directory of the local backend
pub const DEFAULT_LOCAL_ROOT: &str = ".pyxis/state";

/// Create a backend from configuration
///
/// This function dispatches to the appropriate store and lock client
/// implementations based on the backend_type in the configuration.
pub async fn create_backend(config: &BackendConfig) -> BackendResult<Backend> {
    match config.backend_type.as_str() {
        "s3" => create_s3_backend(config).await,
        "local" => {
            let root = config.get_string("root").unwrap_or(DEFAULT_LOCAL_ROOT);
            let key = config.get_string("key").unwrap_or(DEFAULT_STATE_KEY);
            Backend::new(
                Arc::new(LocalObjectStore::new(root)),
                Arc::new(LocalLockClient::new(root)),
                key,
            )
        }
        "memory" => {
            let key = config.get_string("key").unwrap_or(DEFAULT_STATE_KEY);
            Backend::new(
                Arc::new(MemoryObjectStore::new()),
                Arc::new(MemoryLockClient::new()),
                key,
            )
        }
        other => Err(BackendError::unsupported_backend(other)),
    }
}

async fn create_s3_backend(config: &BackendConfig) -> BackendResult<Backend> {
    let bucket = config
        .get_string("bucket")
        .ok_or_else(|| BackendError::configuration("Missing required attribute: bucket"))?
        .to_string();

    let key = config
        .get_string("key")
        .ok_or_else(|| BackendError::configuration("Missing required attribute: key"))?
        .to_string();

    let region = config
        .get_string("region")
        .ok_or_else(|| BackendError::configuration("Missing required attribute: region"))?
        .to_string();

    let lock_table = config
        .get_string("lock_table")
        .ok_or_else(|| BackendError::configuration("Missing required attribute: lock_table"))?
        .to_string();

    let mut settings = S3Settings::new(bucket.clone());
    settings.encrypt = config.get_bool_or("encrypt", true);
    settings.kms_key_id = config.get_string("kms_key_id").map(str::to_string);
    settings.acl = config.get_string("acl").map(str::to_string);

    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_sdk_s3::config::Region::new(region))
        .load()
        .await;

    Backend::new(
        Arc::new(S3ObjectStore::new(&sdk_config, settings)),
        Arc::new(DynamoLockClient::new(&sdk_config, lock_table, bucket)),
        key,
    )
}
