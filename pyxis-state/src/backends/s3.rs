//! S3 object store and DynamoDB lock client
//!
//! The production pairing: state objects live in an S3 bucket, locks live in
//! a DynamoDB table. Lock items are keyed `bucket/object-key` so one table
//! can serve many buckets, and acquisition rides on a conditional write so
//! two writers can never both hold the same lock.

use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{ObjectCannedAcl, ServerSideEncryption};

use crate::backend::{BackendError, BackendResult};
use crate::lock::LockInfo;
use crate::store::{LockClient, ObjectStore};

/// Connection settings for the S3 object store
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Bucket holding the state objects
    pub bucket: String,
    /// Whether to request server-side encryption on writes (default: true)
    pub encrypt: bool,
    /// KMS key to encrypt with; takes precedence over plain AES256
    pub kms_key_id: Option<String>,
    /// Canned ACL to apply to written objects
    pub acl: Option<String>,
}

impl S3Settings {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            encrypt: true,
            kms_key_id: None,
            acl: None,
        }
    }
}

/// Object store backed by an S3 bucket
pub struct S3ObjectStore {
    client: S3Client,
    settings: S3Settings,
}

impl S3ObjectStore {
    pub fn new(sdk_config: &aws_config::SdkConfig, settings: S3Settings) -> Self {
        Self {
            client: S3Client::new(sdk_config),
            settings,
        }
    }

    /// Bucket the store writes to
    pub fn bucket(&self) -> &str {
        &self.settings.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.settings.bucket)
                .prefix(prefix);
            if let Some(token) = continuation {
                request = request.continuation_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|e| BackendError::Aws(e.to_string()))?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.settings.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let body = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| BackendError::Io(e.to_string()))?;
                Ok(Some(body.into_bytes().to_vec()))
            }
            Err(err) => {
                if is_not_found_error(&err) {
                    Ok(None)
                } else {
                    Err(BackendError::Aws(err.to_string()))
                }
            }
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> BackendResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.settings.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type("application/json");

        if let Some(kms_key_id) = &self.settings.kms_key_id {
            request = request
                .server_side_encryption(ServerSideEncryption::AwsKms)
                .ssekms_key_id(kms_key_id);
        } else if self.settings.encrypt {
            request = request.server_side_encryption(ServerSideEncryption::Aes256);
        }

        if let Some(acl) = &self.settings.acl {
            request = request.acl(ObjectCannedAcl::from(acl.as_str()));
        }

        request
            .send()
            .await
            .map_err(|e| BackendError::Aws(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        // S3 treats deleting an absent key as a success, which matches the
        // trait contract
        self.client
            .delete_object()
            .bucket(&self.settings.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BackendError::Aws(e.to_string()))?;

        Ok(())
    }
}

/// Lock client backed by a DynamoDB table.
///
/// Each lock is an item whose partition key `LockID` is `bucket/object-key`
/// and whose `Info` attribute carries the holder's [`LockInfo`] as JSON.
pub struct DynamoLockClient {
    client: DynamoClient,
    table: String,
    bucket: String,
}

impl DynamoLockClient {
    pub fn new(
        sdk_config: &aws_config::SdkConfig,
        table: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            client: DynamoClient::new(sdk_config),
            table: table.into(),
            bucket: bucket.into(),
        }
    }

    /// Table the locks live in
    pub fn table(&self) -> &str {
        &self.table
    }

    fn item_id(&self, key: &str) -> String {
        format!("{}/{}", self.bucket, key)
    }

    /// Read the current holder of a lock item with a consistent read
    async fn read_holder(&self, item_id: &str) -> BackendResult<Option<LockInfo>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("LockID", AttributeValue::S(item_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| BackendError::Aws(e.to_string()))?;

        let Some(item) = output.item() else {
            return Ok(None);
        };

        // an item without readable info is still a held lock
        let holder = item
            .get("Info")
            .and_then(|value| value.as_s().ok())
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_else(|| LockInfo {
                id: "unknown".to_string(),
                operation: "unknown".to_string(),
                who: "unknown".to_string(),
                version: String::new(),
                created: chrono::Utc::now(),
                path: item_id.to_string(),
            });

        Ok(Some(holder))
    }
}

#[async_trait]
impl LockClient for DynamoLockClient {
    async fn try_acquire(&self, key: &str, info: &LockInfo) -> BackendResult<String> {
        let item_id = self.item_id(key);
        let info_json = serde_json::to_string(info)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;

        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .item("LockID", AttributeValue::S(item_id.clone()))
            .item("Info", AttributeValue::S(info_json))
            .condition_expression("attribute_not_exists(LockID)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(info.id.clone()),
            Err(err) => {
                let conditional_failure = err
                    .as_service_error()
                    .map(|e| e.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if !conditional_failure {
                    return Err(BackendError::Aws(err.to_string()));
                }

                match self.read_holder(&item_id).await? {
                    Some(holder) => Err(BackendError::locked(&holder)),
                    // released between our write and the readback; the
                    // caller retries and wins next time
                    None => Err(BackendError::Locked {
                        lock_id: "unknown".to_string(),
                        who: "unknown".to_string(),
                        operation: "unknown".to_string(),
                    }),
                }
            }
        }
    }

    async fn release(&self, key: &str, lock_id: &str) -> BackendResult<()> {
        let item_id = self.item_id(key);

        match self.read_holder(&item_id).await? {
            None => Err(BackendError::LockNotFound(key.to_string())),
            Some(holder) if holder.id != lock_id => Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: holder.id,
            }),
            Some(_) => {
                self.client
                    .delete_item()
                    .table_name(&self.table)
                    .key("LockID", AttributeValue::S(item_id))
                    .send()
                    .await
                    .map_err(|e| BackendError::Aws(e.to_string()))?;
                Ok(())
            }
        }
    }
}

/// Check if an S3 error is a "not found" error
fn is_not_found_error<E: std::fmt::Debug>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    if let Some(raw) = err.raw_response() {
        return raw.status().as_u16() == 404;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = S3Settings::new("state-bucket");
        assert_eq!(settings.bucket, "state-bucket");
        assert!(settings.encrypt);
        assert!(settings.kms_key_id.is_none());
        assert!(settings.acl.is_none());
    }

    #[test]
    fn test_lock_item_id_is_bucket_scoped() {
        // two buckets sharing a lock table must not collide on the same key
        let key = "env:/dev/pyxis.state.json";
        assert_eq!(
            format!("{}/{}", "state-bucket", key),
            "state-bucket/env:/dev/pyxis.state.json"
        );
    }
}
