//! Lock metadata for state backend locking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata describing a requested or held state lock.
///
/// The `id` is the token a holder must present to release the lock. The rest
/// exists so an operator looking at a conflict can tell who holds the lock
/// and for what, before deciding to force-unlock it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique identifier for this lock
    pub id: String,
    /// The operation being performed (e.g., "init", "apply", "destroy")
    pub operation: String,
    /// Who acquired the lock (username@hostname)
    pub who: String,
    /// Version of the tool that acquired the lock
    pub version: String,
    /// When the lock was created
    pub created: DateTime<Utc>,
    /// State key the lock protects; stamped at acquisition time
    #[serde(default)]
    pub path: String,
}

impl LockInfo {
    /// Create lock metadata for an operation, with a fresh random id.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            who: get_lock_owner(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: Utc::now(),
            path: String::new(),
        }
    }
}

/// Get the lock owner string (username@hostname)
fn get_lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_info_new() {
        let lock = LockInfo::new("apply");
        assert_eq!(lock.operation, "apply");
        assert!(!lock.id.is_empty());
        assert!(!lock.who.is_empty());
        assert!(lock.path.is_empty());
    }

    #[test]
    fn test_lock_ids_are_unique() {
        let a = LockInfo::new("init");
        let b = LockInfo::new("init");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_lock_owner_format() {
        let who = get_lock_owner();
        assert!(who.contains('@'));
    }

    #[test]
    fn test_lock_info_serialization() {
        let lock = LockInfo::new("apply");
        let json = serde_json::to_string_pretty(&lock).unwrap();
        let deserialized: LockInfo = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.id, lock.id);
        assert_eq!(deserialized.operation, lock.operation);
        assert_eq!(deserialized.who, lock.who);
        assert_eq!(deserialized.version, lock.version);
    }

    #[test]
    fn test_lock_info_parses_without_path() {
        // lock records written before the path field existed
        let json = r#"{
            "id": "0a1b",
            "operation": "apply",
            "who": "x@y",
            "version": "0.1.0",
            "created": "2026-01-05T12:00:00Z"
        }"#;
        let lock: LockInfo = serde_json::from_str(json).unwrap();
        assert_eq!(lock.path, "");
    }
}
