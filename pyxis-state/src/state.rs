//! State document structures persisted by the backend

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The state document persisted at a workspace's derived key.
///
/// The backend itself only cares whether a document is present, absent, or
/// [empty](StateFile::is_empty); everything else in here belongs to the
/// evaluation engine that reads and mutates it under a lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State document format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental
    /// overwrites with an unrelated history)
    pub lineage: String,
    /// Version of Pyxis that last modified this state
    pub pyxis_version: String,
    /// All managed resources and their recorded state
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    /// Current state document format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Create a new empty state document with a fresh lineage.
    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            pyxis_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    /// Create a new empty state document carrying a specific lineage
    /// (for adopting an existing history instead of starting one).
    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            pyxis_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    /// Whether this document records nothing yet: serial zero and no
    /// resources. An empty document is treated like an absent one when a
    /// workspace is initialized.
    pub fn is_empty(&self) -> bool {
        self.serial == 0 && self.resources.is_empty()
    }

    /// Increment serial and update the tool version for a new state write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.pyxis_version = env!("CARGO_PKG_VERSION").to_string();
    }

    /// Find a resource by type and name
    pub fn find_resource(&self, resource_type: &str, name: &str) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    /// Add or update a resource in the state
    pub fn upsert_resource(&mut self, resource: ResourceState) {
        if let Some(existing) = self
            .resources
            .iter_mut()
            .find(|r| r.resource_type == resource.resource_type && r.name == resource.name)
        {
            *existing = resource;
        } else {
            self.resources.push(resource);
        }
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Recorded state of a single managed resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "s3.bucket", "vpc.vpc")
    pub resource_type: String,
    /// Resource name
    pub name: String,
    /// Provider name (e.g., "aws")
    pub provider: String,
    /// All attributes of the resource as JSON values
    pub attributes: HashMap<String, serde_json::Value>,
}

impl ResourceState {
    /// Create a new resource state
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            provider: provider.into(),
            attributes: HashMap::new(),
        }
    }

    /// Set an attribute value
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}
