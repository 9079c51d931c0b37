use crate::error::{CoreError, Result};
use crate::time::{FhirInstant, now_utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Server-maintained metadata attached to each stored resource.
///
/// `version_id` starts at 1 on create and increases by exactly one on every
/// update to the same id; it is the source of the weak ETag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    #[serde(rename = "versionId", default)]
    pub version_id: u64,
    #[serde(rename = "lastUpdated", default = "now_utc")]
    pub last_updated: FhirInstant,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub profile: Vec<String>,
}

impl ResourceMeta {
    pub fn new() -> Self {
        Self {
            version_id: 0,
            last_updated: now_utc(),
            profile: Vec::new(),
        }
    }

    pub fn with_profile(mut self, profile: Vec<String>) -> Self {
        self.profile = profile;
        self
    }

    pub fn touch(&mut self) {
        self.last_updated = now_utc();
    }
}

impl Default for ResourceMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// A stored resource: type name, id, metadata and an opaque element tree.
///
/// The element tree is kept as flattened JSON so the store stays agnostic of
/// any particular resource schema; path expressions and search parameters
/// address into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEnvelope {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(default)]
    pub meta: ResourceMeta,
    #[serde(flatten)]
    pub data: HashMap<String, Value>,
}

impl ResourceEnvelope {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            meta: ResourceMeta::new(),
            data: HashMap::new(),
        }
    }

    /// Parse an envelope from a JSON value, requiring a `resourceType` field.
    pub fn from_json(value: Value) -> Result<Self> {
        if value.get("resourceType").and_then(Value::as_str).is_none() {
            return Err(CoreError::invalid_resource("missing resourceType element"));
        }
        serde_json::from_value(value).map_err(Into::into)
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn get_field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn remove_field(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// `Type/id` form used for references and protected-id sets.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    /// Weak ETag derived from the current version, `W/"<version>"`.
    pub fn etag(&self) -> String {
        format!("W/\"{}\"", self.meta.version_id)
    }

    /// The full element tree including id, resourceType and meta, for path
    /// expression evaluation.
    pub fn as_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
