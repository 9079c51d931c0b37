//! Narrow seams between the core and its external collaborators: content
//! parsing/serialization, cross-resource reference resolution and bulk
//! loading. The store trusts only the typed values these traits return.

use crate::error::{CoreError, Result};
use crate::outcome::OperationOutcome;
use crate::resource::ResourceEnvelope;

pub const MIME_JSON: &str = "application/fhir+json";

/// Deserializer seam. Implementations reject malformed content before it
/// ever reaches a store.
pub trait ResourceParser: Send + Sync {
    fn try_parse(&self, content: &str, mime_type: &str) -> Result<ResourceEnvelope>;
}

/// Serializer seam for response bodies.
pub trait ResourceSerializer: Send + Sync {
    fn serialize_resource(
        &self,
        resource: &ResourceEnvelope,
        mime_type: &str,
        pretty: bool,
    ) -> Result<String>;

    fn serialize_outcome(
        &self,
        outcome: &OperationOutcome,
        mime_type: &str,
        pretty: bool,
    ) -> Result<String>;
}

/// Dereferences `Type/id` reference strings into resources. Supplied by the
/// store to the expression evaluator and the chained-search engine.
pub trait ReferenceResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Option<ResourceEnvelope>;
}

/// Supplies `(content, mime_type)` pairs during the bulk-load Read phase.
pub trait BulkSource: Send {
    fn next_entry(&mut self) -> Option<(String, String)>;
}

impl BulkSource for std::vec::IntoIter<(String, String)> {
    fn next_entry(&mut self) -> Option<(String, String)> {
        self.next()
    }
}

/// JSON-backed parser/serializer used by the loader and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonParser;

impl ResourceParser for JsonParser {
    fn try_parse(&self, content: &str, mime_type: &str) -> Result<ResourceEnvelope> {
        if !mime_type.contains("json") {
            return Err(CoreError::UnsupportedContentType(mime_type.to_string()));
        }
        let value: serde_json::Value = serde_json::from_str(content)?;
        ResourceEnvelope::from_json(value)
    }
}

impl ResourceSerializer for JsonParser {
    fn serialize_resource(
        &self,
        resource: &ResourceEnvelope,
        mime_type: &str,
        pretty: bool,
    ) -> Result<String> {
        if !mime_type.contains("json") {
            return Err(CoreError::UnsupportedContentType(mime_type.to_string()));
        }
        let out = if pretty {
            serde_json::to_string_pretty(resource)?
        } else {
            serde_json::to_string(resource)?
        };
        Ok(out)
    }

    fn serialize_outcome(
        &self,
        outcome: &OperationOutcome,
        mime_type: &str,
        pretty: bool,
    ) -> Result<String> {
        if !mime_type.contains("json") {
            return Err(CoreError::UnsupportedContentType(mime_type.to_string()));
        }
        let value = outcome.to_resource_json();
        let out = if pretty {
            serde_json::to_string_pretty(&value)?
        } else {
            serde_json::to_string(&value)?
        };
        Ok(out)
    }
}
