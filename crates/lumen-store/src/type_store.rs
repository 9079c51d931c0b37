//! The versioned resource collection for one resource type.
//!
//! Resources live in an insertion-ordered map behind a read/write lock:
//! searches take read locks over a snapshot, mutations serialize under the
//! write lock so version numbers stay strictly increasing and trigger
//! evaluation always sees the exact previous/current pair of the applied
//! mutation.

use crate::config::StoreConfig;
use crate::error::{StoreFailure, StoreResult};
use dashmap::DashMap;
use indexmap::IndexMap;
use lumen_core::time::now_utc;
use lumen_core::{ResourceEnvelope, generate_id, validate_id};
use lumen_search::SearchParameterDefinition;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// One applied mutation, with the previous/current pair captured under
/// the write lock for trigger evaluation.
#[derive(Debug, Clone)]
pub struct Mutation {
    /// Post-mutation state; `None` for deletes.
    pub stored: Option<ResourceEnvelope>,
    /// Pre-mutation state; `None` for creates.
    pub previous: Option<ResourceEnvelope>,
    /// Whether the mutation brought the resource into existence.
    pub created: bool,
}

pub struct TypeStore {
    resource_type: String,
    config: Arc<StoreConfig>,
    resources: RwLock<IndexMap<String, ResourceEnvelope>>,
    /// Executable search parameters for this type, keyed by code.
    params: DashMap<String, Arc<SearchParameterDefinition>>,
}

impl TypeStore {
    pub fn new(resource_type: impl Into<String>, config: Arc<StoreConfig>) -> Self {
        Self {
            resource_type: resource_type.into(),
            config,
            resources: RwLock::new(IndexMap::new()),
            params: DashMap::new(),
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Stores a new resource. An absent id is assigned; a pre-existing id
    /// is rejected unless `allow_existing_id` is set.
    pub fn create(
        &self,
        mut resource: ResourceEnvelope,
        allow_existing_id: bool,
    ) -> StoreResult<Mutation> {
        if resource.id.is_empty() {
            resource.id = generate_id();
        } else if validate_id(&resource.id).is_err() {
            return Err(StoreFailure::bad_request(format!(
                "invalid resource id: {}",
                resource.id
            )));
        }
        let mut resources = self.resources.write().expect("resource lock poisoned");
        if resources.contains_key(&resource.id) {
            if !allow_existing_id {
                return Err(StoreFailure::conflict(format!(
                    "{}/{} already exists",
                    self.resource_type, resource.id
                )));
            }
            // Existing id allowed: behaves as a replace.
            let previous = resources.get(&resource.id).cloned();
            resource.meta.version_id = previous.as_ref().map(|p| p.meta.version_id).unwrap_or(0) + 1;
            resource.meta.last_updated = now_utc();
            resources.insert(resource.id.clone(), resource.clone());
            return Ok(Mutation {
                stored: Some(resource),
                previous,
                created: false,
            });
        }
        resource.meta.version_id = 1;
        resource.meta.last_updated = now_utc();
        resources.insert(resource.id.clone(), resource.clone());
        debug!(resource = %resource.reference(), "created");
        Ok(Mutation {
            stored: Some(resource),
            previous: None,
            created: true,
        })
    }

    pub fn read(&self, id: &str) -> Option<ResourceEnvelope> {
        self.resources
            .read()
            .expect("resource lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resources
            .read()
            .expect("resource lock poisoned")
            .contains_key(id)
    }

    /// Replaces (or with `allow_create` inserts) the resource under its id,
    /// honoring `If-Match` / `If-None-Match: *` preconditions. The state is
    /// untouched when a precondition fails.
    pub fn update(
        &self,
        mut resource: ResourceEnvelope,
        allow_create: bool,
        if_match: Option<&str>,
        if_none_match: Option<&str>,
    ) -> StoreResult<Mutation> {
        if resource.id.is_empty() {
            return Err(StoreFailure::bad_request("update requires a resource id"));
        }
        if validate_id(&resource.id).is_err() {
            return Err(StoreFailure::bad_request(format!(
                "invalid resource id: {}",
                resource.id
            )));
        }
        let mut resources = self.resources.write().expect("resource lock poisoned");
        let previous = resources.get(&resource.id).cloned();

        match &previous {
            Some(existing) => {
                if if_none_match == Some("*") {
                    return Err(StoreFailure::precondition_failed(format!(
                        "{} already exists",
                        existing.reference()
                    )));
                }
                if let Some(expected) = if_match
                    && expected != existing.etag()
                {
                    return Err(StoreFailure::precondition_failed(format!(
                        "version mismatch: expected {expected}, found {}",
                        existing.etag()
                    )));
                }
                resource.meta.version_id = existing.meta.version_id + 1;
            }
            None => {
                if !allow_create {
                    return Err(StoreFailure::not_found(format!(
                        "{}/{} does not exist",
                        self.resource_type, resource.id
                    )));
                }
                if let Some(expected) = if_match {
                    return Err(StoreFailure::precondition_failed(format!(
                        "no stored version matches {expected}"
                    )));
                }
                resource.meta.version_id = 1;
            }
        }

        resource.meta.last_updated = now_utc();
        let created = previous.is_none();
        resources.insert(resource.id.clone(), resource.clone());
        debug!(resource = %resource.reference(), version = resource.meta.version_id, "updated");
        Ok(Mutation {
            stored: Some(resource),
            previous,
            created,
        })
    }

    /// Removes the resource. Protected ids are refused and kept; a missing
    /// id yields `Ok(None)` so the caller decides the status.
    pub fn delete(&self, id: &str) -> StoreResult<Option<Mutation>> {
        if self.config.is_protected(&self.resource_type, id) {
            return Err(StoreFailure::forbidden(format!(
                "{}/{id} is protected from deletion",
                self.resource_type
            )));
        }
        let mut resources = self.resources.write().expect("resource lock poisoned");
        let Some(previous) = resources.shift_remove(id) else {
            return Ok(None);
        };
        debug!(resource = %previous.reference(), "deleted");
        Ok(Some(Mutation {
            stored: None,
            previous: Some(previous),
            created: false,
        }))
    }

    /// Insertion-ordered snapshot for searching.
    pub fn snapshot(&self) -> Vec<ResourceEnvelope> {
        self.resources
            .read()
            .expect("resource lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.read().expect("resource lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts oldest-first down to `limit`, skipping protected ids.
    /// Returns the evicted resources, oldest first.
    pub fn evict_to(&self, limit: usize) -> Vec<ResourceEnvelope> {
        let mut resources = self.resources.write().expect("resource lock poisoned");
        if resources.len() <= limit {
            return Vec::new();
        }
        let excess = resources.len() - limit;
        let victims: Vec<String> = resources
            .keys()
            .filter(|id| !self.config.is_protected(&self.resource_type, id))
            .take(excess)
            .cloned()
            .collect();
        victims
            .iter()
            .filter_map(|id| resources.shift_remove(id))
            .collect()
    }

    pub fn set_executable_search_parameter(&self, definition: SearchParameterDefinition) {
        self.params
            .insert(definition.code.clone(), Arc::new(definition));
    }

    pub fn remove_executable_search_parameter(&self, code: &str) -> bool {
        self.params.remove(code).is_some()
    }

    pub fn search_parameter(&self, code: &str) -> Option<Arc<SearchParameterDefinition>> {
        self.params.get(code).map(|p| p.value().clone())
    }

    pub fn search_parameters(&self) -> Vec<Arc<SearchParameterDefinition>> {
        self.params.iter().map(|p| p.value().clone()).collect()
    }
}

impl std::fmt::Debug for TypeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeStore")
            .field("resource_type", &self.resource_type)
            .field("resources", &self.len())
            .field("search_parameters", &self.params.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> TypeStore {
        TypeStore::new("Patient", Arc::new(StoreConfig::default()))
    }

    fn patient(id: &str) -> ResourceEnvelope {
        ResourceEnvelope::from_json(json!({"resourceType": "Patient", "id": id})).unwrap()
    }

    #[test]
    fn create_assigns_id_and_version_one() {
        let store = store();
        let mut resource = patient("ignored");
        resource.id = String::new();
        let mutation = store.create(resource, false).unwrap();
        let stored = mutation.stored.unwrap();
        assert!(!stored.id.is_empty());
        assert_eq!(stored.meta.version_id, 1);
        assert!(mutation.created);
        assert!(mutation.previous.is_none());
    }

    #[test]
    fn create_rejects_existing_id() {
        let store = store();
        store.create(patient("p-1"), false).unwrap();
        let failure = store.create(patient("p-1"), false).unwrap_err();
        assert_eq!(failure.status, http::StatusCode::CONFLICT);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn versions_increase_strictly() {
        let store = store();
        store.create(patient("p-1"), false).unwrap();
        for expected in 2..=5u64 {
            let mutation = store.update(patient("p-1"), false, None, None).unwrap();
            assert_eq!(mutation.stored.unwrap().meta.version_id, expected);
        }
    }

    #[test]
    fn stale_if_match_leaves_state_unchanged() {
        let store = store();
        store.create(patient("p-1"), false).unwrap();
        store.update(patient("p-1"), false, None, None).unwrap();

        let failure = store
            .update(patient("p-1"), false, Some("W/\"1\""), None)
            .unwrap_err();
        assert_eq!(failure.status, http::StatusCode::PRECONDITION_FAILED);
        assert_eq!(store.read("p-1").unwrap().meta.version_id, 2);
    }

    #[test]
    fn if_none_match_star_blocks_replace() {
        let store = store();
        store.create(patient("p-1"), false).unwrap();
        let failure = store
            .update(patient("p-1"), true, None, Some("*"))
            .unwrap_err();
        assert_eq!(failure.status, http::StatusCode::PRECONDITION_FAILED);
    }

    #[test]
    fn update_as_create_needs_allow_create() {
        let store = store();
        let failure = store.update(patient("p-9"), false, None, None).unwrap_err();
        assert_eq!(failure.status, http::StatusCode::NOT_FOUND);

        let mutation = store.update(patient("p-9"), true, None, None).unwrap();
        assert!(mutation.created);
        assert_eq!(mutation.stored.unwrap().meta.version_id, 1);
    }

    #[test]
    fn update_rejects_invalid_ids_like_create() {
        let store = store();
        let failure = store.update(patient("has space"), true, None, None).unwrap_err();
        assert_eq!(failure.status, http::StatusCode::BAD_REQUEST);
        assert!(store.is_empty());

        let failure = store.create(patient("has space"), false).unwrap_err();
        assert_eq!(failure.status, http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn delete_captures_previous_and_missing_is_none() {
        let store = store();
        store.create(patient("p-1"), false).unwrap();
        let mutation = store.delete("p-1").unwrap().unwrap();
        assert_eq!(mutation.previous.unwrap().id, "p-1");
        assert!(mutation.stored.is_none());
        assert!(store.delete("p-1").unwrap().is_none());
    }

    #[test]
    fn protected_id_survives_delete_and_eviction() {
        let config = StoreConfig {
            protected_ids: vec!["Patient/seed".to_string()],
            ..Default::default()
        };
        let store = TypeStore::new("Patient", Arc::new(config));
        store.create(patient("seed"), false).unwrap();
        store.create(patient("p-1"), false).unwrap();
        store.create(patient("p-2"), false).unwrap();

        let failure = store.delete("seed").unwrap_err();
        assert_eq!(failure.status, http::StatusCode::FORBIDDEN);
        assert!(store.contains("seed"));

        let evicted = store.evict_to(1);
        let ids: Vec<String> = evicted.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["p-1", "p-2"]);
        assert!(store.contains("seed"));
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let store = store();
        for id in ["c", "a", "b"] {
            store.create(patient(id), false).unwrap();
        }
        let order: Vec<String> = store.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }
}
