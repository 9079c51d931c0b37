//! Capability document generation from the live registries.

use crate::config::StoreConfig;
use crate::operations::OperationRegistry;
use crate::type_store::TypeStore;
use lumen_core::now_utc;
use serde_json::{Value, json};
use std::sync::Arc;

const SUPPORTED_INTERACTIONS: &[&str] = &[
    "create",
    "read",
    "update",
    "delete",
    "search-type",
];

/// Builds the capability statement from what is actually registered:
/// supported types, their installed search parameters and the named
/// operations.
pub fn generate(
    config: &StoreConfig,
    types: &[Arc<TypeStore>],
    operations: &OperationRegistry,
) -> Value {
    let resources: Vec<Value> = types
        .iter()
        .map(|store| {
            let mut params: Vec<Value> = store
                .search_parameters()
                .iter()
                .map(|p| {
                    json!({
                        "name": p.code,
                        "type": p.param_type.as_str(),
                    })
                })
                .collect();
            params.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
            json!({
                "type": store.resource_type(),
                "interaction": SUPPORTED_INTERACTIONS
                    .iter()
                    .map(|code| json!({"code": code}))
                    .collect::<Vec<_>>(),
                "searchParam": params,
            })
        })
        .collect();

    let mut operation_names = operations.names();
    operation_names.sort();
    let operation_entries: Vec<Value> = operation_names
        .iter()
        .map(|name| json!({"name": name.trim_start_matches('$')}))
        .collect();

    json!({
        "resourceType": "CapabilityStatement",
        "status": "active",
        "date": now_utc().to_string(),
        "kind": "instance",
        "fhirVersion": config.fhir_version,
        "format": [lumen_core::traits::MIME_JSON],
        "implementation": {
            "description": "Lumen in-memory resource store",
            "url": config.base_url,
        },
        "rest": [{
            "mode": "server",
            "resource": resources,
            "operation": operation_entries,
        }],
    })
}
