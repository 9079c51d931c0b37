use lumen_core::{Interaction, RequestContext, ResourceEnvelope, ResponseContext};
use lumen_search::{SearchParamType, SearchParameterDefinition};
use lumen_store::{Store, StoreConfig};
use serde_json::{Value, json};
use std::sync::Arc;

/// A store preloaded with the executable search parameters the tests use.
pub fn test_store() -> Arc<Store> {
    test_store_with(StoreConfig::default())
}

/// Routes store tracing to the test writer; `RUST_LOG` selects the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_store_with(config: StoreConfig) -> Arc<Store> {
    init_tracing();
    Store::builder(config)
        .search_parameter(
            "Patient",
            SearchParameterDefinition::new("name", SearchParamType::String, "Patient.name"),
        )
        .search_parameter(
            "Patient",
            SearchParameterDefinition::new("birthdate", SearchParamType::Date, "Patient.birthDate"),
        )
        .search_parameter(
            "Patient",
            SearchParameterDefinition::new("active", SearchParamType::Token, "Patient.active"),
        )
        .search_parameter(
            "Patient",
            SearchParameterDefinition::new(
                "identifier",
                SearchParamType::Token,
                "Patient.identifier",
            ),
        )
        .search_parameter(
            "Encounter",
            SearchParameterDefinition::new("status", SearchParamType::Token, "Encounter.status"),
        )
        .search_parameter(
            "Observation",
            SearchParameterDefinition::new("code", SearchParamType::Token, "Observation.code"),
        )
        .search_parameter(
            "Observation",
            SearchParameterDefinition::new(
                "value-quantity",
                SearchParamType::Quantity,
                "Observation.valueQuantity",
            ),
        )
        .search_parameter(
            "Observation",
            SearchParameterDefinition::new(
                "subject",
                SearchParamType::Reference,
                "Observation.subject",
            )
            .with_targets(vec!["Patient".to_string()]),
        )
        .build()
        .expect("test store")
}

pub fn envelope(value: Value) -> ResourceEnvelope {
    ResourceEnvelope::from_json(value).expect("test resource")
}

pub async fn create(store: &Store, value: Value) -> ResponseContext {
    let resource = envelope(value);
    let ctx = RequestContext::new(Interaction::InstanceCreate)
        .with_type(resource.resource_type.clone())
        .with_body(resource);
    store.dispatch(ctx).await
}

pub async fn update(store: &Store, value: Value) -> ResponseContext {
    let resource = envelope(value);
    let ctx = RequestContext::new(Interaction::InstanceUpdate)
        .with_type(resource.resource_type.clone())
        .with_id(resource.id.clone())
        .with_body(resource);
    store.dispatch(ctx).await
}

pub async fn search(store: &Store, resource_type: &str, query: &str) -> ResponseContext {
    let ctx = RequestContext::new(Interaction::TypeSearch)
        .with_type(resource_type)
        .with_query(query);
    store.dispatch(ctx).await
}

/// Ids of the `match`-mode entries in a searchset response, in order.
pub fn match_ids(response: &ResponseContext) -> Vec<String> {
    let bundle = response.bundle.as_ref().expect("searchset bundle");
    bundle["entry"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter(|e| e["search"]["mode"] == "match")
                .filter_map(|e| e["resource"]["id"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

pub fn topic_json(url: &str, trigger: Value) -> Value {
    json!({
        "resourceType": "SubscriptionTopic",
        "id": "topic-1",
        "url": url,
        "resourceTrigger": [trigger],
    })
}

pub fn subscription_json(id: &str, topic_url: &str) -> Value {
    json!({
        "resourceType": "Subscription",
        "id": id,
        "status": "requested",
        "topic": topic_url,
        "channelType": {"code": "rest-hook"},
    })
}
