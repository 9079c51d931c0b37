//! Parsed subscription topics: one trigger set per resource type.

use crate::error::SubscriptionError;
use lumen_core::ResourceEnvelope;
use serde_json::Value;
use std::collections::HashMap;

/// One resource trigger of a topic. With none of the interaction flags
/// set, the trigger applies to every interaction kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceTrigger {
    pub on_create: bool,
    pub on_update: bool,
    pub on_delete: bool,
    pub path_criteria: Option<String>,
    pub query_previous: Option<String>,
    pub query_current: Option<String>,
    pub create_auto_pass: bool,
    pub create_auto_fail: bool,
    pub delete_auto_pass: bool,
    pub delete_auto_fail: bool,
    pub require_both_queries: bool,
}

impl ResourceTrigger {
    pub fn applies_to(&self, kind: lumen_core::MutationKind) -> bool {
        use lumen_core::MutationKind::*;
        if !self.on_create && !self.on_update && !self.on_delete {
            return true;
        }
        match kind {
            Create => self.on_create,
            Update => self.on_update,
            Delete => self.on_delete,
        }
    }
}

/// A topic definition reduced to the parts trigger evaluation needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTopic {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    /// Triggers keyed by resource type name.
    pub resource_triggers: HashMap<String, Vec<ResourceTrigger>>,
}

impl ParsedTopic {
    /// Parses a stored `SubscriptionTopic` resource. The topic must carry
    /// a canonical `url`; everything else is optional.
    pub fn from_resource(resource: &ResourceEnvelope) -> Result<Self, SubscriptionError> {
        if resource.resource_type != "SubscriptionTopic" {
            return Err(SubscriptionError::invalid_topic(format!(
                "expected SubscriptionTopic, got {}",
                resource.resource_type
            )));
        }
        let url = resource
            .get_field("url")
            .and_then(Value::as_str)
            .ok_or_else(|| SubscriptionError::invalid_topic("missing canonical url"))?
            .to_string();

        let mut resource_triggers: HashMap<String, Vec<ResourceTrigger>> = HashMap::new();
        if let Some(Value::Array(triggers)) = resource.get_field("resourceTrigger") {
            for raw in triggers {
                let Some(resource_type) = raw.get("resource").and_then(Value::as_str) else {
                    return Err(SubscriptionError::invalid_topic(
                        "resourceTrigger without resource type",
                    ));
                };
                resource_triggers
                    .entry(resource_type.to_string())
                    .or_default()
                    .push(parse_trigger(raw));
            }
        }

        Ok(Self {
            id: resource.id.clone(),
            url,
            title: resource
                .get_field("title")
                .and_then(Value::as_str)
                .map(String::from),
            resource_triggers,
        })
    }

    pub fn triggers_for(&self, resource_type: &str) -> &[ResourceTrigger] {
        self.resource_triggers
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn parse_trigger(raw: &Value) -> ResourceTrigger {
    let mut trigger = ResourceTrigger::default();
    if let Some(Value::Array(interactions)) = raw.get("supportedInteraction") {
        for interaction in interactions {
            match interaction.as_str() {
                Some("create") => trigger.on_create = true,
                Some("update") => trigger.on_update = true,
                Some("delete") => trigger.on_delete = true,
                _ => {}
            }
        }
    }
    trigger.path_criteria = raw
        .get("fhirPathCriteria")
        .and_then(Value::as_str)
        .map(String::from);
    if let Some(query) = raw.get("queryCriteria") {
        trigger.query_previous = query
            .get("previous")
            .and_then(Value::as_str)
            .map(String::from);
        trigger.query_current = query
            .get("current")
            .and_then(Value::as_str)
            .map(String::from);
        trigger.require_both_queries = query
            .get("requireBoth")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        match query.get("resultForCreate").and_then(Value::as_str) {
            Some("test-passes") => trigger.create_auto_pass = true,
            Some("test-fails") => trigger.create_auto_fail = true,
            _ => {}
        }
        match query.get("resultForDelete").and_then(Value::as_str) {
            Some("test-passes") => trigger.delete_auto_pass = true,
            Some("test-fails") => trigger.delete_auto_fail = true,
            _ => {}
        }
    }
    trigger
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::MutationKind;
    use serde_json::json;

    fn topic_resource() -> ResourceEnvelope {
        ResourceEnvelope::from_json(json!({
            "resourceType": "SubscriptionTopic",
            "id": "encounter-complete",
            "url": "http://example.org/topics/encounter-complete",
            "title": "Completed encounters",
            "resourceTrigger": [{
                "resource": "Encounter",
                "supportedInteraction": ["create", "update"],
                "fhirPathCriteria": "(%previous.empty() or %previous.status != 'finished') and (%current.status = 'finished')"
            }, {
                "resource": "Encounter",
                "supportedInteraction": ["delete"],
                "queryCriteria": {
                    "previous": "status=planned",
                    "resultForDelete": "test-fails"
                }
            }]
        }))
        .unwrap()
    }

    #[test]
    fn parses_triggers_by_resource_type() {
        let topic = ParsedTopic::from_resource(&topic_resource()).unwrap();
        assert_eq!(topic.url, "http://example.org/topics/encounter-complete");
        let triggers = topic.triggers_for("Encounter");
        assert_eq!(triggers.len(), 2);
        assert!(triggers[0].on_create && triggers[0].on_update && !triggers[0].on_delete);
        assert!(triggers[0].path_criteria.is_some());
        assert!(triggers[1].on_delete);
        assert_eq!(triggers[1].query_previous.as_deref(), Some("status=planned"));
        assert!(triggers[1].delete_auto_fail);
        assert!(topic.triggers_for("Patient").is_empty());
    }

    #[test]
    fn no_interaction_flags_means_any_interaction() {
        let trigger = ResourceTrigger::default();
        assert!(trigger.applies_to(MutationKind::Create));
        assert!(trigger.applies_to(MutationKind::Update));
        assert!(trigger.applies_to(MutationKind::Delete));

        let create_only = ResourceTrigger {
            on_create: true,
            ..Default::default()
        };
        assert!(create_only.applies_to(MutationKind::Create));
        assert!(!create_only.applies_to(MutationKind::Delete));
    }

    #[test]
    fn missing_url_is_rejected() {
        let resource = ResourceEnvelope::from_json(json!({
            "resourceType": "SubscriptionTopic",
            "id": "t-1"
        }))
        .unwrap();
        assert!(ParsedTopic::from_resource(&resource).is_err());
    }
}
