//! Compilation of topic triggers into executable predicates and their
//! evaluation against `(previous, current)` mutation pairs.
//!
//! Compilation preference: path criteria over query criteria over
//! interaction-only. A path criterion sees the mutation through the
//! `%previous` and `%current` variables; query criteria follow a
//! per-interaction truth table with auto pass/fail overrides.

use crate::error::SubscriptionError;
use crate::topic::{ParsedTopic, ResourceTrigger};
use lumen_core::path::{EvalContext, PathExpression};
use lumen_core::{MutationKind, ResourceEnvelope};
use lumen_search::{ParsedSearchParameter, SearchError, parse_query};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Matching callback the trigger engine borrows from the store: evaluates
/// already-parsed search parameters against one resource.
pub trait QueryMatcher: Send + Sync {
    fn matches(
        &self,
        resource_type: &str,
        resource: &ResourceEnvelope,
        params: &[ParsedSearchParameter],
    ) -> Result<bool, SearchError>;
}

/// The executable form of one topic trigger.
#[derive(Debug, Clone)]
pub enum TriggerCriteria {
    Path(Arc<PathExpression>),
    Query {
        previous: Option<Vec<ParsedSearchParameter>>,
        current: Option<Vec<ParsedSearchParameter>>,
        require_both: bool,
        create_auto: Option<bool>,
        delete_auto: Option<bool>,
    },
    InteractionOnly,
}

#[derive(Debug, Clone)]
pub struct CompiledTrigger {
    pub resource_type: String,
    source: ResourceTrigger,
    criteria: TriggerCriteria,
}

impl CompiledTrigger {
    pub fn compile(
        resource_type: &str,
        trigger: &ResourceTrigger,
    ) -> Result<Self, SubscriptionError> {
        let criteria = if let Some(path) = &trigger.path_criteria {
            let compiled = PathExpression::parse(path).map_err(|e| {
                SubscriptionError::trigger_compile(resource_type, e.to_string())
            })?;
            TriggerCriteria::Path(Arc::new(compiled))
        } else if trigger.query_previous.is_some() || trigger.query_current.is_some() {
            let parse = |query: &Option<String>| -> Result<_, SubscriptionError> {
                query
                    .as_deref()
                    .map(parse_query)
                    .transpose()
                    .map_err(|e| SubscriptionError::trigger_compile(resource_type, e.to_string()))
            };
            TriggerCriteria::Query {
                previous: parse(&trigger.query_previous)?,
                current: parse(&trigger.query_current)?,
                require_both: trigger.require_both_queries,
                create_auto: auto_override(trigger.create_auto_pass, trigger.create_auto_fail),
                delete_auto: auto_override(trigger.delete_auto_pass, trigger.delete_auto_fail),
            }
        } else {
            TriggerCriteria::InteractionOnly
        };
        Ok(Self {
            resource_type: resource_type.to_string(),
            source: trigger.clone(),
            criteria,
        })
    }

    pub fn criteria(&self) -> &TriggerCriteria {
        &self.criteria
    }

    pub fn applies_to(&self, kind: MutationKind) -> bool {
        self.source.applies_to(kind)
    }

    /// Whether this trigger fires for the given mutation. The caller has
    /// already checked `applies_to`.
    pub fn fires(
        &self,
        kind: MutationKind,
        previous: Option<&ResourceEnvelope>,
        current: Option<&ResourceEnvelope>,
        matcher: &dyn QueryMatcher,
    ) -> Result<bool, SubscriptionError> {
        match &self.criteria {
            TriggerCriteria::InteractionOnly => Ok(true),
            TriggerCriteria::Path(expression) => {
                let previous_json = previous.map(ResourceEnvelope::as_json);
                let current_json = current.map(ResourceEnvelope::as_json);
                let ctx = EvalContext::new()
                    .with_variable("previous", collection(&previous_json))
                    .with_variable("current", collection(&current_json))
                    .with_variable(
                        "resource",
                        collection(&current_json.clone().or(previous_json.clone())),
                    );
                let focus = current_json.or(previous_json).unwrap_or(Value::Null);
                Ok(expression.evaluate_bool(&focus, &ctx))
            }
            TriggerCriteria::Query {
                previous: prev_params,
                current: curr_params,
                require_both,
                create_auto,
                delete_auto,
            } => {
                let match_params = |params: &Option<Vec<ParsedSearchParameter>>,
                                    resource: Option<&ResourceEnvelope>|
                 -> Result<Option<bool>, SubscriptionError> {
                    match (params, resource) {
                        (Some(params), Some(resource)) => Ok(Some(matcher.matches(
                            &self.resource_type,
                            resource,
                            params,
                        )?)),
                        (Some(_), None) => Ok(Some(false)),
                        (None, _) => Ok(None),
                    }
                };
                match kind {
                    MutationKind::Create => {
                        if let Some(forced) = create_auto {
                            return Ok(*forced);
                        }
                        Ok(match_params(curr_params, current)?.unwrap_or(true))
                    }
                    MutationKind::Delete => {
                        if let Some(forced) = delete_auto {
                            return Ok(*forced);
                        }
                        Ok(match_params(prev_params, previous)?.unwrap_or(true))
                    }
                    MutationKind::Update => {
                        let prev = match_params(prev_params, previous)?;
                        let curr = match_params(curr_params, current)?;
                        Ok(if *require_both {
                            prev.unwrap_or(true) && curr.unwrap_or(true)
                        } else {
                            prev.unwrap_or(false) || curr.unwrap_or(false)
                        })
                    }
                }
            }
        }
    }
}

fn auto_override(pass: bool, fail: bool) -> Option<bool> {
    match (pass, fail) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn collection(value: &Option<Value>) -> Vec<Value> {
    match value {
        Some(v) => vec![v.clone()],
        None => Vec::new(),
    }
}

/// A topic with all of its triggers compiled. Triggers that failed to
/// compile are kept as errors; activation requires at least one success.
#[derive(Debug)]
pub struct CompiledTopic {
    pub parsed: ParsedTopic,
    triggers: HashMap<String, Vec<CompiledTrigger>>,
    compile_errors: Vec<String>,
}

impl CompiledTopic {
    pub fn compile(parsed: ParsedTopic) -> Self {
        let mut triggers: HashMap<String, Vec<CompiledTrigger>> = HashMap::new();
        let mut compile_errors = Vec::new();
        for (resource_type, raw_triggers) in &parsed.resource_triggers {
            for raw in raw_triggers {
                match CompiledTrigger::compile(resource_type, raw) {
                    Ok(compiled) => triggers
                        .entry(resource_type.clone())
                        .or_default()
                        .push(compiled),
                    Err(e) => compile_errors.push(e.to_string()),
                }
            }
        }
        Self {
            parsed,
            triggers,
            compile_errors,
        }
    }

    pub fn url(&self) -> &str {
        &self.parsed.url
    }

    pub fn triggers_for(&self, resource_type: &str) -> &[CompiledTrigger] {
        self.triggers
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_triggers(&self) -> bool {
        !self.triggers.is_empty()
    }

    pub fn compile_errors(&self) -> &[String] {
        &self.compile_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoQueries;

    impl QueryMatcher for NoQueries {
        fn matches(
            &self,
            _resource_type: &str,
            _resource: &ResourceEnvelope,
            _params: &[ParsedSearchParameter],
        ) -> Result<bool, SearchError> {
            unreachable!("path triggers never consult the query matcher")
        }
    }

    struct StatusMatcher;

    impl QueryMatcher for StatusMatcher {
        fn matches(
            &self,
            _resource_type: &str,
            resource: &ResourceEnvelope,
            params: &[ParsedSearchParameter],
        ) -> Result<bool, SearchError> {
            Ok(params.iter().all(|p| {
                let actual = resource.get_field(&p.name).and_then(Value::as_str);
                p.values.iter().any(|v| actual == Some(v.raw.as_str()))
            }))
        }
    }

    fn encounter(status: &str) -> ResourceEnvelope {
        ResourceEnvelope::from_json(json!({
            "resourceType": "Encounter",
            "id": "e-1",
            "status": status
        }))
        .unwrap()
    }

    fn finished_trigger() -> CompiledTrigger {
        let raw = ResourceTrigger {
            on_create: true,
            on_update: true,
            path_criteria: Some(
                "(%previous.empty() or %previous.status != 'finished') and (%current.status = 'finished')"
                    .to_string(),
            ),
            ..Default::default()
        };
        CompiledTrigger::compile("Encounter", &raw).unwrap()
    }

    #[test]
    fn path_trigger_matrix() {
        let trigger = finished_trigger();

        // create finished: fires
        assert!(trigger
            .fires(MutationKind::Create, None, Some(&encounter("finished")), &NoQueries)
            .unwrap());
        // planned -> finished: fires
        assert!(trigger
            .fires(
                MutationKind::Update,
                Some(&encounter("planned")),
                Some(&encounter("finished")),
                &NoQueries
            )
            .unwrap());
        // finished -> finished: already finished, does not fire
        assert!(!trigger
            .fires(
                MutationKind::Update,
                Some(&encounter("finished")),
                Some(&encounter("finished")),
                &NoQueries
            )
            .unwrap());
        // delete of planned: no current, does not fire
        assert!(!trigger
            .fires(MutationKind::Delete, Some(&encounter("planned")), None, &NoQueries)
            .unwrap());
    }

    #[test]
    fn query_trigger_truth_table() {
        let raw = ResourceTrigger {
            query_previous: Some("status=planned".to_string()),
            query_current: Some("status=finished".to_string()),
            require_both_queries: true,
            ..Default::default()
        };
        let trigger = CompiledTrigger::compile("Encounter", &raw).unwrap();

        // create consults only the current query
        assert!(trigger
            .fires(MutationKind::Create, None, Some(&encounter("finished")), &StatusMatcher)
            .unwrap());
        assert!(!trigger
            .fires(MutationKind::Create, None, Some(&encounter("planned")), &StatusMatcher)
            .unwrap());
        // delete consults only the previous query
        assert!(trigger
            .fires(MutationKind::Delete, Some(&encounter("planned")), None, &StatusMatcher)
            .unwrap());
        // update with requireBoth needs both sides
        assert!(trigger
            .fires(
                MutationKind::Update,
                Some(&encounter("planned")),
                Some(&encounter("finished")),
                &StatusMatcher
            )
            .unwrap());
        assert!(!trigger
            .fires(
                MutationKind::Update,
                Some(&encounter("in-progress")),
                Some(&encounter("finished")),
                &StatusMatcher
            )
            .unwrap());
    }

    #[test]
    fn auto_overrides_take_precedence() {
        let raw = ResourceTrigger {
            query_current: Some("status=finished".to_string()),
            create_auto_fail: true,
            delete_auto_pass: true,
            ..Default::default()
        };
        let trigger = CompiledTrigger::compile("Encounter", &raw).unwrap();
        assert!(!trigger
            .fires(MutationKind::Create, None, Some(&encounter("finished")), &StatusMatcher)
            .unwrap());
        assert!(trigger
            .fires(MutationKind::Delete, Some(&encounter("planned")), None, &StatusMatcher)
            .unwrap());
    }

    #[test]
    fn interaction_only_trigger_always_fires() {
        let raw = ResourceTrigger {
            on_delete: true,
            ..Default::default()
        };
        let trigger = CompiledTrigger::compile("Encounter", &raw).unwrap();
        assert!(matches!(trigger.criteria(), TriggerCriteria::InteractionOnly));
        assert!(trigger
            .fires(MutationKind::Delete, Some(&encounter("planned")), None, &NoQueries)
            .unwrap());
    }

    #[test]
    fn bad_path_criteria_is_a_compile_error() {
        let raw = ResourceTrigger {
            path_criteria: Some("status = ".to_string()),
            ..Default::default()
        };
        assert!(CompiledTrigger::compile("Encounter", &raw).is_err());
    }
}
