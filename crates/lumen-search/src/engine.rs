//! Search matching engine: decides whether one resource satisfies a parsed
//! query. Parameters AND together; values within a parameter OR together.

use crate::cache::CompiledParamCache;
use crate::error::SearchError;
use crate::parameters::{SearchModifier, SearchParamType, SearchParameterDefinition};
use crate::parser::{ParsedSearchParameter, ParsedValue};
use crate::values;
use lumen_core::path::EvalContext;
use lumen_core::{ReferenceResolver, ResourceEnvelope};
use serde_json::Value;
use std::sync::Arc;

/// Lookup of search parameter definitions by resource type and code.
/// Implemented by whatever registry owns the definitions.
pub trait ParamDefinitions: Send + Sync {
    fn lookup(&self, resource_type: &str, code: &str) -> Option<Arc<SearchParameterDefinition>>;
}

/// Everything needed to evaluate parameters against resources of one type.
pub struct SearchContext<'a> {
    pub resource_type: &'a str,
    pub definitions: &'a dyn ParamDefinitions,
    pub cache: &'a CompiledParamCache,
    pub resolver: Option<&'a dyn ReferenceResolver>,
}

impl<'a> SearchContext<'a> {
    pub fn new(
        resource_type: &'a str,
        definitions: &'a dyn ParamDefinitions,
        cache: &'a CompiledParamCache,
    ) -> Self {
        Self {
            resource_type,
            definitions,
            cache,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: &'a dyn ReferenceResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn for_type(&self, resource_type: &'a str) -> SearchContext<'a> {
        SearchContext {
            resource_type,
            definitions: self.definitions,
            cache: self.cache,
            resolver: self.resolver,
        }
    }
}

/// True when the resource satisfies every non-result-control parameter.
pub fn resource_matches(
    ctx: &SearchContext<'_>,
    resource: &ResourceEnvelope,
    params: &[ParsedSearchParameter],
) -> Result<bool, SearchError> {
    for param in params {
        if param.is_result_control() {
            continue;
        }
        if !param_matches(ctx, resource, param)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn param_matches(
    ctx: &SearchContext<'_>,
    resource: &ResourceEnvelope,
    param: &ParsedSearchParameter,
) -> Result<bool, SearchError> {
    if param.name.contains('.') {
        return chained_matches(ctx, resource, param);
    }
    match param.name.as_str() {
        "_id" => {
            return Ok(param
                .values
                .iter()
                .any(|v| v.raw == resource.id));
        }
        "_profile" => {
            let profiles: Vec<Value> = resource
                .meta
                .profile
                .iter()
                .map(|p| Value::String(p.clone()))
                .collect();
            if let Some(SearchModifier::Missing) = param.modifier {
                return Ok(missing_matches(&profiles, param));
            }
            return Ok(param
                .values
                .iter()
                .any(|v| values::match_uri(&profiles, &v.raw)));
        }
        _ => {}
    }

    let definition = ctx
        .definitions
        .lookup(ctx.resource_type, &param.name)
        .ok_or_else(|| {
            SearchError::UnknownParameter(format!("{}.{}", ctx.resource_type, param.name))
        })?;

    let expression = ctx
        .cache
        .get_or_compile(ctx.resource_type, &definition.code, &definition.expression)?;
    let json = resource.as_json();
    let mut eval = EvalContext::default();
    if let Some(resolver) = ctx.resolver {
        eval = eval.with_resolver(resolver);
    }
    let candidates = expression.evaluate(&json, &eval);

    if let Some(SearchModifier::Missing) = param.modifier {
        return Ok(missing_matches(&candidates, param));
    }

    let matched = param
        .values
        .iter()
        .any(|value| value_matches(&definition, &candidates, value, param.modifier.as_ref()));
    match param.modifier {
        Some(SearchModifier::Not) => Ok(!matched),
        _ => Ok(matched),
    }
}

/// `:missing=true` matches when extraction yields nothing; `false` when it
/// yields at least one value.
fn missing_matches(candidates: &[Value], param: &ParsedSearchParameter) -> bool {
    let want_missing = param
        .values
        .first()
        .map(|v| v.raw == "true")
        .unwrap_or(true);
    candidates.is_empty() == want_missing
}

fn value_matches(
    definition: &SearchParameterDefinition,
    candidates: &[Value],
    value: &ParsedValue,
    modifier: Option<&SearchModifier>,
) -> bool {
    match definition.param_type {
        SearchParamType::String => values::match_string(candidates, &value.raw, modifier),
        SearchParamType::Token => match modifier {
            Some(SearchModifier::OfType) => values::match_token_of_type(candidates, &value.raw),
            _ => values::match_token(candidates, &value.raw),
        },
        SearchParamType::Number => values::match_number(candidates, &value.raw, value.comparator),
        SearchParamType::Date => values::match_date(candidates, &value.raw, value.comparator),
        SearchParamType::Quantity => {
            values::match_quantity(candidates, &value.raw, value.comparator)
        }
        SearchParamType::Reference => {
            let qualifier = match modifier {
                Some(SearchModifier::Type(rt)) => Some(rt.as_str()),
                _ => None,
            };
            values::match_reference(candidates, &value.raw, qualifier)
        }
        SearchParamType::Uri => values::match_uri(candidates, &value.raw),
    }
}

/// Chained parameter: `ref.field` or `ref:Type.field`. References are
/// resolved and the tail is evaluated against each target; any matching
/// target satisfies the chain.
fn chained_matches(
    ctx: &SearchContext<'_>,
    resource: &ResourceEnvelope,
    param: &ParsedSearchParameter,
) -> Result<bool, SearchError> {
    let (head, tail) = param
        .name
        .split_once('.')
        .expect("caller checked for '.'");
    let (head_code, type_qualifier) = match head.split_once(':') {
        Some((code, rt)) => (code, Some(rt.to_string())),
        None => (head, None),
    };

    let definition = ctx
        .definitions
        .lookup(ctx.resource_type, head_code)
        .ok_or_else(|| {
            SearchError::UnknownParameter(format!("{}.{}", ctx.resource_type, head_code))
        })?;
    if definition.param_type != SearchParamType::Reference {
        return Err(SearchError::NotChainable(head_code.to_string()));
    }
    let Some(resolver) = ctx.resolver else {
        return Ok(false);
    };

    let expression = ctx
        .cache
        .get_or_compile(ctx.resource_type, &definition.code, &definition.expression)?;
    let json = resource.as_json();
    let eval = EvalContext::default().with_resolver(resolver);
    let references = expression.evaluate(&json, &eval);

    let tail_param = ParsedSearchParameter {
        name: tail.to_string(),
        modifier: None,
        values: param.values.clone(),
    };
    for reference in &references {
        let Some(reference) = values::reference_of(reference) else {
            continue;
        };
        let Some(target) = resolver.resolve(&reference) else {
            continue;
        };
        if let Some(qualifier) = &type_qualifier
            && target.resource_type != *qualifier
        {
            continue;
        }
        if !definition.targets.is_empty()
            && !definition.targets.contains(&target.resource_type)
        {
            continue;
        }
        let target_ctx = ctx.for_type(&target.resource_type);
        if param_matches(&target_ctx, &target, &tail_param)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;
    use serde_json::json;
    use std::collections::HashMap;

    struct MapDefs(HashMap<(String, String), Arc<SearchParameterDefinition>>);

    impl MapDefs {
        fn new(defs: Vec<(&str, SearchParameterDefinition)>) -> Self {
            Self(
                defs.into_iter()
                    .map(|(rt, d)| ((rt.to_string(), d.code.clone()), Arc::new(d)))
                    .collect(),
            )
        }
    }

    impl ParamDefinitions for MapDefs {
        fn lookup(
            &self,
            resource_type: &str,
            code: &str,
        ) -> Option<Arc<SearchParameterDefinition>> {
            self.0
                .get(&(resource_type.to_string(), code.to_string()))
                .cloned()
        }
    }

    struct MapResolver(HashMap<String, ResourceEnvelope>);

    impl ReferenceResolver for MapResolver {
        fn resolve(&self, reference: &str) -> Option<ResourceEnvelope> {
            self.0.get(reference).cloned()
        }
    }

    fn patient() -> ResourceEnvelope {
        ResourceEnvelope::from_json(json!({
            "resourceType": "Patient",
            "id": "p-1",
            "name": [{"family": "Johnson", "given": ["Ada"]}],
            "birthDate": "1990-04-02",
            "active": true
        }))
        .unwrap()
    }

    fn patient_defs() -> MapDefs {
        MapDefs::new(vec![
            (
                "Patient",
                SearchParameterDefinition::new("name", SearchParamType::String, "Patient.name"),
            ),
            (
                "Patient",
                SearchParameterDefinition::new(
                    "birthdate",
                    SearchParamType::Date,
                    "Patient.birthDate",
                ),
            ),
            (
                "Patient",
                SearchParameterDefinition::new("active", SearchParamType::Token, "Patient.active"),
            ),
        ])
    }

    #[test]
    fn params_and_values_or() {
        let defs = patient_defs();
        let cache = CompiledParamCache::new();
        let ctx = SearchContext::new("Patient", &defs, &cache);
        let resource = patient();

        let params = parse_query("name=smith,john&birthdate=ge1990").unwrap();
        assert!(resource_matches(&ctx, &resource, &params).unwrap());

        let params = parse_query("name=smith&birthdate=ge1990").unwrap();
        assert!(!resource_matches(&ctx, &resource, &params).unwrap());
    }

    #[test]
    fn id_and_missing_specials() {
        let defs = patient_defs();
        let cache = CompiledParamCache::new();
        let ctx = SearchContext::new("Patient", &defs, &cache);
        let resource = patient();

        let params = parse_query("_id=p-1").unwrap();
        assert!(resource_matches(&ctx, &resource, &params).unwrap());

        let params = parse_query("_profile:missing=true").unwrap();
        assert!(resource_matches(&ctx, &resource, &params).unwrap());

        let params = parse_query("name:missing=true").unwrap();
        assert!(!resource_matches(&ctx, &resource, &params).unwrap());
    }

    #[test]
    fn not_modifier_inverts() {
        let defs = patient_defs();
        let cache = CompiledParamCache::new();
        let ctx = SearchContext::new("Patient", &defs, &cache);
        let resource = patient();

        let params = parse_query("active:not=false").unwrap();
        assert!(resource_matches(&ctx, &resource, &params).unwrap());
        let params = parse_query("active:not=true").unwrap();
        assert!(!resource_matches(&ctx, &resource, &params).unwrap());
    }

    #[test]
    fn unknown_parameter_is_an_error() {
        let defs = patient_defs();
        let cache = CompiledParamCache::new();
        let ctx = SearchContext::new("Patient", &defs, &cache);
        let params = parse_query("color=blue").unwrap();
        let err = resource_matches(&ctx, &patient(), &params).unwrap_err();
        assert!(matches!(err, SearchError::UnknownParameter { .. }));
    }

    #[test]
    fn chained_reference_matches_target_field() {
        let mut defs = patient_defs();
        defs.0.insert(
            ("Observation".to_string(), "subject".to_string()),
            Arc::new(
                SearchParameterDefinition::new(
                    "subject",
                    SearchParamType::Reference,
                    "Observation.subject",
                )
                .with_targets(vec!["Patient".to_string()]),
            ),
        );
        let cache = CompiledParamCache::new();
        let resolver = MapResolver(
            [("Patient/p-1".to_string(), patient())].into_iter().collect(),
        );
        let ctx = SearchContext::new("Observation", &defs, &cache).with_resolver(&resolver);

        let observation = ResourceEnvelope::from_json(json!({
            "resourceType": "Observation",
            "id": "o-1",
            "subject": {"reference": "Patient/p-1"}
        }))
        .unwrap();

        let params = parse_query("subject.name=john").unwrap();
        assert!(resource_matches(&ctx, &observation, &params).unwrap());

        let params = parse_query("subject:Patient.name=john").unwrap();
        assert!(resource_matches(&ctx, &observation, &params).unwrap());

        let params = parse_query("subject:Group.name=john").unwrap();
        assert!(!resource_matches(&ctx, &observation, &params).unwrap());
    }
}
