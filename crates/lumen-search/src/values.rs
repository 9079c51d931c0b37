//! Typed matching of extracted candidate values against requested values.
//!
//! Each function takes the candidates a parameter's extraction expression
//! produced and one requested value, and reports whether any candidate
//! satisfies it under the parameter type's rules.

use crate::parameters::{Comparator, SearchModifier};
use serde_json::Value;
use std::cmp::Ordering;

/// Unit synonym groups: the canonical UCUM code first, then accepted
/// human-readable spellings. Comparison accepts any member of the same
/// group; no unit conversion is performed.
const UNIT_SYNONYMS: &[&[&str]] = &[
    &["[lb_av]", "lb", "lbs", "pound", "pounds"],
    &["[in_i]", "in", "inch", "inches"],
    &["kg", "kilogram", "kilograms"],
    &["g", "gram", "grams"],
    &["cm", "centimeter", "centimeters"],
    &["a", "yr", "year", "years"],
    &["mo", "month", "months"],
    &["wk", "week", "weeks"],
    &["d", "day", "days"],
    &["h", "hr", "hour", "hours"],
    &["min", "minute", "minutes"],
];

pub fn match_string(candidates: &[Value], requested: &str, modifier: Option<&SearchModifier>) -> bool {
    let requested_lower = requested.to_lowercase();
    candidates.iter().any(|candidate| {
        string_leaves(candidate).iter().any(|s| match modifier {
            Some(SearchModifier::Exact) => s.as_str() == requested,
            Some(SearchModifier::Contains) => s.to_lowercase().contains(&requested_lower),
            _ => s.to_lowercase().starts_with(&requested_lower),
        })
    })
}

/// Collect all string leaves of a candidate; complex values like HumanName
/// or Address match on any of their parts.
fn string_leaves(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_string_leaves(value, &mut out);
    out
}

fn collect_string_leaves(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_string_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_string_leaves(v, out)),
        _ => {}
    }
}

/// Token matching over `system|code` shaped request values. Candidates may
/// be plain codes, Coding, CodeableConcept or Identifier values.
pub fn match_token(candidates: &[Value], requested: &str) -> bool {
    let (req_system, req_code) = split_token(requested);
    candidates.iter().any(|candidate| {
        token_pairs(candidate).iter().any(|(system, code)| {
            let code_ok = req_code.is_empty() || code.as_deref() == Some(req_code);
            let system_ok = match req_system {
                // bare `code`: any system
                None => true,
                // `|code`: no system present
                Some("") => system.is_none(),
                Some(s) => system.as_deref() == Some(s),
            };
            code_ok && system_ok
        })
    })
}

fn split_token(requested: &str) -> (Option<&str>, &str) {
    match requested.split_once('|') {
        Some((system, code)) => (Some(system), code),
        None => (None, requested),
    }
}

/// All `(system, code)` pairs a token candidate exposes.
fn token_pairs(value: &Value) -> Vec<(Option<String>, Option<String>)> {
    let mut out = Vec::new();
    match value {
        Value::String(s) => out.push((None, Some(s.clone()))),
        Value::Bool(b) => out.push((None, Some(b.to_string()))),
        Value::Object(map) => {
            if let Some(Value::Array(codings)) = map.get("coding") {
                for coding in codings {
                    out.push(coding_pair(coding));
                }
            } else if map.contains_key("value") {
                // Identifier: system + value
                out.push((
                    map.get("system").and_then(Value::as_str).map(String::from),
                    map.get("value").and_then(Value::as_str).map(String::from),
                ));
            } else {
                out.push(coding_pair(value));
            }
        }
        Value::Array(items) => {
            for item in items {
                out.extend(token_pairs(item));
            }
        }
        _ => {}
    }
    out
}

fn coding_pair(value: &Value) -> (Option<String>, Option<String>) {
    (
        value.get("system").and_then(Value::as_str).map(String::from),
        value.get("code").and_then(Value::as_str).map(String::from),
    )
}

/// Identifier `:of-type` matching over `system|code|value` triples, where
/// system and code qualify `Identifier.type.coding`.
pub fn match_token_of_type(candidates: &[Value], requested: &str) -> bool {
    let mut parts = requested.splitn(3, '|');
    let req_system = parts.next().unwrap_or("");
    let req_code = parts.next().unwrap_or("");
    let req_value = parts.next().unwrap_or("");

    candidates.iter().any(|candidate| {
        let identifiers: Vec<&Value> = match candidate {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        identifiers.iter().any(|identifier| {
            let value_ok = identifier.get("value").and_then(Value::as_str) == Some(req_value);
            let type_ok = identifier
                .get("type")
                .map(|t| token_pairs(t).iter().any(|(system, code)| {
                    (req_system.is_empty() || system.as_deref() == Some(req_system))
                        && (req_code.is_empty() || code.as_deref() == Some(req_code))
                }))
                .unwrap_or(false);
            value_ok && type_ok
        })
    })
}

pub fn match_number(candidates: &[Value], requested: &str, comparator: Comparator) -> bool {
    let Ok(requested) = requested.parse::<f64>() else {
        return false;
    };
    candidates.iter().any(|candidate| {
        candidate
            .as_f64()
            .or_else(|| candidate.as_str().and_then(|s| s.parse().ok()))
            .and_then(|v| v.partial_cmp(&requested))
            .map(|ord| comparator.test(ord))
            .unwrap_or(false)
    })
}

/// Date matching at the requested granularity: values are compared on the
/// common ISO-8601 prefix, so `ge2023` matches anything in or after 2023.
pub fn match_date(candidates: &[Value], requested: &str, comparator: Comparator) -> bool {
    candidates.iter().any(|candidate| {
        let Some(candidate) = candidate.as_str() else {
            return false;
        };
        let len = requested.len().min(candidate.len());
        let ord = candidate[..len].cmp(&requested[..len]);
        match comparator {
            // At coarser granularity equality means prefix containment.
            Comparator::Eq => ord == Ordering::Equal,
            Comparator::Ne => ord != Ordering::Equal,
            _ => comparator.test(ord),
        }
    })
}

/// Parsed `value|system|unit` quantity request, segments optional.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityQuery {
    pub value: f64,
    pub system: Option<String>,
    pub unit: Option<String>,
}

impl QuantityQuery {
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, '|');
        let value = parts.next()?.parse::<f64>().ok()?;
        let system = parts.next().filter(|s| !s.is_empty()).map(String::from);
        let unit = parts.next().filter(|s| !s.is_empty()).map(String::from);
        Some(Self {
            value,
            system,
            unit,
        })
    }
}

/// Quantity matching. Units must be identical or known synonyms; a
/// cross-unit comparison without conversion reports no match.
pub fn match_quantity(candidates: &[Value], requested: &str, comparator: Comparator) -> bool {
    let Some(query) = QuantityQuery::parse(requested) else {
        return false;
    };
    candidates.iter().any(|candidate| {
        let Some(value) = candidate.get("value").and_then(Value::as_f64) else {
            return false;
        };
        if let Some(req_system) = &query.system
            && let Some(cand_system) = candidate.get("system").and_then(Value::as_str)
            && cand_system != req_system
        {
            return false;
        }
        if let Some(req_unit) = &query.unit {
            let cand_unit = candidate
                .get("code")
                .and_then(Value::as_str)
                .or_else(|| candidate.get("unit").and_then(Value::as_str));
            match cand_unit {
                Some(cand_unit) if units_comparable(req_unit, cand_unit) => {}
                _ => return false,
            }
        }
        value
            .partial_cmp(&query.value)
            .map(|ord| comparator.test(ord))
            .unwrap_or(false)
    })
}

fn units_comparable(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    UNIT_SYNONYMS
        .iter()
        .any(|group| group.contains(&a) && group.contains(&b))
}

/// Reference matching. Request values may be `id`, `Type/id` or an
/// absolute URL; a `:Type` qualifier narrows bare ids to that type.
pub fn match_reference(
    candidates: &[Value],
    requested: &str,
    type_qualifier: Option<&str>,
) -> bool {
    let requested = match (requested.contains('/'), type_qualifier) {
        (false, Some(qualifier)) => format!("{qualifier}/{requested}"),
        _ => requested.to_string(),
    };
    candidates.iter().any(|candidate| {
        let Some(reference) = reference_of(candidate) else {
            return false;
        };
        if reference == requested {
            return true;
        }
        // Bare id matches the tail of any typed reference.
        if !requested.contains('/') {
            return reference.ends_with(&format!("/{requested}"));
        }
        // Absolute candidate URL matching a relative request.
        reference.ends_with(&format!("/{requested}"))
    })
}

pub fn reference_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("reference").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

pub fn match_uri(candidates: &[Value], requested: &str) -> bool {
    candidates
        .iter()
        .any(|candidate| candidate.as_str() == Some(requested))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_default_is_starts_with_case_insensitive() {
        let candidates = vec![json!("Johnson")];
        assert!(match_string(&candidates, "john", None));
        assert!(!match_string(&candidates, "son", None));
        assert!(match_string(
            &candidates,
            "son",
            Some(&SearchModifier::Contains)
        ));
        assert!(!match_string(
            &candidates,
            "johnson",
            Some(&SearchModifier::Exact)
        ));
        assert!(match_string(
            &candidates,
            "Johnson",
            Some(&SearchModifier::Exact)
        ));
    }

    #[test]
    fn string_matches_complex_values() {
        let candidates = vec![json!({"family": "Doe", "given": ["Jane"]})];
        assert!(match_string(&candidates, "doe", None));
        assert!(match_string(&candidates, "jane", None));
    }

    #[test]
    fn token_system_code_forms() {
        let candidates = vec![json!({
            "coding": [
                {"system": "http://loinc.org", "code": "1234-5"},
                {"code": "local"}
            ]
        })];
        assert!(match_token(&candidates, "1234-5"));
        assert!(match_token(&candidates, "http://loinc.org|1234-5"));
        assert!(match_token(&candidates, "http://loinc.org|"));
        assert!(match_token(&candidates, "|local"));
        assert!(!match_token(&candidates, "http://snomed.info/sct|1234-5"));
        assert!(!match_token(&candidates, "|1234-5"));
    }

    #[test]
    fn token_identifier_form() {
        let candidates = vec![json!({"system": "urn:mrn", "value": "12345"})];
        assert!(match_token(&candidates, "urn:mrn|12345"));
        assert!(match_token(&candidates, "12345"));
    }

    #[test]
    fn of_type_requires_type_and_value() {
        let candidates = vec![json!([{
            "type": {"coding": [{"system": "http://terminology.hl7.org/CodeSystem/v2-0203", "code": "MR"}]},
            "value": "12345"
        }])];
        assert!(match_token_of_type(
            &candidates,
            "http://terminology.hl7.org/CodeSystem/v2-0203|MR|12345"
        ));
        assert!(!match_token_of_type(
            &candidates,
            "http://terminology.hl7.org/CodeSystem/v2-0203|MR|99999"
        ));
    }

    #[test]
    fn number_comparators() {
        let candidates = vec![json!(185.0)];
        assert!(match_number(&candidates, "185", Comparator::Eq));
        assert!(match_number(&candidates, "185", Comparator::Ge));
        assert!(!match_number(&candidates, "185", Comparator::Gt));
        assert!(match_number(&candidates, "200", Comparator::Lt));
    }

    #[test]
    fn date_granularity_prefix_compare() {
        let candidates = vec![json!("2023-05-15T14:30:00Z")];
        assert!(match_date(&candidates, "2023", Comparator::Eq));
        assert!(match_date(&candidates, "2023-05", Comparator::Eq));
        assert!(!match_date(&candidates, "2023-06", Comparator::Eq));
        assert!(match_date(&candidates, "2023-01-01", Comparator::Ge));
        assert!(!match_date(&candidates, "2024", Comparator::Ge));
        assert!(match_date(&candidates, "2024", Comparator::Lt));
    }

    #[test]
    fn quantity_value_only() {
        let lb = json!({"value": 185.0, "system": "http://unitsofmeasure.org", "code": "[lb_av]"});
        let units = json!({"value": 820.0, "code": "265201"});
        let candidates = vec![lb, units];
        // No unit requested: value-only comparison applies to both.
        assert!(match_quantity(&candidates, "185", Comparator::Ge));
        assert!(match_quantity(&candidates, "820", Comparator::Eq));
    }

    #[test]
    fn quantity_unit_synonyms_no_conversion() {
        let lb = vec![json!({
            "value": 185.0,
            "system": "http://unitsofmeasure.org",
            "code": "[lb_av]",
            "unit": "lbs"
        })];
        // Synonym accepted.
        assert!(match_quantity(&lb, "185|http://unitsofmeasure.org|lbs", Comparator::Eq));
        assert!(match_quantity(&lb, "185||[lb_av]", Comparator::Eq));
        // Strictly greater fails on the same value.
        assert!(!match_quantity(
            &lb,
            "185|http://unitsofmeasure.org|[lb_av]",
            Comparator::Gt
        ));
        // Incompatible unit: no match, no conversion.
        assert!(!match_quantity(&lb, "84||kg", Comparator::Eq));
        assert!(!match_quantity(&lb, "1||kg", Comparator::Ge));
    }

    #[test]
    fn reference_forms() {
        let candidates = vec![json!({"reference": "Patient/p-1"})];
        assert!(match_reference(&candidates, "Patient/p-1", None));
        assert!(match_reference(&candidates, "p-1", None));
        assert!(match_reference(&candidates, "p-1", Some("Patient")));
        assert!(!match_reference(&candidates, "p-1", Some("Group")));
        assert!(!match_reference(&candidates, "Patient/p-2", None));
    }

    #[test]
    fn uri_is_exact() {
        let candidates = vec![json!("http://example.org/profiles/vitals")];
        assert!(match_uri(&candidates, "http://example.org/profiles/vitals"));
        assert!(!match_uri(&candidates, "http://example.org/profiles"));
    }
}
