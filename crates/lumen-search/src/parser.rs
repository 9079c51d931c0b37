use crate::error::SearchError;
use crate::parameters::{Comparator, SearchModifier};
use url::form_urlencoded;

/// Result-control parameters the matcher ignores; they shape output, not
/// the match set.
const IGNORED_PARAMS: &[&str] = &[
    "_count",
    "_offset",
    "_sort",
    "_format",
    "_total",
    "_summary",
    "_elements",
    "_contained",
    "_pretty",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedValue {
    pub comparator: Comparator,
    pub raw: String,
}

/// One query parameter occurrence: `name[:modifier]=v1,v2,...`.
/// Comma-separated values are OR'd; repeated occurrences of the same name
/// are AND'd by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSearchParameter {
    pub name: String,
    pub modifier: Option<SearchModifier>,
    pub values: Vec<ParsedValue>,
}

impl ParsedSearchParameter {
    /// True for result-control parameters and include directives.
    pub fn is_result_control(&self) -> bool {
        IGNORED_PARAMS.contains(&self.name.as_str())
            || self.name == "_include"
            || self.name == "_revinclude"
    }
}

/// Parse an application/x-www-form-urlencoded query string.
/// Example: `status=final&value-quantity=ge185&subject:Patient=p-1`.
pub fn parse_query(query: &str) -> Result<Vec<ParsedSearchParameter>, SearchError> {
    let mut params = Vec::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key.is_empty() {
            return Err(SearchError::invalid_value("query", "empty parameter name"));
        }
        let (name, modifier) = split_name_and_modifier(&key);
        let mut values = Vec::new();
        for raw in value.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let (comparator, remainder) = extract_comparator(raw);
            values.push(ParsedValue {
                comparator,
                raw: remainder.to_string(),
            });
        }
        if values.is_empty() {
            return Err(SearchError::invalid_value(name, "parameter has no value"));
        }
        params.push(ParsedSearchParameter {
            name,
            modifier,
            values,
        });
    }
    Ok(params)
}

fn split_name_and_modifier(key: &str) -> (String, Option<SearchModifier>) {
    // Chained parameters carry the modifier on the reference segment,
    // e.g. `subject:Patient.name` - keep the chain intact in the name and
    // let the engine split it.
    if key.contains('.') {
        return (key.to_string(), None);
    }
    match key.split_once(':') {
        Some((name, modifier)) => match SearchModifier::parse(modifier) {
            Some(modifier) => (name.to_string(), Some(modifier)),
            None => (key.to_string(), None),
        },
        None => (key.to_string(), None),
    }
}

/// Strip a leading two-letter comparator when the remainder looks like a
/// number or date; `never` stays a bare string value.
fn extract_comparator(value: &str) -> (Comparator, &str) {
    if value.len() > 2
        && let Some(comparator) = Comparator::parse(&value[..2])
    {
        let rest = &value[2..];
        if rest
            .chars()
            .next()
            .map(|c| c.is_ascii_digit() || c == '-')
            .unwrap_or(false)
        {
            return (comparator, rest);
        }
    }
    (Comparator::Eq, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_parameters() {
        let params = parse_query("status=final&gender=female").unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "status");
        assert_eq!(params[0].values[0].raw, "final");
        assert_eq!(params[0].values[0].comparator, Comparator::Eq);
    }

    #[test]
    fn comma_values_are_or_alternatives() {
        let params = parse_query("status=final,amended").unwrap();
        assert_eq!(params[0].values.len(), 2);
        assert_eq!(params[0].values[1].raw, "amended");
    }

    #[test]
    fn repeated_names_stay_separate() {
        let params = parse_query("date=ge2023-01-01&date=le2023-12-31").unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].values[0].comparator, Comparator::Ge);
        assert_eq!(params[1].values[0].comparator, Comparator::Le);
    }

    #[test]
    fn modifiers_split_from_name() {
        let params = parse_query("name:exact=Doe&code:not=xyz&subject:Patient=p-1").unwrap();
        assert_eq!(params[0].modifier, Some(SearchModifier::Exact));
        assert_eq!(params[1].modifier, Some(SearchModifier::Not));
        assert_eq!(
            params[2].modifier,
            Some(SearchModifier::Type("Patient".into()))
        );
    }

    #[test]
    fn comparator_only_stripped_before_digits() {
        let params = parse_query("value-quantity=ge185&name=never&balance=le-5").unwrap();
        assert_eq!(params[0].values[0].comparator, Comparator::Ge);
        assert_eq!(params[0].values[0].raw, "185");
        assert_eq!(params[1].values[0].comparator, Comparator::Eq);
        assert_eq!(params[1].values[0].raw, "never");
        assert_eq!(params[2].values[0].comparator, Comparator::Le);
        assert_eq!(params[2].values[0].raw, "-5");
    }

    #[test]
    fn quantity_value_with_unit_segments() {
        let params = parse_query("value-quantity=gt185|http://unitsofmeasure.org|%5Blb_av%5D").unwrap();
        assert_eq!(params[0].values[0].comparator, Comparator::Gt);
        assert_eq!(params[0].values[0].raw, "185|http://unitsofmeasure.org|[lb_av]");
    }

    #[test]
    fn chained_names_kept_whole() {
        let params = parse_query("subject.name=Jane&subject:Patient.name=Jane").unwrap();
        assert_eq!(params[0].name, "subject.name");
        assert_eq!(params[0].modifier, None);
        assert_eq!(params[1].name, "subject:Patient.name");
    }

    #[test]
    fn result_control_detection() {
        let params = parse_query("_count=10&_include=Observation:subject&status=final").unwrap();
        assert!(params[0].is_result_control());
        assert!(params[1].is_result_control());
        assert!(!params[2].is_result_control());
    }

    #[test]
    fn missing_modifier() {
        let params = parse_query("_profile:missing=true").unwrap();
        assert_eq!(params[0].name, "_profile");
        assert_eq!(params[0].modifier, Some(SearchModifier::Missing));
        assert_eq!(params[0].values[0].raw, "true");
    }
}
