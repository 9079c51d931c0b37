//! `_include` / `_revinclude` directives and the de-duplicated result set
//! a search produces.

use crate::error::SearchError;
use indexmap::IndexMap;
use lumen_core::ResourceEnvelope;

/// Direction of an include directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    /// `_include`: pull in resources the matches point at.
    Forward,
    /// `_revinclude`: pull in resources pointing at the matches.
    Reverse,
}

/// Parsed `Type:param` or `Type:param:Target` include directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    pub kind: IncludeKind,
    pub source_type: String,
    pub param: String,
    pub target_type: Option<String>,
}

impl IncludeDirective {
    pub fn parse(kind: IncludeKind, raw: &str) -> Result<Self, SearchError> {
        let mut parts = raw.splitn(3, ':');
        let source_type = parts.next().unwrap_or_default();
        let param = parts.next().unwrap_or_default();
        if source_type.is_empty() || param.is_empty() {
            return Err(SearchError::invalid_value(
                match kind {
                    IncludeKind::Forward => "_include",
                    IncludeKind::Reverse => "_revinclude",
                },
                format!("expected Type:param, got {raw:?}"),
            ));
        }
        Ok(Self {
            kind,
            source_type: source_type.to_string(),
            param: param.to_string(),
            target_type: parts.next().map(String::from),
        })
    }
}

/// How an entry ended up in the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    Match,
    Include,
}

#[derive(Debug, Clone)]
pub struct ResultEntry {
    pub mode: EntryMode,
    pub resource: ResourceEnvelope,
}

/// Ordered, de-duplicated search results. Matches keep insertion order;
/// a resource added as both match and include stays a match.
#[derive(Debug, Default)]
pub struct ResultSet {
    entries: IndexMap<String, ResultEntry>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_match(&mut self, resource: ResourceEnvelope) {
        let key = resource.reference();
        match self.entries.get_mut(&key) {
            Some(entry) => entry.mode = EntryMode::Match,
            None => {
                self.entries.insert(
                    key,
                    ResultEntry {
                        mode: EntryMode::Match,
                        resource,
                    },
                );
            }
        }
    }

    pub fn push_include(&mut self, resource: ResourceEnvelope) {
        let key = resource.reference();
        self.entries.entry(key).or_insert(ResultEntry {
            mode: EntryMode::Include,
            resource,
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &ResultEntry> {
        self.entries.values()
    }

    pub fn matches(&self) -> impl Iterator<Item = &ResourceEnvelope> {
        self.entries
            .values()
            .filter(|e| e.mode == EntryMode::Match)
            .map(|e| &e.resource)
    }

    pub fn match_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.mode == EntryMode::Match)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(resource_type: &str, id: &str) -> ResourceEnvelope {
        ResourceEnvelope::from_json(json!({"resourceType": resource_type, "id": id})).unwrap()
    }

    #[test]
    fn parse_directive_forms() {
        let d = IncludeDirective::parse(IncludeKind::Forward, "Observation:subject").unwrap();
        assert_eq!(d.source_type, "Observation");
        assert_eq!(d.param, "subject");
        assert_eq!(d.target_type, None);

        let d =
            IncludeDirective::parse(IncludeKind::Reverse, "Observation:subject:Patient").unwrap();
        assert_eq!(d.target_type.as_deref(), Some("Patient"));

        assert!(IncludeDirective::parse(IncludeKind::Forward, "Observation").is_err());
    }

    #[test]
    fn dedupe_and_match_promotion() {
        let mut set = ResultSet::new();
        set.push_include(envelope("Patient", "p-1"));
        set.push_match(envelope("Patient", "p-1"));
        set.push_match(envelope("Patient", "p-2"));
        set.push_include(envelope("Patient", "p-2"));

        assert_eq!(set.len(), 2);
        assert_eq!(set.match_count(), 2);
        let order: Vec<String> = set.matches().map(|r| r.id.clone()).collect();
        assert_eq!(order, vec!["p-1", "p-2"]);
    }
}
