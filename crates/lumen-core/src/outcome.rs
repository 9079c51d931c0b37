use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Issue severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Information,
    Warning,
    Error,
    Fatal,
}

/// Issue codes surfaced by the store, a practical subset of the FHIR
/// issue-type vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    Invalid,
    Structure,
    NotFound,
    Conflict,
    Duplicate,
    MultipleMatches,
    NotSupported,
    Processing,
    Exception,
    Informational,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeIssue {
    pub severity: IssueSeverity,
    pub code: IssueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

/// Aggregated outcome returned alongside every response.
///
/// When both a primitive operation and a hook report problems the issues are
/// appended, never replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    #[serde(rename = "issue", default)]
    pub issues: Vec<OutcomeIssue>,
}

impl OperationOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self {
            issues: vec![OutcomeIssue {
                severity: IssueSeverity::Error,
                code,
                diagnostics: Some(diagnostics.into()),
            }],
        }
    }

    pub fn info(diagnostics: impl Into<String>) -> Self {
        Self {
            issues: vec![OutcomeIssue {
                severity: IssueSeverity::Information,
                code: IssueType::Informational,
                diagnostics: Some(diagnostics.into()),
            }],
        }
    }

    pub fn add_issue(
        &mut self,
        severity: IssueSeverity,
        code: IssueType,
        diagnostics: impl Into<String>,
    ) {
        self.issues.push(OutcomeIssue {
            severity,
            code,
            diagnostics: Some(diagnostics.into()),
        });
    }

    /// Append all issues from another outcome.
    pub fn append(&mut self, other: OperationOutcome) {
        self.issues.extend(other.issues);
    }

    pub fn has_errors(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity >= IssueSeverity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Render as an `OperationOutcome` resource body.
    pub fn to_resource_json(&self) -> Value {
        json!({
            "resourceType": "OperationOutcome",
            "issue": serde_json::to_value(&self.issues).unwrap_or(Value::Null),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_keeps_both_sets_of_issues() {
        let mut outcome = OperationOutcome::error(IssueType::NotFound, "no such resource");
        outcome.append(OperationOutcome::info("post-hook note"));
        assert_eq!(outcome.issues.len(), 2);
        assert!(outcome.has_errors());
    }

    #[test]
    fn info_only_outcome_has_no_errors() {
        let outcome = OperationOutcome::info("created");
        assert!(!outcome.has_errors());
        assert!(!outcome.is_empty());
    }

    #[test]
    fn renders_as_resource() {
        let outcome = OperationOutcome::error(IssueType::Conflict, "version mismatch");
        let value = outcome.to_resource_json();
        assert_eq!(value["resourceType"], "OperationOutcome");
        assert_eq!(value["issue"][0]["code"], "conflict");
        assert_eq!(value["issue"][0]["severity"], "error");
    }
}
