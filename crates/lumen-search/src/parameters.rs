use serde::{Deserialize, Serialize};
use std::fmt;

/// Search parameter value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    Number,
    Date,
    String,
    Token,
    Reference,
    Quantity,
    Uri,
}

impl SearchParamType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "number" => Some(Self::Number),
            "date" => Some(Self::Date),
            "string" => Some(Self::String),
            "token" => Some(Self::Token),
            "reference" => Some(Self::Reference),
            "quantity" => Some(Self::Quantity),
            "uri" => Some(Self::Uri),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Date => "date",
            Self::String => "string",
            Self::Token => "token",
            Self::Reference => "reference",
            Self::Quantity => "quantity",
            Self::Uri => "uri",
        }
    }
}

/// Modifiers applied as a suffix to the parameter name, `name:modifier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchModifier {
    Not,
    Contains,
    Exact,
    Missing,
    OfType,
    /// Reference type qualification, e.g. `subject:Patient`.
    Type(String),
}

impl SearchModifier {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not" => Some(Self::Not),
            "contains" => Some(Self::Contains),
            "exact" => Some(Self::Exact),
            "missing" => Some(Self::Missing),
            "of-type" => Some(Self::OfType),
            other if lumen_core::is_valid_resource_type_name(other) => {
                Some(Self::Type(other.to_string()))
            }
            _ => None,
        }
    }
}

/// Comparator prefixes on number/date/quantity values, e.g. `ge2020-01-01`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    #[default]
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Comparator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "lt" => Some(Self::Lt),
            "ge" => Some(Self::Ge),
            "le" => Some(Self::Le),
            _ => None,
        }
    }

    /// Apply to an ordering of candidate versus requested value.
    pub fn test(&self, ordering: std::cmp::Ordering) -> bool {
        match self {
            Comparator::Eq => ordering.is_eq(),
            Comparator::Ne => !ordering.is_eq(),
            Comparator::Gt => ordering.is_gt(),
            Comparator::Lt => ordering.is_lt(),
            Comparator::Ge => ordering.is_ge(),
            Comparator::Le => ordering.is_le(),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparator::Eq => "eq",
            Comparator::Ne => "ne",
            Comparator::Gt => "gt",
            Comparator::Lt => "lt",
            Comparator::Ge => "ge",
            Comparator::Le => "le",
        };
        f.write_str(s)
    }
}

/// An executable search parameter definition installed on a per-type store:
/// the query code, the value type, and the extraction expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParameterDefinition {
    /// The code used in queries (e.g. "status", "value-quantity").
    pub code: String,
    #[serde(rename = "type")]
    pub param_type: SearchParamType,
    /// Path expression extracting candidate values from a resource.
    pub expression: String,
    /// Target resource types, for reference parameters.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub targets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SearchParameterDefinition {
    pub fn new(
        code: impl Into<String>,
        param_type: SearchParamType,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            param_type,
            expression: expression.into(),
            targets: Vec::new(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
