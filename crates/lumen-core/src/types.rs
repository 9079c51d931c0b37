use serde::{Deserialize, Serialize};
use std::fmt;

/// The interaction kinds the dispatcher understands.
///
/// The set mirrors the RESTful resource protocol: instance-level CRUD,
/// type-level search/delete/operation, and the system-level entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interaction {
    InstanceCreate,
    InstanceRead,
    InstanceUpdate,
    InstanceUpdateConditional,
    InstanceDelete,
    TypeSearch,
    TypeDeleteConditional,
    TypeOperation,
    InstanceOperation,
    SystemOperation,
    SystemSearch,
    SystemDeleteConditional,
    SystemBundle,
    SystemCapabilities,
}

impl Interaction {
    /// The mutation this interaction performs on the store, if any.
    pub fn mutation_kind(&self) -> Option<MutationKind> {
        match self {
            Interaction::InstanceCreate => Some(MutationKind::Create),
            Interaction::InstanceUpdate | Interaction::InstanceUpdateConditional => {
                Some(MutationKind::Update)
            }
            Interaction::InstanceDelete
            | Interaction::TypeDeleteConditional
            | Interaction::SystemDeleteConditional => Some(MutationKind::Delete),
            _ => None,
        }
    }

    /// True for interactions addressed to a single resource type.
    pub fn is_type_level(&self) -> bool {
        matches!(
            self,
            Interaction::InstanceCreate
                | Interaction::TypeSearch
                | Interaction::TypeDeleteConditional
                | Interaction::TypeOperation
        )
    }
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Interaction::InstanceCreate => "create",
            Interaction::InstanceRead => "read",
            Interaction::InstanceUpdate => "update",
            Interaction::InstanceUpdateConditional => "update-conditional",
            Interaction::InstanceDelete => "delete",
            Interaction::TypeSearch => "search-type",
            Interaction::TypeDeleteConditional => "delete-conditional-type",
            Interaction::TypeOperation => "operation-type",
            Interaction::InstanceOperation => "operation-instance",
            Interaction::SystemOperation => "operation-system",
            Interaction::SystemSearch => "search-system",
            Interaction::SystemDeleteConditional => "delete-conditional-system",
            Interaction::SystemBundle => "batch",
            Interaction::SystemCapabilities => "capabilities",
        };
        f.write_str(name)
    }
}

/// The three mutation kinds subscription triggers distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// Validate a resource type name: uppercase first letter, ASCII letters only.
pub fn is_valid_resource_type_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .next()
            .map(|c| c.is_ascii_uppercase())
            .unwrap_or(false)
        && name.chars().all(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_kind_mapping() {
        assert_eq!(
            Interaction::InstanceCreate.mutation_kind(),
            Some(MutationKind::Create)
        );
        assert_eq!(
            Interaction::SystemDeleteConditional.mutation_kind(),
            Some(MutationKind::Delete)
        );
        assert_eq!(Interaction::TypeSearch.mutation_kind(), None);
        assert_eq!(Interaction::SystemCapabilities.mutation_kind(), None);
    }

    #[test]
    fn type_name_validation() {
        assert!(is_valid_resource_type_name("Patient"));
        assert!(is_valid_resource_type_name("Encounter"));
        assert!(!is_valid_resource_type_name("patient"));
        assert!(!is_valid_resource_type_name("Patient2"));
        assert!(!is_valid_resource_type_name(""));
    }

    #[test]
    fn display_names() {
        assert_eq!(Interaction::TypeSearch.to_string(), "search-type");
        assert_eq!(Interaction::SystemBundle.to_string(), "batch");
    }
}
