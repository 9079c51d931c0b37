//! Named `$`-operations: an explicit registry populated at startup, keyed
//! by operation name.

use async_trait::async_trait;
use dashmap::DashMap;
use lumen_core::{RequestContext, ResourceEnvelope, ResponseContext};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationLevel {
    System,
    Type,
    Instance,
}

#[async_trait]
pub trait FhirOperation: Send + Sync {
    /// Operation name including the `$` prefix.
    fn name(&self) -> &str;

    fn levels(&self) -> &[OperationLevel];

    /// Resource types the operation applies to; empty means every type.
    fn resource_types(&self) -> &[String] {
        &[]
    }

    /// Executes the operation. `focus` is the instance resource for
    /// instance-level invocations.
    async fn execute(
        &self,
        ctx: &RequestContext,
        focus: Option<ResourceEnvelope>,
    ) -> anyhow::Result<ResponseContext>;
}

#[derive(Default)]
pub struct OperationRegistry {
    operations: DashMap<String, Arc<dyn FhirOperation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, operation: Arc<dyn FhirOperation>) {
        self.operations
            .insert(operation.name().to_string(), operation);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.operations.remove(name).is_some()
    }

    /// Looks up an operation valid at the given level and resource type.
    pub fn lookup(
        &self,
        name: &str,
        level: OperationLevel,
        resource_type: Option<&str>,
    ) -> Option<Arc<dyn FhirOperation>> {
        let operation = self.operations.get(name)?.value().clone();
        if !operation.levels().contains(&level) {
            return None;
        }
        let types = operation.resource_types();
        if !types.is_empty() {
            let rt = resource_type?;
            if !types.iter().any(|t| t == rt) {
                return None;
            }
        }
        Some(operation)
    }

    pub fn names(&self) -> Vec<String> {
        self.operations.iter().map(|o| o.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use lumen_core::Interaction;

    struct Everything {
        types: Vec<String>,
    }

    impl Everything {
        fn new() -> Self {
            Self {
                types: vec!["Patient".to_string()],
            }
        }
    }

    #[async_trait]
    impl FhirOperation for Everything {
        fn name(&self) -> &str {
            "$everything"
        }

        fn levels(&self) -> &[OperationLevel] {
            const LEVELS: &[OperationLevel] = &[OperationLevel::Instance];
            LEVELS
        }

        fn resource_types(&self) -> &[String] {
            &self.types
        }

        async fn execute(
            &self,
            _ctx: &RequestContext,
            focus: Option<ResourceEnvelope>,
        ) -> anyhow::Result<ResponseContext> {
            anyhow::ensure!(focus.is_some(), "instance operation without focus");
            Ok(ResponseContext::with_status(StatusCode::OK))
        }
    }

    #[tokio::test]
    async fn lookup_enforces_level_and_type() {
        let registry = OperationRegistry::new();
        registry.register(Arc::new(Everything::new()));

        assert!(registry
            .lookup("$everything", OperationLevel::Instance, Some("Patient"))
            .is_some());
        assert!(registry
            .lookup("$everything", OperationLevel::System, None)
            .is_none());
        assert!(registry
            .lookup("$everything", OperationLevel::Instance, Some("Encounter"))
            .is_none());
        assert!(registry
            .lookup("$export", OperationLevel::System, None)
            .is_none());

        let operation = registry
            .lookup("$everything", OperationLevel::Instance, Some("Patient"))
            .unwrap();
        let ctx = RequestContext::new(Interaction::InstanceOperation)
            .with_type("Patient")
            .with_id("p-1");
        let focus = ResourceEnvelope::new("p-1", "Patient");
        let response = operation.execute(&ctx, Some(focus)).await.unwrap();
        assert_eq!(response.status, Some(StatusCode::OK));
    }
}
