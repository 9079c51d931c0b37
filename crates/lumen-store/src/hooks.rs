//! Pre/post interaction hooks. Hooks are registered explicitly at startup
//! and run in registration order; a pre-hook may rewrite the inbound
//! resource or answer the request outright.

use async_trait::async_trait;
use lumen_core::{Interaction, RequestContext, ResourceEnvelope, ResponseContext};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookTiming {
    Before,
    After,
}

/// What a hook decided about the request.
pub enum HookOutcome {
    Continue,
    /// Replace the inbound resource and continue.
    Replace(ResourceEnvelope),
    /// Answer the request without touching the store.
    ShortCircuit(ResponseContext),
}

#[async_trait]
pub trait InteractionHook: Send + Sync {
    fn name(&self) -> &str;

    /// Resource types this hook observes; empty means every type.
    fn resource_types(&self) -> &[String] {
        &[]
    }

    /// Interactions this hook observes; empty means every interaction.
    fn interactions(&self) -> &[Interaction] {
        &[]
    }

    fn timing(&self) -> HookTiming;

    async fn handle(
        &self,
        ctx: &RequestContext,
        resource: Option<&ResourceEnvelope>,
    ) -> anyhow::Result<HookOutcome>;
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn InteractionHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn InteractionHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn matching(
        &self,
        timing: HookTiming,
        resource_type: Option<&str>,
        interaction: Interaction,
    ) -> Vec<Arc<dyn InteractionHook>> {
        self.hooks
            .iter()
            .filter(|hook| hook.timing() == timing)
            .filter(|hook| {
                let types = hook.resource_types();
                types.is_empty()
                    || resource_type
                        .map(|rt| types.iter().any(|t| t == rt))
                        .unwrap_or(false)
            })
            .filter(|hook| {
                let kinds = hook.interactions();
                kinds.is_empty() || kinds.contains(&interaction)
            })
            .cloned()
            .collect()
    }
}

/// Result of running one hook chain.
pub enum ChainOutcome {
    Continue {
        resource: Option<ResourceEnvelope>,
        /// Messages from hooks that failed; surfaced on the response outcome.
        errors: Vec<String>,
    },
    ShortCircuit(ResponseContext),
}

/// Runs each matching hook in order. A failing hook is logged and its
/// message collected; the chain continues.
pub async fn run_chain(
    hooks: &[Arc<dyn InteractionHook>],
    ctx: &RequestContext,
    mut resource: Option<ResourceEnvelope>,
) -> ChainOutcome {
    let mut errors = Vec::new();
    for hook in hooks {
        match hook.handle(ctx, resource.as_ref()).await {
            Ok(HookOutcome::Continue) => {}
            Ok(HookOutcome::Replace(replacement)) => resource = Some(replacement),
            Ok(HookOutcome::ShortCircuit(response)) => {
                return ChainOutcome::ShortCircuit(response);
            }
            Err(e) => {
                warn!(hook = hook.name(), error = %e, "interaction hook failed");
                errors.push(format!("hook {} failed: {e}", hook.name()));
            }
        }
    }
    ChainOutcome::Continue { resource, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use serde_json::json;

    struct Tagger;

    #[async_trait]
    impl InteractionHook for Tagger {
        fn name(&self) -> &str {
            "tagger"
        }

        fn timing(&self) -> HookTiming {
            HookTiming::Before
        }

        async fn handle(
            &self,
            _ctx: &RequestContext,
            resource: Option<&ResourceEnvelope>,
        ) -> anyhow::Result<HookOutcome> {
            let Some(resource) = resource else {
                return Ok(HookOutcome::Continue);
            };
            let mut tagged = resource.clone();
            tagged.set_field("language", json!("en"));
            Ok(HookOutcome::Replace(tagged))
        }
    }

    struct Refuser;

    #[async_trait]
    impl InteractionHook for Refuser {
        fn name(&self) -> &str {
            "refuser"
        }

        fn interactions(&self) -> &[Interaction] {
            const KINDS: &[Interaction] = &[Interaction::InstanceDelete];
            KINDS
        }

        fn timing(&self) -> HookTiming {
            HookTiming::Before
        }

        async fn handle(
            &self,
            _ctx: &RequestContext,
            _resource: Option<&ResourceEnvelope>,
        ) -> anyhow::Result<HookOutcome> {
            Ok(HookOutcome::ShortCircuit(ResponseContext::with_status(
                StatusCode::FORBIDDEN,
            )))
        }
    }

    struct Failing;

    #[async_trait]
    impl InteractionHook for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn timing(&self) -> HookTiming {
            HookTiming::After
        }

        async fn handle(
            &self,
            _ctx: &RequestContext,
            _resource: Option<&ResourceEnvelope>,
        ) -> anyhow::Result<HookOutcome> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn replace_flows_through_the_chain() {
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(Tagger));
        let ctx = RequestContext::new(Interaction::InstanceCreate).with_type("Patient");
        let hooks = registry.matching(HookTiming::Before, Some("Patient"), ctx.interaction);
        let resource =
            ResourceEnvelope::from_json(json!({"resourceType": "Patient", "id": "p-1"})).unwrap();

        match run_chain(&hooks, &ctx, Some(resource)).await {
            ChainOutcome::Continue { resource, errors } => {
                assert!(errors.is_empty());
                assert_eq!(
                    resource.unwrap().get_field("language"),
                    Some(&json!("en"))
                );
            }
            ChainOutcome::ShortCircuit(_) => panic!("unexpected short circuit"),
        }
    }

    #[tokio::test]
    async fn interaction_filter_and_short_circuit() {
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(Refuser));

        assert!(registry
            .matching(HookTiming::Before, Some("Patient"), Interaction::InstanceRead)
            .is_empty());

        let ctx = RequestContext::new(Interaction::InstanceDelete).with_type("Patient");
        let hooks = registry.matching(HookTiming::Before, Some("Patient"), ctx.interaction);
        match run_chain(&hooks, &ctx, None).await {
            ChainOutcome::ShortCircuit(response) => {
                assert_eq!(response.status, Some(StatusCode::FORBIDDEN));
            }
            ChainOutcome::Continue { .. } => panic!("expected short circuit"),
        }
    }

    #[tokio::test]
    async fn hook_errors_collect_without_aborting() {
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(Failing));
        let ctx = RequestContext::new(Interaction::InstanceCreate).with_type("Patient");
        let hooks = registry.matching(HookTiming::After, Some("Patient"), ctx.interaction);
        match run_chain(&hooks, &ctx, None).await {
            ChainOutcome::Continue { errors, .. } => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("boom"));
            }
            ChainOutcome::ShortCircuit(_) => panic!("unexpected short circuit"),
        }
    }
}
