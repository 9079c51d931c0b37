//! The store facade: routes every interaction through the uniform
//! pipeline of known-type check, pre-hooks, primitive operation, trigger
//! evaluation and post-hooks, and assembles the response contract.

use crate::capability;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreFailure};
use crate::hooks::{ChainOutcome, HookRegistry, HookTiming, InteractionHook, run_chain};
use crate::loader::LoadPhase;
use crate::operations::{FhirOperation, OperationLevel, OperationRegistry};
use crate::type_store::{Mutation, TypeStore};
use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use http::StatusCode;
use lumen_core::{
    EventBroadcaster, Interaction, MutationKind, OperationOutcome, ReferenceResolver,
    RequestContext, ResourceEnvelope, ResponseContext,
};
use lumen_search::{
    CompiledParamCache, IncludeDirective, IncludeKind, ParamDefinitions, ParsedSearchParameter,
    ResultSet, SearchContext, SearchError, SearchParamType, SearchParameterDefinition,
    parse_query, resource_matches,
};
use lumen_subscriptions::{
    ParsedSubscription, ParsedTopic, QueryMatcher, SubscriptionManager,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Assembles a store from explicit registrations, then freezes the type
/// registry and hook list.
pub struct StoreBuilder {
    config: StoreConfig,
    hooks: HookRegistry,
    operations: Vec<Arc<dyn FhirOperation>>,
    parameters: Vec<(String, SearchParameterDefinition)>,
}

impl StoreBuilder {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            hooks: HookRegistry::new(),
            operations: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn hook(mut self, hook: Arc<dyn InteractionHook>) -> Self {
        self.hooks.register(hook);
        self
    }

    pub fn operation(mut self, operation: Arc<dyn FhirOperation>) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn search_parameter(
        mut self,
        resource_type: impl Into<String>,
        definition: SearchParameterDefinition,
    ) -> Self {
        self.parameters.push((resource_type.into(), definition));
        self
    }

    pub fn build(self) -> Result<Arc<Store>, StoreError> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let broadcaster = EventBroadcaster::new_shared();
        let types = DashMap::new();
        for name in &config.supported_types {
            types.insert(
                name.clone(),
                Arc::new(TypeStore::new(name.clone(), config.clone())),
            );
        }
        let operations = OperationRegistry::new();
        for operation in self.operations {
            operations.register(operation);
        }
        let store = Arc::new(Store {
            config,
            types,
            param_cache: Arc::new(CompiledParamCache::new()),
            subscriptions: Arc::new(SubscriptionManager::new(broadcaster.clone())),
            hooks: self.hooks,
            operations,
            capability: ArcSwapOption::empty(),
            capability_generation: AtomicU64::new(0),
            broadcaster,
            load_phase: RwLock::new(LoadPhase::None),
        });
        for (resource_type, definition) in self.parameters {
            store.install_search_parameter(&resource_type, definition)?;
        }
        Ok(store)
    }
}

pub struct Store {
    config: Arc<StoreConfig>,
    types: DashMap<String, Arc<TypeStore>>,
    param_cache: Arc<CompiledParamCache>,
    subscriptions: Arc<SubscriptionManager>,
    hooks: HookRegistry,
    operations: OperationRegistry,
    capability: ArcSwapOption<Value>,
    /// Bumped on every invalidation so a concurrent regeneration cannot
    /// publish a document built from pre-invalidation registries.
    capability_generation: AtomicU64,
    broadcaster: Arc<EventBroadcaster>,
    load_phase: RwLock<LoadPhase>,
}

impl Store {
    pub fn builder(config: StoreConfig) -> StoreBuilder {
        StoreBuilder::new(config)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn type_store(&self, resource_type: &str) -> Option<Arc<TypeStore>> {
        self.types.get(resource_type).map(|t| t.value().clone())
    }

    pub fn type_stores(&self) -> Vec<Arc<TypeStore>> {
        let mut stores: Vec<Arc<TypeStore>> = Vec::with_capacity(self.types.len());
        // Stable order from the configuration, not the map.
        for name in &self.config.supported_types {
            if let Some(store) = self.type_store(name) {
                stores.push(store);
            }
        }
        stores
    }

    /// Installs an executable search parameter and invalidates the caches
    /// that depend on it.
    pub fn install_search_parameter(
        &self,
        resource_type: &str,
        definition: SearchParameterDefinition,
    ) -> Result<(), StoreError> {
        let store = self
            .type_store(resource_type)
            .ok_or_else(|| StoreError::UnsupportedType(resource_type.to_string()))?;
        self.param_cache.invalidate(Some(resource_type));
        store.set_executable_search_parameter(definition);
        self.invalidate_capability();
        Ok(())
    }

    pub fn remove_search_parameter(&self, resource_type: &str, code: &str) -> bool {
        let Some(store) = self.type_store(resource_type) else {
            return false;
        };
        let removed = store.remove_executable_search_parameter(code);
        if removed {
            self.param_cache.invalidate(Some(resource_type));
            self.invalidate_capability();
        }
        removed
    }

    pub fn register_operation(&self, operation: Arc<dyn FhirOperation>) {
        self.operations.register(operation);
        self.invalidate_capability();
    }

    fn invalidate_capability(&self) {
        self.capability_generation.fetch_add(1, Ordering::AcqRel);
        self.capability.store(None);
    }

    pub fn load_phase(&self) -> LoadPhase {
        *self.load_phase.read().expect("phase lock poisoned")
    }

    pub(crate) fn set_load_phase(&self, phase: LoadPhase) {
        *self.load_phase.write().expect("phase lock poisoned") = phase;
        if phase == LoadPhase::Process {
            self.subscriptions.retry_pending();
        }
    }

    /// Routes one request through the pipeline.
    pub async fn dispatch(&self, mut ctx: RequestContext) -> ResponseContext {
        if let Some(resource_type) = &ctx.resource_type
            && !self.types.contains_key(resource_type)
        {
            return ResponseContext::not_found(format!(
                "resource type {resource_type} is not supported"
            ));
        }

        let before = self.hooks.matching(
            HookTiming::Before,
            ctx.resource_type.as_deref(),
            ctx.interaction,
        );
        let mut hook_errors = Vec::new();
        match run_chain(&before, &ctx, ctx.body.clone()).await {
            ChainOutcome::ShortCircuit(response) => return response,
            ChainOutcome::Continue { resource, errors } => {
                ctx.body = resource;
                hook_errors.extend(errors);
            }
        }

        let mut response = self.execute(&ctx).await;

        let after = self.hooks.matching(
            HookTiming::After,
            ctx.resource_type.as_deref(),
            ctx.interaction,
        );
        match run_chain(&after, &ctx, response.resource.clone()).await {
            ChainOutcome::ShortCircuit(replacement) => response = replacement,
            ChainOutcome::Continue { resource, errors } => {
                if resource.is_some() {
                    response.resource = resource;
                }
                hook_errors.extend(errors);
            }
        }

        if !hook_errors.is_empty() {
            let mut outcome = OperationOutcome::new();
            for error in hook_errors {
                outcome.add_issue(
                    lumen_core::IssueSeverity::Warning,
                    lumen_core::IssueType::Processing,
                    error,
                );
            }
            response.append_outcome(outcome);
        }
        response
    }

    async fn execute(&self, ctx: &RequestContext) -> ResponseContext {
        match ctx.interaction {
            Interaction::InstanceCreate => self.instance_create(ctx),
            Interaction::InstanceRead => self.instance_read(ctx),
            Interaction::InstanceUpdate => self.instance_update(ctx),
            Interaction::InstanceUpdateConditional => self.instance_update_conditional(ctx),
            Interaction::InstanceDelete => self.instance_delete(ctx),
            Interaction::TypeSearch => self.type_search(ctx),
            Interaction::TypeDeleteConditional => self.delete_conditional(ctx, false),
            Interaction::SystemSearch => self.system_search(ctx),
            Interaction::SystemDeleteConditional => self.delete_conditional(ctx, true),
            Interaction::TypeOperation
            | Interaction::InstanceOperation
            | Interaction::SystemOperation => self.run_operation(ctx).await,
            Interaction::SystemBundle => self.system_bundle(ctx).await,
            Interaction::SystemCapabilities => self.capabilities(),
        }
    }

    fn instance_create(&self, ctx: &RequestContext) -> ResponseContext {
        let (store, resource) = match self.body_for(ctx) {
            Ok(pair) => pair,
            Err(response) => return *response,
        };

        if let Some(query) = &ctx.if_none_exist {
            match self.find_matches(store.resource_type(), query) {
                Ok(matches) if matches.is_empty() => {}
                Ok(mut matches) if matches.len() == 1 => {
                    // Idempotent conditional create: the match is the result.
                    return ResponseContext::ok(matches.remove(0), &self.config.base_url);
                }
                Ok(matches) => {
                    return ResponseContext::precondition_failed(format!(
                        "{} resources match the conditional create criteria",
                        matches.len()
                    ));
                }
                Err(e) => return ResponseContext::bad_request(e.to_string()),
            }
        }

        match store.create(resource, false) {
            Ok(mutation) => self.mutation_response(&store, mutation),
            Err(failure) => failure_response(failure),
        }
    }

    fn instance_read(&self, ctx: &RequestContext) -> ResponseContext {
        let Some((store, id)) = self.target_for(ctx) else {
            return ResponseContext::bad_request("read requires a resource type and id");
        };
        let Some(resource) = store.read(&id) else {
            return ResponseContext::not_found(format!(
                "{}/{id} does not exist",
                store.resource_type()
            ));
        };
        if let Some(expected) = &ctx.if_match
            && *expected != resource.etag()
        {
            return ResponseContext::precondition_failed(format!(
                "version mismatch: expected {expected}, found {}",
                resource.etag()
            ));
        }
        if let Some(tag) = &ctx.if_none_match {
            if tag == "*" {
                return ResponseContext::precondition_failed(format!(
                    "{} already exists",
                    resource.reference()
                ));
            }
            if *tag == resource.etag() {
                return ResponseContext::not_modified();
            }
        }
        if let Some(since) = &ctx.if_modified_since
            && resource.meta.last_updated <= *since
        {
            return ResponseContext::not_modified();
        }
        ResponseContext::ok(resource, &self.config.base_url)
    }

    fn instance_update(&self, ctx: &RequestContext) -> ResponseContext {
        let (store, mut resource) = match self.body_for(ctx) {
            Ok(pair) => pair,
            Err(response) => return *response,
        };
        match (&ctx.id, resource.id.as_str()) {
            (Some(id), "") => resource.id = id.clone(),
            (Some(id), body_id) if body_id != id => {
                return ResponseContext::bad_request(format!(
                    "body id {body_id} does not match request id {id}"
                ));
            }
            (None, "") => return ResponseContext::bad_request("update requires an id"),
            _ => {}
        }
        match store.update(
            resource,
            true,
            ctx.if_match.as_deref(),
            ctx.if_none_match.as_deref(),
        ) {
            Ok(mutation) => self.mutation_response(&store, mutation),
            Err(failure) => failure_response(failure),
        }
    }

    fn instance_update_conditional(&self, ctx: &RequestContext) -> ResponseContext {
        let (store, mut resource) = match self.body_for(ctx) {
            Ok(pair) => pair,
            Err(response) => return *response,
        };
        let Some(query) = &ctx.query else {
            return ResponseContext::bad_request("conditional update requires criteria");
        };
        let matches = match self.find_matches(store.resource_type(), query) {
            Ok(matches) => matches,
            Err(e) => return ResponseContext::bad_request(e.to_string()),
        };
        match matches.len() {
            0 => {
                let result = if resource.id.is_empty() {
                    store.create(resource, false)
                } else {
                    store.update(resource, true, None, ctx.if_none_match.as_deref())
                };
                match result {
                    Ok(mutation) => self.mutation_response(&store, mutation),
                    Err(failure) => failure_response(failure),
                }
            }
            1 => {
                let target = &matches[0];
                if !resource.id.is_empty() && resource.id != target.id {
                    return ResponseContext::precondition_failed(format!(
                        "body id {} conflicts with matched resource {}",
                        resource.id, target.id
                    ));
                }
                resource.id = target.id.clone();
                match store.update(resource, false, ctx.if_match.as_deref(), None) {
                    Ok(mutation) => self.mutation_response(&store, mutation),
                    Err(failure) => failure_response(failure),
                }
            }
            n => ResponseContext::precondition_failed(format!(
                "{n} resources match the conditional update criteria"
            )),
        }
    }

    fn instance_delete(&self, ctx: &RequestContext) -> ResponseContext {
        let Some((store, id)) = self.target_for(ctx) else {
            return ResponseContext::bad_request("delete requires a resource type and id");
        };
        self.delete_one(&store, &id)
    }

    fn delete_one(&self, store: &Arc<TypeStore>, id: &str) -> ResponseContext {
        match store.delete(id) {
            Ok(Some(mutation)) => {
                self.after_mutation(store.resource_type(), &mutation);
                let mut response = ResponseContext::with_status(StatusCode::OK);
                response.append_outcome(OperationOutcome::info(format!(
                    "deleted {}/{id}",
                    store.resource_type()
                )));
                response
            }
            Ok(None) => ResponseContext::not_found(format!(
                "{}/{id} does not exist",
                store.resource_type()
            )),
            Err(failure) => failure_response(failure),
        }
    }

    fn type_search(&self, ctx: &RequestContext) -> ResponseContext {
        let Some(resource_type) = ctx.resource_type.as_deref() else {
            return ResponseContext::bad_request("type search requires a resource type");
        };
        let query = ctx.query.as_deref().unwrap_or("");
        let params = match parse_query(query) {
            Ok(params) => params,
            Err(e) => return ResponseContext::bad_request(e.to_string()),
        };
        let mut results = ResultSet::new();
        match self.match_type(resource_type, &params) {
            Ok(matches) => {
                for resource in matches {
                    results.push_match(resource);
                }
            }
            Err(e) => return ResponseContext::bad_request(e.to_string()),
        }
        if let Err(e) = self.process_includes(resource_type, &params, &mut results) {
            return ResponseContext::bad_request(e.to_string());
        }
        self.search_response(results)
    }

    fn system_search(&self, ctx: &RequestContext) -> ResponseContext {
        let query = ctx.query.as_deref().unwrap_or("");
        let params = match parse_query(query) {
            Ok(params) => params,
            Err(e) => return ResponseContext::bad_request(e.to_string()),
        };
        let mut results = ResultSet::new();
        for store in self.type_stores() {
            // Types that do not know a requested parameter simply
            // contribute nothing to a system-level search.
            match self.match_type(store.resource_type(), &params) {
                Ok(matches) => {
                    for resource in matches {
                        results.push_match(resource);
                    }
                }
                Err(SearchError::UnknownParameter(_)) => continue,
                Err(e) => return ResponseContext::bad_request(e.to_string()),
            }
        }
        self.search_response(results)
    }

    fn delete_conditional(&self, ctx: &RequestContext, system_wide: bool) -> ResponseContext {
        let Some(query) = ctx.query.as_deref() else {
            return ResponseContext::bad_request("conditional delete requires criteria");
        };
        let stores: Vec<Arc<TypeStore>> = if system_wide {
            self.type_stores()
        } else {
            match ctx.resource_type.as_deref().and_then(|rt| self.type_store(rt)) {
                Some(store) => vec![store],
                None => {
                    return ResponseContext::bad_request(
                        "conditional delete requires a resource type",
                    );
                }
            }
        };

        let mut matched: Vec<(Arc<TypeStore>, String)> = Vec::new();
        for store in stores {
            match self.find_matches(store.resource_type(), query) {
                Ok(matches) => {
                    matched.extend(matches.into_iter().map(|r| (store.clone(), r.id)));
                }
                Err(SearchError::UnknownParameter(_)) if system_wide => continue,
                Err(e) => return ResponseContext::bad_request(e.to_string()),
            }
        }
        match matched.len() {
            0 => ResponseContext::not_found("no resources match the deletion criteria"),
            1 => {
                let (store, id) = &matched[0];
                self.delete_one(store, id)
            }
            n => ResponseContext::precondition_failed(format!(
                "{n} resources match the deletion criteria"
            )),
        }
    }

    async fn run_operation(&self, ctx: &RequestContext) -> ResponseContext {
        let Some(raw_name) = ctx.operation_name.as_deref() else {
            return ResponseContext::bad_request("operation requires a name");
        };
        let name = if raw_name.starts_with('$') {
            raw_name.to_string()
        } else {
            format!("${raw_name}")
        };
        let level = match ctx.interaction {
            Interaction::SystemOperation => OperationLevel::System,
            Interaction::TypeOperation => OperationLevel::Type,
            _ => OperationLevel::Instance,
        };
        let Some(operation) = self
            .operations
            .lookup(&name, level, ctx.resource_type.as_deref())
        else {
            return ResponseContext::not_found(format!("operation {name} is not supported here"));
        };

        let focus = if level == OperationLevel::Instance {
            let Some((store, id)) = self.target_for(ctx) else {
                return ResponseContext::bad_request("instance operation requires an id");
            };
            match store.read(&id) {
                Some(resource) => Some(resource),
                None => {
                    return ResponseContext::not_found(format!(
                        "{}/{id} does not exist",
                        store.resource_type()
                    ));
                }
            }
        } else {
            None
        };

        match operation.execute(ctx, focus).await {
            Ok(response) => response,
            Err(e) => {
                warn!(operation = %name, error = %e, "operation failed");
                ResponseContext::internal_error(e.to_string())
            }
        }
    }

    async fn system_bundle(&self, ctx: &RequestContext) -> ResponseContext {
        let Some(bundle) = &ctx.body else {
            return ResponseContext::bad_request("bundle interaction requires a body");
        };
        if bundle.resource_type != "Bundle" {
            return ResponseContext::bad_request("bundle interaction requires a Bundle body");
        }
        let bundle_type = bundle
            .get_field("type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        match bundle_type {
            "batch" => {}
            "transaction" => {
                return ResponseContext::unprocessable(
                    "transaction bundles are not supported; submit a batch bundle",
                );
            }
            other => {
                return ResponseContext::bad_request(format!(
                    "unsupported bundle type: {other:?}"
                ));
            }
        }

        let entries = match bundle.get_field("entry") {
            Some(Value::Array(entries)) => entries.clone(),
            _ => Vec::new(),
        };
        let mut out = Vec::with_capacity(entries.len());
        for entry in &entries {
            let response = match entry_request(entry) {
                Ok(entry_ctx) => Box::pin(self.dispatch(entry_ctx)).await,
                Err(message) => ResponseContext::bad_request(message),
            };
            out.push(entry_response(response));
        }
        let body = json!({
            "resourceType": "Bundle",
            "type": "batch-response",
            "entry": out,
        });
        ResponseContext {
            status: Some(StatusCode::OK),
            bundle: Some(body),
            ..Default::default()
        }
    }

    fn capabilities(&self) -> ResponseContext {
        let document = match self.capability.load_full() {
            Some(cached) => cached,
            None => {
                let generation = self.capability_generation.load(Ordering::Acquire);
                let generated = Arc::new(capability::generate(
                    &self.config,
                    &self.type_stores(),
                    &self.operations,
                ));
                // Cache only when no invalidation landed during generation.
                if self.capability_generation.load(Ordering::Acquire) == generation {
                    self.capability.store(Some(generated.clone()));
                }
                generated
            }
        };
        ResponseContext {
            status: Some(StatusCode::OK),
            bundle: Some((*document).clone()),
            ..Default::default()
        }
    }

    /// Runs trigger evaluation and registry maintenance for one applied
    /// mutation, then publishes the change on the event bus.
    fn after_mutation(&self, resource_type: &str, mutation: &Mutation) {
        let kind = match (&mutation.stored, mutation.created) {
            (Some(_), true) => MutationKind::Create,
            (Some(_), false) => MutationKind::Update,
            (None, _) => MutationKind::Delete,
        };
        self.maintain_registries(resource_type, kind, mutation);
        self.subscriptions.evaluate_change(
            resource_type,
            kind,
            mutation.previous.as_ref(),
            mutation.stored.as_ref(),
            self,
        );
        let id = mutation
            .stored
            .as_ref()
            .or(mutation.previous.as_ref())
            .map(|r| r.id.clone())
            .unwrap_or_default();
        self.broadcaster.send_change(
            resource_type,
            id,
            kind,
            mutation.stored.as_ref().map(ResourceEnvelope::as_json),
        );
    }

    pub(crate) fn maintain_registries_for_load(
        &self,
        resource_type: &str,
        kind: MutationKind,
        mutation: &Mutation,
    ) {
        self.maintain_registries(resource_type, kind, mutation);
    }

    /// Storing a SearchParameter, SubscriptionTopic or Subscription
    /// resource installs the executable form in the matching registry;
    /// deleting it removes that form.
    fn maintain_registries(&self, resource_type: &str, kind: MutationKind, mutation: &Mutation) {
        match resource_type {
            "SearchParameter" => match kind {
                MutationKind::Delete => {
                    if let Some(previous) = &mutation.previous {
                        for (base, definition) in parameter_definitions(previous) {
                            self.remove_search_parameter(&base, &definition.code);
                        }
                    }
                }
                _ => {
                    if let Some(stored) = &mutation.stored {
                        for (base, definition) in parameter_definitions(stored) {
                            if let Err(e) = self.install_search_parameter(&base, definition) {
                                warn!(error = %e, "search parameter not installed");
                            }
                        }
                    }
                }
            },
            "SubscriptionTopic" => match kind {
                MutationKind::Delete => {
                    if let Some(url) = mutation
                        .previous
                        .as_ref()
                        .and_then(|p| p.get_field("url"))
                        .and_then(Value::as_str)
                    {
                        self.subscriptions.remove_topic(url);
                    }
                }
                _ => {
                    if let Some(stored) = &mutation.stored {
                        match ParsedTopic::from_resource(stored) {
                            Ok(topic) => {
                                if let Err(e) = self.subscriptions.register_topic(topic) {
                                    warn!(error = %e, "topic not registered");
                                }
                            }
                            Err(e) => warn!(error = %e, "invalid subscription topic"),
                        }
                    }
                }
            },
            "Subscription" => match kind {
                MutationKind::Delete => {
                    if let Some(previous) = &mutation.previous {
                        self.subscriptions.remove_subscription(&previous.id);
                    }
                }
                _ => {
                    if let Some(stored) = &mutation.stored {
                        match ParsedSubscription::from_resource(stored) {
                            Ok(parsed) => {
                                let loading = self.load_phase() == LoadPhase::Read;
                                if let Err(e) =
                                    self.subscriptions.register_subscription(parsed, loading)
                                {
                                    warn!(subscription = %stored.id, error = %e,
                                        "subscription not activated");
                                }
                            }
                            Err(e) => warn!(error = %e, "invalid subscription"),
                        }
                    }
                }
            },
            _ => {}
        }
    }

    fn mutation_response(&self, store: &Arc<TypeStore>, mutation: Mutation) -> ResponseContext {
        self.after_mutation(store.resource_type(), &mutation);
        let Some(stored) = mutation.stored else {
            return ResponseContext::internal_error("mutation produced no resource");
        };
        if mutation.created {
            ResponseContext::created(stored, &self.config.base_url)
        } else {
            ResponseContext::ok(stored, &self.config.base_url)
        }
    }

    fn body_for(
        &self,
        ctx: &RequestContext,
    ) -> Result<(Arc<TypeStore>, ResourceEnvelope), Box<ResponseContext>> {
        let Some(resource) = ctx.body.clone() else {
            return Err(Box::new(ResponseContext::bad_request(
                "interaction requires a resource body",
            )));
        };
        let Some(resource_type) = ctx.resource_type.as_deref() else {
            return Err(Box::new(ResponseContext::bad_request(
                "interaction requires a resource type",
            )));
        };
        if resource.resource_type != resource_type {
            return Err(Box::new(ResponseContext::bad_request(format!(
                "body is a {} but the request targets {resource_type}",
                resource.resource_type
            ))));
        }
        let Some(store) = self.type_store(resource_type) else {
            return Err(Box::new(ResponseContext::not_found(format!(
                "resource type {resource_type} is not supported"
            ))));
        };
        Ok((store, resource))
    }

    fn target_for(&self, ctx: &RequestContext) -> Option<(Arc<TypeStore>, String)> {
        let store = self.type_store(ctx.resource_type.as_deref()?)?;
        let id = ctx.id.clone()?;
        Some((store, id))
    }

    fn find_matches(
        &self,
        resource_type: &str,
        query: &str,
    ) -> Result<Vec<ResourceEnvelope>, SearchError> {
        let params = parse_query(query)?;
        self.match_type(resource_type, &params)
    }

    fn match_type(
        &self,
        resource_type: &str,
        params: &[ParsedSearchParameter],
    ) -> Result<Vec<ResourceEnvelope>, SearchError> {
        let Some(store) = self.type_store(resource_type) else {
            return Ok(Vec::new());
        };
        let ctx = SearchContext::new(resource_type, self, &self.param_cache)
            .with_resolver(self);
        let mut matches = Vec::new();
        for resource in store.snapshot() {
            if resource_matches(&ctx, &resource, params)? {
                matches.push(resource);
            }
        }
        Ok(matches)
    }

    fn process_includes(
        &self,
        resource_type: &str,
        params: &[ParsedSearchParameter],
        results: &mut ResultSet,
    ) -> Result<(), SearchError> {
        let mut directives = Vec::new();
        for param in params {
            let kind = match param.name.as_str() {
                "_include" => IncludeKind::Forward,
                "_revinclude" => IncludeKind::Reverse,
                _ => continue,
            };
            for value in &param.values {
                directives.push(IncludeDirective::parse(kind, &value.raw)?);
            }
        }
        if directives.is_empty() {
            return Ok(());
        }

        let matches: Vec<ResourceEnvelope> = results.matches().cloned().collect();
        for directive in &directives {
            match directive.kind {
                IncludeKind::Forward => {
                    if directive.source_type != resource_type {
                        continue;
                    }
                    self.include_forward(directive, &matches, results)?;
                }
                IncludeKind::Reverse => {
                    self.include_reverse(directive, &matches, results)?;
                }
            }
        }
        Ok(())
    }

    /// `_include`: resolve the reference parameter of each match and pull
    /// in its targets.
    fn include_forward(
        &self,
        directive: &IncludeDirective,
        matches: &[ResourceEnvelope],
        results: &mut ResultSet,
    ) -> Result<(), SearchError> {
        let definition = self
            .lookup(&directive.source_type, &directive.param)
            .ok_or_else(|| {
                SearchError::UnknownParameter(format!(
                    "{}.{}",
                    directive.source_type, directive.param
                ))
            })?;
        let expression = self.param_cache.get_or_compile(
            &directive.source_type,
            &definition.code,
            &definition.expression,
        )?;
        for source in matches {
            let eval = lumen_core::path::EvalContext::new().with_resolver(self as &dyn ReferenceResolver);
            for value in expression.evaluate(&source.as_json(), &eval) {
                let Some(reference) = crate::store::reference_string(&value) else {
                    continue;
                };
                let Some(target) = self.resolve(&reference) else {
                    continue;
                };
                if let Some(want) = &directive.target_type
                    && target.resource_type != *want
                {
                    continue;
                }
                results.push_include(target);
            }
        }
        Ok(())
    }

    /// `_revinclude`: search the directive's source type for resources
    /// whose reference parameter points at one of the matches.
    fn include_reverse(
        &self,
        directive: &IncludeDirective,
        matches: &[ResourceEnvelope],
        results: &mut ResultSet,
    ) -> Result<(), SearchError> {
        let Some(source_store) = self.type_store(&directive.source_type) else {
            return Ok(());
        };
        let definition = self
            .lookup(&directive.source_type, &directive.param)
            .ok_or_else(|| {
                SearchError::UnknownParameter(format!(
                    "{}.{}",
                    directive.source_type, directive.param
                ))
            })?;
        let expression = self.param_cache.get_or_compile(
            &directive.source_type,
            &definition.code,
            &definition.expression,
        )?;
        let focus_refs: Vec<String> = matches.iter().map(ResourceEnvelope::reference).collect();
        for candidate in source_store.snapshot() {
            let eval = lumen_core::path::EvalContext::new().with_resolver(self as &dyn ReferenceResolver);
            let points_back = expression
                .evaluate(&candidate.as_json(), &eval)
                .iter()
                .filter_map(crate::store::reference_string)
                .any(|r| focus_refs.iter().any(|f| r == *f || r.ends_with(&format!("/{f}"))));
            if points_back {
                results.push_include(candidate);
            }
        }
        Ok(())
    }

    fn search_response(&self, results: ResultSet) -> ResponseContext {
        let base = self.config.base_url.trim_end_matches('/');
        let entries: Vec<Value> = results
            .entries()
            .map(|entry| {
                let mode = match entry.mode {
                    lumen_search::EntryMode::Match => "match",
                    lumen_search::EntryMode::Include => "include",
                };
                json!({
                    "fullUrl": format!("{base}/{}", entry.resource.reference()),
                    "resource": entry.resource.as_json(),
                    "search": {"mode": mode},
                })
            })
            .collect();
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": results.match_count(),
            "entry": entries,
        });
        ResponseContext {
            status: Some(StatusCode::OK),
            bundle: Some(bundle),
            ..Default::default()
        }
    }
}

impl ParamDefinitions for Store {
    fn lookup(&self, resource_type: &str, code: &str) -> Option<Arc<SearchParameterDefinition>> {
        self.type_store(resource_type)?.search_parameter(code)
    }
}

impl ReferenceResolver for Store {
    fn resolve(&self, reference: &str) -> Option<ResourceEnvelope> {
        let (resource_type, id) = reference.rsplit_once('/').map(|(head, id)| {
            // Absolute URLs keep only the trailing Type/id segments.
            let resource_type = head.rsplit('/').next().unwrap_or(head);
            (resource_type, id)
        })?;
        self.type_store(resource_type)?.read(id)
    }
}

impl QueryMatcher for Store {
    fn matches(
        &self,
        resource_type: &str,
        resource: &ResourceEnvelope,
        params: &[ParsedSearchParameter],
    ) -> Result<bool, SearchError> {
        let ctx = SearchContext::new(resource_type, self, &self.param_cache)
            .with_resolver(self);
        resource_matches(&ctx, resource, params)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("types", &self.types.len())
            .field("subscriptions", &self.subscriptions.subscription_count())
            .finish()
    }
}

pub(crate) fn reference_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("reference").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

fn failure_response(failure: StoreFailure) -> ResponseContext {
    ResponseContext::error(failure.status, failure.outcome)
}

/// Extracts executable definitions from a stored SearchParameter resource,
/// one per base type.
fn parameter_definitions(
    resource: &ResourceEnvelope,
) -> Vec<(String, SearchParameterDefinition)> {
    let Some(code) = resource.get_field("code").and_then(Value::as_str) else {
        return Vec::new();
    };
    let Some(param_type) = resource
        .get_field("type")
        .and_then(Value::as_str)
        .and_then(SearchParamType::parse)
    else {
        return Vec::new();
    };
    let Some(expression) = resource.get_field("expression").and_then(Value::as_str) else {
        return Vec::new();
    };
    let targets: Vec<String> = match resource.get_field("target") {
        Some(Value::Array(targets)) => targets
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    };
    let bases: Vec<String> = match resource.get_field("base") {
        Some(Value::Array(bases)) => bases
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        Some(Value::String(base)) => vec![base.clone()],
        _ => Vec::new(),
    };
    bases
        .into_iter()
        .map(|base| {
            let definition =
                SearchParameterDefinition::new(code, param_type, expression)
                    .with_targets(targets.clone());
            (base, definition)
        })
        .collect()
}

fn entry_request(entry: &Value) -> Result<RequestContext, String> {
    let request = entry
        .get("request")
        .ok_or_else(|| "bundle entry without request".to_string())?;
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| "bundle entry without request.method".to_string())?;
    let url = request
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| "bundle entry without request.url".to_string())?;

    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (url, None),
    };
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let body = entry
        .get("resource")
        .cloned()
        .map(ResourceEnvelope::from_json)
        .transpose()
        .map_err(|e| e.to_string())?;

    let ctx = match (method, segments.as_slice()) {
        ("POST", [resource_type]) => {
            let mut ctx =
                RequestContext::new(Interaction::InstanceCreate).with_type(*resource_type);
            ctx.body = body;
            ctx.query = query;
            ctx
        }
        ("GET", [resource_type]) => {
            let mut ctx = RequestContext::new(Interaction::TypeSearch).with_type(*resource_type);
            ctx.query = query;
            ctx
        }
        ("GET", [resource_type, id]) => RequestContext::new(Interaction::InstanceRead)
            .with_type(*resource_type)
            .with_id(*id),
        ("PUT", [resource_type, id]) => {
            let mut ctx = RequestContext::new(Interaction::InstanceUpdate)
                .with_type(*resource_type)
                .with_id(*id);
            ctx.body = body;
            ctx
        }
        ("DELETE", [resource_type, id]) => RequestContext::new(Interaction::InstanceDelete)
            .with_type(*resource_type)
            .with_id(*id),
        ("DELETE", [resource_type]) if query.is_some() => {
            let mut ctx = RequestContext::new(Interaction::TypeDeleteConditional)
                .with_type(*resource_type);
            ctx.query = query;
            ctx
        }
        _ => return Err(format!("unsupported bundle request: {method} {url}")),
    };
    Ok(ctx)
}

fn entry_response(response: ResponseContext) -> Value {
    let status = response
        .status
        .map(|s| s.as_u16().to_string())
        .unwrap_or_else(|| "500".to_string());
    let mut entry = json!({"response": {"status": status.as_str()}});
    if let Some(etag) = &response.etag {
        entry["response"]["etag"] = json!(etag);
    }
    if let Some(location) = &response.location {
        entry["response"]["location"] = json!(location);
    }
    if let Some(outcome) = &response.outcome {
        entry["response"]["outcome"] = outcome.to_resource_json();
    }
    if let Some(resource) = &response.resource {
        entry["resource"] = resource.as_json();
    } else if let Some(bundle) = &response.bundle {
        entry["resource"] = bundle.clone();
    }
    debug!(status = %status, "bundle entry processed");
    entry
}
