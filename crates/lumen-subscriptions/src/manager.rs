//! Registration and evaluation entry point: owns the compiled topics, the
//! live subscriptions and the pending queue used during bulk loads.

use crate::error::SubscriptionError;
use crate::subscription::{ParsedSubscription, SubscriptionState, SubscriptionStatus};
use crate::topic::ParsedTopic;
use crate::trigger::{CompiledTopic, QueryMatcher};
use dashmap::DashMap;
use lumen_core::{EventBroadcaster, MutationKind, ResourceEnvelope, SubscriptionNotice};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub struct SubscriptionManager {
    topics: DashMap<String, Arc<CompiledTopic>>,
    subscriptions: DashMap<String, Arc<SubscriptionState>>,
    /// Subscriptions whose topic was unknown at registration during a bulk
    /// load; retried exactly once when the load enters its process phase.
    pending: Mutex<Vec<ParsedSubscription>>,
    broadcaster: Arc<EventBroadcaster>,
}

impl SubscriptionManager {
    pub fn new(broadcaster: Arc<EventBroadcaster>) -> Self {
        Self {
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            pending: Mutex::new(Vec::new()),
            broadcaster,
        }
    }

    pub fn register_topic(&self, parsed: ParsedTopic) -> Result<(), SubscriptionError> {
        let compiled = CompiledTopic::compile(parsed);
        for error in compiled.compile_errors() {
            warn!(topic = compiled.url(), %error, "topic trigger failed to compile");
        }
        debug!(topic = compiled.url(), "registered subscription topic");
        self.topics
            .insert(compiled.url().to_string(), Arc::new(compiled));
        Ok(())
    }

    pub fn remove_topic(&self, url: &str) {
        self.topics.remove(url);
    }

    pub fn topic(&self, url: &str) -> Option<Arc<CompiledTopic>> {
        self.topics.get(url).map(|t| t.value().clone())
    }

    /// Registers a subscription. With a known topic that has at least one
    /// compiled trigger the subscription activates immediately; with an
    /// unknown topic during a bulk load it queues for one retry, and
    /// otherwise the registration fails.
    pub fn register_subscription(
        &self,
        parsed: ParsedSubscription,
        loading: bool,
    ) -> Result<SubscriptionStatus, SubscriptionError> {
        match self.try_activate(&parsed) {
            Ok(status) => Ok(status),
            Err(SubscriptionError::UnknownTopic(url)) if loading => {
                debug!(subscription = %parsed.id, topic = %url, "topic not yet loaded, queued");
                let state = Arc::new(SubscriptionState::new(
                    parsed.clone(),
                    SubscriptionStatus::Requested,
                ));
                self.subscriptions.insert(parsed.id.clone(), state);
                self.pending
                    .lock()
                    .expect("pending lock poisoned")
                    .push(parsed);
                Ok(SubscriptionStatus::Requested)
            }
            Err(e) => Err(e),
        }
    }

    fn try_activate(
        &self,
        parsed: &ParsedSubscription,
    ) -> Result<SubscriptionStatus, SubscriptionError> {
        let topic = self
            .topics
            .get(&parsed.topic_url)
            .map(|t| t.value().clone())
            .ok_or_else(|| SubscriptionError::UnknownTopic(parsed.topic_url.clone()))?;
        if !topic.has_triggers() {
            return Err(SubscriptionError::invalid_topic(format!(
                "topic {} has no usable triggers",
                parsed.topic_url
            )));
        }
        let state = Arc::new(SubscriptionState::new(
            parsed.clone(),
            SubscriptionStatus::Active,
        ));
        debug!(subscription = %parsed.id, topic = %parsed.topic_url, "subscription active");
        self.subscriptions.insert(parsed.id.clone(), state);
        Ok(SubscriptionStatus::Active)
    }

    /// One-shot retry of every queued subscription. Failures flip the
    /// subscription to `error`; the queue is drained either way.
    pub fn retry_pending(&self) {
        let pending: Vec<ParsedSubscription> = {
            let mut queue = self.pending.lock().expect("pending lock poisoned");
            std::mem::take(&mut *queue)
        };
        for parsed in pending {
            if let Err(e) = self.try_activate(&parsed) {
                warn!(subscription = %parsed.id, error = %e, "deferred activation failed");
                if let Some(state) = self.subscriptions.get(&parsed.id) {
                    state.record_error(e.to_string());
                    state.set_status(SubscriptionStatus::Error);
                }
            }
        }
    }

    pub fn subscription(&self, id: &str) -> Option<Arc<SubscriptionState>> {
        self.subscriptions.get(id).map(|s| s.value().clone())
    }

    pub fn remove_subscription(&self, id: &str) -> Option<Arc<SubscriptionState>> {
        self.subscriptions.remove(id).map(|(_, state)| state)
    }

    pub fn deactivate_subscription(&self, id: &str) {
        if let Some(state) = self.subscriptions.get(id) {
            state.set_status(SubscriptionStatus::Off);
        }
    }

    /// Evaluates one applied mutation against every active subscription.
    /// Each firing allocates the subscription's next event number, buffers
    /// the notice and raises a send signal on the event bus. Evaluation
    /// errors land on the subscription's error list and never propagate
    /// to the mutating request.
    pub fn evaluate_change(
        &self,
        resource_type: &str,
        kind: MutationKind,
        previous: Option<&ResourceEnvelope>,
        current: Option<&ResourceEnvelope>,
        matcher: &dyn QueryMatcher,
    ) -> usize {
        let mut fired = 0;
        for entry in self.subscriptions.iter() {
            let state = entry.value();
            if state.status() != SubscriptionStatus::Active {
                continue;
            }
            let Some(topic) = self.topic(&state.parsed.topic_url) else {
                continue;
            };
            match self.evaluate_for(state, &topic, resource_type, kind, previous, current, matcher)
            {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(subscription = %state.parsed.id, error = %e, "trigger evaluation failed");
                    state.record_error(e.to_string());
                }
            }
        }
        fired
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_for(
        &self,
        state: &Arc<SubscriptionState>,
        topic: &CompiledTopic,
        resource_type: &str,
        kind: MutationKind,
        previous: Option<&ResourceEnvelope>,
        current: Option<&ResourceEnvelope>,
        matcher: &dyn QueryMatcher,
    ) -> Result<bool, SubscriptionError> {
        let mut matched = false;
        for trigger in topic.triggers_for(resource_type) {
            if !trigger.applies_to(kind) {
                continue;
            }
            if trigger.fires(kind, previous, current, matcher)? {
                matched = true;
                break;
            }
        }
        if !matched {
            return Ok(false);
        }

        // The subscription's own filters AND with the topic trigger.
        let filters = state.parsed.filters_for(resource_type);
        if !filters.is_empty() {
            let focus = current.or(previous);
            let Some(focus) = focus else {
                return Ok(false);
            };
            if !matcher.matches(resource_type, focus, filters)? {
                return Ok(false);
            }
        }

        let focus_reference = current.or(previous).map(ResourceEnvelope::reference);
        let notice = SubscriptionNotice {
            subscription_id: state.parsed.id.clone(),
            topic_url: state.parsed.topic_url.clone(),
            event_number: state.next_event_number(),
            focus: focus_reference,
        };
        state.record_event(notice.clone());
        self.broadcaster.send_notice(notice);
        Ok(true)
    }

    /// Flips expired subscriptions to `off`, returning how many changed.
    pub fn sweep_expired(&self) -> usize {
        let mut swept = 0;
        for entry in self.subscriptions.iter() {
            let state = entry.value();
            if state.status() == SubscriptionStatus::Active && state.is_expired() {
                state.set_status(SubscriptionStatus::Off);
                debug!(subscription = %state.parsed.id, "subscription expired");
                swept += 1;
            }
        }
        swept
    }

    /// Caps every subscription's buffered events at `max`, dropping the
    /// oldest. Returns the total pruned.
    pub fn prune_event_buffers(&self, max: usize) -> usize {
        let mut pruned = 0;
        for entry in self.subscriptions.iter() {
            let state = entry.value();
            let count = state.event_count();
            if count > max as u64 {
                pruned += state.prune_events_before(count - max as u64 + 1);
            }
        }
        pruned
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}
