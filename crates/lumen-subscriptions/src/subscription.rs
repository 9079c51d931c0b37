//! Parsed subscriptions and their runtime state: lifecycle status, filter
//! predicates, the numbered event buffer and the error list.

use crate::error::SubscriptionError;
use lumen_core::time::{FhirInstant, now_utc};
use lumen_core::{ResourceEnvelope, SubscriptionNotice};
use lumen_search::{ParsedSearchParameter, parse_query};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle: `off -> requested -> active -> (error | off)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Off,
    Requested,
    Active,
    Error,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Requested => "requested",
            Self::Active => "active",
            Self::Error => "error",
        }
    }
}

/// A `Subscription` resource reduced to what registration needs.
#[derive(Debug, Clone)]
pub struct ParsedSubscription {
    pub id: String,
    pub topic_url: String,
    pub channel_type: Option<String>,
    pub endpoint: Option<String>,
    pub content_type: Option<String>,
    pub content_level: Option<String>,
    pub end: Option<FhirInstant>,
    /// Additional filter predicates, keyed by resource type, ANDed with
    /// the topic's trigger on evaluation.
    pub filters: HashMap<String, Vec<ParsedSearchParameter>>,
}

impl ParsedSubscription {
    pub fn from_resource(resource: &ResourceEnvelope) -> Result<Self, SubscriptionError> {
        if resource.resource_type != "Subscription" {
            return Err(SubscriptionError::invalid_subscription(format!(
                "expected Subscription, got {}",
                resource.resource_type
            )));
        }
        let topic_url = resource
            .get_field("topic")
            .and_then(Value::as_str)
            .ok_or_else(|| SubscriptionError::invalid_subscription("missing topic url"))?
            .to_string();

        let mut filters: HashMap<String, Vec<ParsedSearchParameter>> = HashMap::new();
        if let Some(Value::Array(filter_by)) = resource.get_field("filterBy") {
            for filter in filter_by {
                let resource_type = filter
                    .get("resourceType")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let Some(param) = filter.get("filterParameter").and_then(Value::as_str) else {
                    return Err(SubscriptionError::invalid_subscription(
                        "filterBy without filterParameter",
                    ));
                };
                let value = filter.get("value").and_then(Value::as_str).unwrap_or("");
                let comparator = filter
                    .get("comparator")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let modifier = filter
                    .get("modifier")
                    .and_then(Value::as_str)
                    .map(|m| format!(":{m}"))
                    .unwrap_or_default();
                let query = format!("{param}{modifier}={comparator}{value}");
                let parsed = parse_query(&query)?;
                filters.entry(resource_type).or_default().extend(parsed);
            }
        }

        let end = resource
            .get_field("end")
            .and_then(Value::as_str)
            .map(str::parse)
            .transpose()
            .map_err(|_| SubscriptionError::invalid_subscription("invalid end instant"))?;

        Ok(Self {
            id: resource.id.clone(),
            topic_url,
            channel_type: channel_code(resource),
            endpoint: string_field(resource, "endpoint"),
            content_type: string_field(resource, "contentType"),
            content_level: string_field(resource, "content"),
            end,
            filters,
        })
    }

    pub fn filters_for(&self, resource_type: &str) -> &[ParsedSearchParameter] {
        self.filters
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn string_field(resource: &ResourceEnvelope, name: &str) -> Option<String> {
    resource
        .get_field(name)
        .and_then(Value::as_str)
        .map(String::from)
}

fn channel_code(resource: &ResourceEnvelope) -> Option<String> {
    resource
        .get_field("channelType")
        .and_then(|c| c.get("code"))
        .and_then(Value::as_str)
        .map(String::from)
}

/// Runtime state of one registered subscription. Event numbers come from
/// a single atomic counter, so two concurrent triggers never collide and
/// the sequence stays gap-free.
#[derive(Debug)]
pub struct SubscriptionState {
    pub parsed: ParsedSubscription,
    status: RwLock<SubscriptionStatus>,
    event_count: AtomicU64,
    events: RwLock<Vec<SubscriptionNotice>>,
    errors: RwLock<Vec<String>>,
}

impl SubscriptionState {
    pub fn new(parsed: ParsedSubscription, status: SubscriptionStatus) -> Self {
        Self {
            parsed,
            status: RwLock::new(status),
            event_count: AtomicU64::new(0),
            events: RwLock::new(Vec::new()),
            errors: RwLock::new(Vec::new()),
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        *self.status.read().expect("status lock poisoned")
    }

    pub fn set_status(&self, status: SubscriptionStatus) {
        *self.status.write().expect("status lock poisoned") = status;
    }

    /// The next event number, allocated exactly once per call.
    pub fn next_event_number(&self) -> u64 {
        self.event_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// High-water mark of allocated event numbers.
    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }

    pub fn record_event(&self, notice: SubscriptionNotice) {
        self.events.write().expect("event lock poisoned").push(notice);
    }

    pub fn events(&self) -> Vec<SubscriptionNotice> {
        self.events.read().expect("event lock poisoned").clone()
    }

    /// Drops buffered events older than the cutoff, returning how many
    /// were pruned.
    pub fn prune_events_before(&self, event_number: u64) -> usize {
        let mut events = self.events.write().expect("event lock poisoned");
        let before = events.len();
        events.retain(|e| e.event_number >= event_number);
        before - events.len()
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.errors
            .write()
            .expect("error lock poisoned")
            .push(message.into());
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.read().expect("error lock poisoned").clone()
    }

    pub fn is_expired(&self) -> bool {
        self.parsed.end.map(|end| end <= now_utc()).unwrap_or(false)
    }
}
