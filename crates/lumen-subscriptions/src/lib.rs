//! Subscription topics, compiled triggers and numbered notification events.
//!
//! Topics declare which resource mutations are interesting; subscriptions
//! register against a topic with their own filters. Every mutation is
//! evaluated against the compiled triggers, and each firing appends a
//! strictly increasing, gap-free numbered event to the subscription.

pub mod error;
pub mod manager;
pub mod subscription;
pub mod topic;
pub mod trigger;

pub use error::SubscriptionError;
pub use manager::SubscriptionManager;
pub use subscription::{ParsedSubscription, SubscriptionState, SubscriptionStatus};
pub use topic::{ParsedTopic, ResourceTrigger};
pub use trigger::{CompiledTopic, CompiledTrigger, QueryMatcher, TriggerCriteria};
