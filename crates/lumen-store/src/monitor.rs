//! Background capacity and lifecycle sweep.

use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    pub expired_subscriptions: usize,
    pub pruned_events: usize,
}

impl Store {
    /// One sweep pass: per-type FIFO eviction down to the configured
    /// ceiling (protected ids skipped), expiry of timed-out subscriptions
    /// and pruning of stale buffered notification events.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        if let Some(limit) = self.config().max_resources_per_type {
            for store in self.type_stores() {
                let evicted = store.evict_to(limit);
                if !evicted.is_empty() {
                    debug!(
                        resource_type = store.resource_type(),
                        count = evicted.len(),
                        "evicted over-capacity resources"
                    );
                    report.evicted += evicted.len();
                }
            }
        }
        report.expired_subscriptions = self.subscriptions().sweep_expired();
        if let Some(max) = self.config().max_buffered_events {
            report.pruned_events = self.subscriptions().prune_event_buffers(max);
        }
        report
    }
}

/// Spawns the periodic sweep at the configured cadence. Sweep outcomes
/// are logged; nothing propagates to foreground requests.
pub fn spawn_monitor(store: Arc<Store>) -> JoinHandle<()> {
    let period = Duration::from_secs(store.config().sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick fires immediately; skip it so a fresh store is
        // not swept before it has served anything.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = store.sweep();
            if report != SweepReport::default() {
                info!(
                    evicted = report.evicted,
                    expired = report.expired_subscriptions,
                    pruned = report.pruned_events,
                    "sweep finished"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use lumen_core::{Interaction, RequestContext, ResourceEnvelope};
    use serde_json::json;

    fn patient(id: &str) -> ResourceEnvelope {
        ResourceEnvelope::from_json(json!({"resourceType": "Patient", "id": id})).unwrap()
    }

    #[tokio::test]
    async fn sweep_evicts_fifo_and_respects_protection() {
        let config = StoreConfig {
            max_resources_per_type: Some(2),
            protected_ids: vec!["Patient/seed".to_string()],
            ..Default::default()
        };
        let store = Store::builder(config).build().unwrap();
        for id in ["seed", "p-1", "p-2", "p-3"] {
            let ctx = RequestContext::new(Interaction::InstanceCreate)
                .with_type("Patient")
                .with_body(patient(id));
            assert!(store.dispatch(ctx).await.is_success());
        }

        let report = store.sweep();
        assert_eq!(report.evicted, 2);
        let patients = store.type_store("Patient").unwrap();
        assert!(patients.contains("seed"));
        assert!(patients.contains("p-3"));
        assert!(!patients.contains("p-1"));
        assert!(!patients.contains("p-2"));
    }

    #[tokio::test]
    async fn idle_sweep_reports_nothing() {
        let store = Store::builder(StoreConfig::default()).build().unwrap();
        assert_eq!(store.sweep(), SweepReport::default());
    }
}
