//! Bulk loading. The load runs in two phases: `Read` consumes the source
//! and stores everything it can parse, deferring subscriptions whose topic
//! has not arrived yet; `Process` retries each deferred subscription
//! exactly once before the store returns to normal operation.

use crate::store::Store;
use crate::type_store::Mutation;
use lumen_core::{BulkSource, ResourceParser};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPhase {
    #[default]
    None,
    Read,
    Process,
}

/// Outcome of one bulk load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub failed: Vec<String>,
}

impl Store {
    /// Loads every entry the source yields. Entries that fail to parse or
    /// store are recorded and skipped; the load continues.
    pub fn bulk_load(
        &self,
        source: &mut dyn BulkSource,
        parser: &dyn ResourceParser,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        self.set_load_phase(LoadPhase::Read);

        while let Some((content, mime_type)) = source.next_entry() {
            let resource = match parser.try_parse(&content, &mime_type) {
                Ok(resource) => resource,
                Err(e) => {
                    warn!(error = %e, "skipping unparseable bulk entry");
                    report.failed.push(e.to_string());
                    continue;
                }
            };
            let reference = resource.reference();
            let Some(store) = self.type_store(&resource.resource_type) else {
                report
                    .failed
                    .push(format!("unsupported resource type in {reference}"));
                continue;
            };
            match store.create(resource, true) {
                Ok(mutation) => {
                    self.register_loaded(store.resource_type(), &mutation);
                    report.loaded += 1;
                }
                Err(failure) => {
                    report
                        .failed
                        .push(format!("{reference}: {:?}", failure.status));
                }
            }
        }

        self.set_load_phase(LoadPhase::Process);
        self.set_load_phase(LoadPhase::None);
        info!(
            loaded = report.loaded,
            failed = report.failed.len(),
            "bulk load finished"
        );
        report
    }

    fn register_loaded(&self, resource_type: &str, mutation: &Mutation) {
        // Loading installs registry entries but does not fire triggers;
        // the content predates every subscription in the batch.
        let kind = if mutation.created {
            lumen_core::MutationKind::Create
        } else {
            lumen_core::MutationKind::Update
        };
        self.maintain_registries_for_load(resource_type, kind, mutation);
    }
}
