//! In-memory, multi-tenant-by-type resource store.
//!
//! A [`Store`] owns one versioned collection per supported resource type
//! and routes every interaction through a uniform pipeline: known-type
//! check, pre-hooks, the primitive store operation, subscription trigger
//! evaluation, post-hooks, response assembly. A background sweep enforces
//! capacity ceilings and subscription lifecycles.

pub mod capability;
pub mod config;
pub mod error;
pub mod hooks;
pub mod loader;
pub mod monitor;
pub mod operations;
pub mod store;
pub mod type_store;

pub use config::StoreConfig;
pub use error::{StoreError, StoreFailure, StoreResult};
pub use hooks::{HookOutcome, HookRegistry, HookTiming, InteractionHook};
pub use loader::{LoadPhase, LoadReport};
pub use monitor::{SweepReport, spawn_monitor};
pub use operations::{FhirOperation, OperationLevel, OperationRegistry};
pub use store::{Store, StoreBuilder};
pub use type_store::{Mutation, TypeStore};
