pub mod context;
pub mod error;
pub mod events;
pub mod id;
pub mod outcome;
pub mod path;
pub mod resource;
pub mod time;
pub mod traits;
pub mod types;

pub use context::{RequestContext, ResponseContext};
pub use error::{CoreError, Result};
pub use events::{EventBroadcaster, ResourceChange, StoreEvent, SubscriptionNotice};
pub use id::{generate_id, validate_id};
pub use outcome::{IssueSeverity, IssueType, OperationOutcome, OutcomeIssue};
pub use resource::{ResourceEnvelope, ResourceMeta};
pub use time::{FhirInstant, now_utc};
pub use traits::{BulkSource, JsonParser, ReferenceResolver, ResourceParser, ResourceSerializer};
pub use types::{Interaction, MutationKind, is_valid_resource_type_name};
