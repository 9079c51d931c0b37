use crate::outcome::{IssueType, OperationOutcome};
use crate::resource::ResourceEnvelope;
use crate::time::FhirInstant;
use crate::types::Interaction;
use http::StatusCode;

/// Parsed inbound request, produced by the transport layer and consumed by
/// the dispatcher. Immutable per request apart from hook rewrites of the
/// body resource.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub interaction: Interaction,
    pub resource_type: Option<String>,
    pub id: Option<String>,
    /// Raw query string, percent-decoded by the search parser.
    pub query: Option<String>,
    pub body: Option<ResourceEnvelope>,
    pub operation_name: Option<String>,
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_none_exist: Option<String>,
    pub if_modified_since: Option<FhirInstant>,
}

impl RequestContext {
    pub fn new(interaction: Interaction) -> Self {
        Self {
            interaction,
            resource_type: None,
            id: None,
            query: None,
            body: None,
            operation_name: None,
            if_match: None,
            if_none_match: None,
            if_none_exist: None,
            if_modified_since: None,
        }
    }

    pub fn with_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_body(mut self, body: ResourceEnvelope) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_operation(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_if_match(mut self, etag: impl Into<String>) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    pub fn with_if_none_match(mut self, value: impl Into<String>) -> Self {
        self.if_none_match = Some(value.into());
        self
    }

    pub fn with_if_none_exist(mut self, query: impl Into<String>) -> Self {
        self.if_none_exist = Some(query.into());
        self
    }

    pub fn with_if_modified_since(mut self, instant: FhirInstant) -> Self {
        self.if_modified_since = Some(instant);
        self
    }
}

/// Uniform response contract assembled by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct ResponseContext {
    pub status: Option<StatusCode>,
    pub resource: Option<ResourceEnvelope>,
    pub outcome: Option<OperationOutcome>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub location: Option<String>,
    /// Bundle body for search/batch responses.
    pub bundle: Option<serde_json::Value>,
}

impl ResponseContext {
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Success response carrying a resource, decorated with version headers.
    pub fn ok(resource: ResourceEnvelope, base_url: &str) -> Self {
        Self::with_resource(StatusCode::OK, resource, base_url)
    }

    pub fn created(resource: ResourceEnvelope, base_url: &str) -> Self {
        Self::with_resource(StatusCode::CREATED, resource, base_url)
    }

    pub fn with_resource(status: StatusCode, resource: ResourceEnvelope, base_url: &str) -> Self {
        let etag = resource.etag();
        let last_modified = resource.meta.last_updated.http_date();
        let location = format!(
            "{}/{}/{}",
            base_url.trim_end_matches('/'),
            resource.resource_type,
            resource.id
        );
        Self {
            status: Some(status),
            etag: Some(etag),
            last_modified: Some(last_modified),
            location: Some(location),
            resource: Some(resource),
            outcome: None,
            bundle: None,
        }
    }

    pub fn not_modified() -> Self {
        Self::with_status(StatusCode::NOT_MODIFIED)
    }

    pub fn error(status: StatusCode, outcome: OperationOutcome) -> Self {
        Self {
            status: Some(status),
            outcome: Some(outcome),
            ..Default::default()
        }
    }

    pub fn not_found(diagnostics: impl Into<String>) -> Self {
        Self::error(
            StatusCode::NOT_FOUND,
            OperationOutcome::error(IssueType::NotFound, diagnostics),
        )
    }

    pub fn precondition_failed(diagnostics: impl Into<String>) -> Self {
        Self::error(
            StatusCode::PRECONDITION_FAILED,
            OperationOutcome::error(IssueType::Conflict, diagnostics),
        )
    }

    pub fn bad_request(diagnostics: impl Into<String>) -> Self {
        Self::error(
            StatusCode::BAD_REQUEST,
            OperationOutcome::error(IssueType::Invalid, diagnostics),
        )
    }

    pub fn unprocessable(diagnostics: impl Into<String>) -> Self {
        Self::error(
            StatusCode::UNPROCESSABLE_ENTITY,
            OperationOutcome::error(IssueType::NotSupported, diagnostics),
        )
    }

    pub fn not_implemented(diagnostics: impl Into<String>) -> Self {
        Self::error(
            StatusCode::NOT_IMPLEMENTED,
            OperationOutcome::error(IssueType::NotSupported, diagnostics),
        )
    }

    pub fn internal_error(diagnostics: impl Into<String>) -> Self {
        Self::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            OperationOutcome::error(IssueType::Exception, diagnostics),
        )
    }

    /// Merge additional issues into the response outcome, keeping existing ones.
    pub fn append_outcome(&mut self, other: OperationOutcome) {
        match &mut self.outcome {
            Some(existing) => existing.append(other),
            None => self.outcome = Some(other),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.map(|s| s.is_success()).unwrap_or(false)
    }
}
