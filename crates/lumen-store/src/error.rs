use http::StatusCode;
use lumen_core::{IssueType, OperationOutcome};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unsupported resource type: {0}")]
    UnsupportedType(String),

    #[error("Invalid store configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Core(#[from] lumen_core::CoreError),

    #[error(transparent)]
    Search(#[from] lumen_search::SearchError),

    #[error(transparent)]
    Subscription(#[from] lumen_subscriptions::SubscriptionError),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl StoreError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// A primitive store operation that could not complete, already shaped as
/// a status and outcome for the response contract.
#[derive(Debug, Clone)]
pub struct StoreFailure {
    pub status: StatusCode,
    pub outcome: OperationOutcome,
}

impl StoreFailure {
    pub fn new(status: StatusCode, issue: IssueType, diagnostics: impl Into<String>) -> Self {
        Self {
            status,
            outcome: OperationOutcome::error(issue, diagnostics),
        }
    }

    pub fn not_found(diagnostics: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, IssueType::NotFound, diagnostics)
    }

    pub fn conflict(diagnostics: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, IssueType::Duplicate, diagnostics)
    }

    pub fn precondition_failed(diagnostics: impl Into<String>) -> Self {
        Self::new(
            StatusCode::PRECONDITION_FAILED,
            IssueType::Conflict,
            diagnostics,
        )
    }

    pub fn forbidden(diagnostics: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, IssueType::Processing, diagnostics)
    }

    pub fn bad_request(diagnostics: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, IssueType::Invalid, diagnostics)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreFailure>;
