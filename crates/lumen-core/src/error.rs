use thiserror::Error;

/// Core error types for Lumen store operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid resource type name: {0}")]
    InvalidResourceType(String),

    #[error("Invalid resource id: {0}")]
    InvalidId(String),

    #[error("Invalid instant: {0}")]
    InvalidInstant(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Resource not found: {resource_type}/{id}")]
    ResourceNotFound { resource_type: String, id: String },

    #[error("Resource conflict: {resource_type}/{id} already exists")]
    ResourceConflict { resource_type: String, id: String },

    #[error("Invalid resource content: {message}")]
    InvalidResource { message: String },

    #[error("Path expression error: {0}")]
    PathExpression(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl CoreError {
    pub fn invalid_resource_type(name: impl Into<String>) -> Self {
        Self::InvalidResourceType(name.into())
    }

    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId(id.into())
    }

    pub fn invalid_instant(value: impl Into<String>) -> Self {
        Self::InvalidInstant(value.into())
    }

    pub fn resource_not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    pub fn resource_conflict(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ResourceConflict {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    pub fn path_expression(message: impl Into<String>) -> Self {
        Self::PathExpression(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Check if this error is a client error (4xx category)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidResourceType(_)
                | Self::InvalidId(_)
                | Self::InvalidInstant(_)
                | Self::InvalidResource { .. }
                | Self::ResourceNotFound { .. }
                | Self::ResourceConflict { .. }
                | Self::UnsupportedContentType(_)
                | Self::JsonError(_)
                | Self::UrlError(_)
        )
    }

    /// Check if this error is a server error (5xx category)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::PathExpression(_))
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
