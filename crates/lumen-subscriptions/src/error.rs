use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Unknown subscription topic: {0}")]
    UnknownTopic(String),

    #[error("Invalid subscription topic: {0}")]
    InvalidTopic(String),

    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("Trigger for {resource_type} failed to compile: {message}")]
    TriggerCompile {
        resource_type: String,
        message: String,
    },

    #[error(transparent)]
    Search(#[from] lumen_search::SearchError),

    #[error(transparent)]
    Core(#[from] lumen_core::CoreError),
}

impl SubscriptionError {
    pub fn invalid_topic(message: impl Into<String>) -> Self {
        Self::InvalidTopic(message.into())
    }

    pub fn invalid_subscription(message: impl Into<String>) -> Self {
        Self::InvalidSubscription(message.into())
    }

    pub fn trigger_compile(
        resource_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TriggerCompile {
            resource_type: resource_type.into(),
            message: message.into(),
        }
    }
}
