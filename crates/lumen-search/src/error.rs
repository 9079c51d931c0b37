use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Unknown search parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value for {param}: {message}")]
    InvalidValue { param: String, message: String },

    #[error("Chained parameter {0} is not a reference parameter")]
    NotChainable(String),

    #[error(transparent)]
    Core(#[from] lumen_core::CoreError),
}

impl SearchError {
    pub fn invalid_value(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            param: param.into(),
            message: message.into(),
        }
    }
}
