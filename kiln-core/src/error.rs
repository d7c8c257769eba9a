//! Error types for core build logic

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while interpreting build properties
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Build style is not one of the known packaging formats
    #[error("Unknown build style: {0}")]
    UnknownStyle(String),

    /// Scheduler name does not map to an artifact category
    #[error("Unknown scheduler '{0}': cannot derive an artifact category")]
    UnknownScheduler(String),

    /// Category string is not a known artifact category
    #[error("Unknown artifact category: {0}")]
    UnknownCategory(String),

    /// Pipeline name is not a registered template
    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),

    /// A property needed by the operation is not set
    #[error("Missing property: {0}")]
    MissingProperty(String),

    /// A property value could not be parsed
    #[error("Invalid value '{value}' for property '{key}'")]
    InvalidValue {
        /// Property name
        key: String,
        /// Rejected value
        value: String,
    },

    /// A value would escape or collapse its artifact store directory
    #[error("Unsafe path segment in '{0}'")]
    UnsafeSegment(String),
}

impl CoreError {
    /// Create a missing property error
    pub fn missing(key: impl Into<String>) -> Self {
        Self::MissingProperty(key.into())
    }

    /// Create an invalid value error
    pub fn invalid(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}
