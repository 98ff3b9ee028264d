//! Error types for the notifications domain.

use queue_worker::{ErrorCategory, QueueError};
use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Template rendering error.
    #[error("Template rendering error: {0}")]
    TemplateError(String),

    /// Email provider error.
    #[error("Email provider error: {0}")]
    ProviderError(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Broker publish / declare error.
    #[error("Queue error: {0}")]
    QueueError(#[from] QueueError),

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl NotificationError {
    /// How the worker should treat this failure under the classified policy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            NotificationError::InvalidEmail(_)
            | NotificationError::ConfigError(_)
            | NotificationError::Serialization(_) => ErrorCategory::Permanent,
            NotificationError::QueueError(e) => e.category(),
            NotificationError::TemplateError(_) | NotificationError::ProviderError(_) => {
                ErrorCategory::Transient
            }
        }
    }
}

impl From<handlebars::RenderError> for NotificationError {
    fn from(err: handlebars::RenderError) -> Self {
        NotificationError::TemplateError(err.to_string())
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::Serialization(err.to_string())
    }
}

impl From<core_config::ConfigError> for NotificationError {
    fn from(err: core_config::ConfigError) -> Self {
        NotificationError::ConfigError(err.to_string())
    }
}

/// Convert NotificationError to QueueError, keeping the category.
impl From<NotificationError> for QueueError {
    fn from(e: NotificationError) -> Self {
        match e {
            NotificationError::QueueError(inner) => inner,
            other => QueueError::Processing {
                category: other.category(),
                message: other.to_string(),
            },
        }
    }
}
