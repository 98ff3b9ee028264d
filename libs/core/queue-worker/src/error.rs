//! Queue error types and error categorization
//!
//! Errors are categorized so the worker can decide between a delayed retry and
//! dead-lettering:
//! - **Transient**: temporary failure, eligible for retry while budget remains
//! - **Permanent**: unrecoverable, dead-lettered immediately under the classified policy

use std::time::Duration;
use strum::{AsRefStr, Display};
use thiserror::Error;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// Temporary failure (SMTP down, broker hiccup, timeout)
    Transient,
    /// Unrecoverable error (malformed payload, invalid recipient)
    Permanent,
}

impl ErrorCategory {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }
}

/// Errors raised by a [`MessageBroker`](crate::MessageBroker) implementation.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Failed to declare {kind} '{name}': {details}")]
    Declare {
        kind: &'static str,
        name: String,
        details: String,
    },

    #[error("Publish to exchange '{exchange}' with key '{routing_key}' failed: {details}")]
    Publish {
        exchange: String,
        routing_key: String,
        details: String,
    },

    #[error("Broker did not confirm publish to exchange '{exchange}'")]
    Nacked { exchange: String },

    #[error("Consume from queue '{queue}' failed: {details}")]
    Consume { queue: String, details: String },

    #[error("Acknowledgement failed: {0}")]
    Ack(String),

    #[error("Exchange '{0}' does not exist")]
    UnknownExchange(String),

    #[error("Queue '{0}' does not exist")]
    UnknownQueue(String),

    #[error("Broker connection is closed")]
    Closed,
}

/// Queue processing errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Broker transport error
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Message processing failed
    #[error("Processing error: {message}")]
    Processing {
        message: String,
        category: ErrorCategory,
    },

    /// A single processing attempt exceeded its deadline
    #[error("Processing attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

impl QueueError {
    /// Create a transient processing error
    pub fn transient(message: impl Into<String>) -> Self {
        QueueError::Processing {
            message: message.into(),
            category: ErrorCategory::Transient,
        }
    }

    /// Create a permanent processing error
    pub fn permanent(message: impl Into<String>) -> Self {
        QueueError::Processing {
            message: message.into(),
            category: ErrorCategory::Permanent,
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            QueueError::Broker(_) => ErrorCategory::Transient,
            QueueError::Serialization(_) => ErrorCategory::Permanent,
            QueueError::Processing { category, .. } => *category,
            QueueError::Timeout(_) => ErrorCategory::Transient,
            QueueError::Config(_) => ErrorCategory::Permanent,
            QueueError::Shutdown => ErrorCategory::Permanent,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}
