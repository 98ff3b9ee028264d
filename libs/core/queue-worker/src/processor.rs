//! Job and processor traits implemented by domain crates.

use crate::error::QueueError;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for queue message payloads.
///
/// The retry count travels in the `x-retry` header, never in the payload, so
/// a job only needs to be serializable and identifiable in logs.
///
/// # Example
///
/// ```rust,ignore
/// use queue_worker::QueueJob;
///
/// #[derive(Serialize, Deserialize)]
/// struct WelcomeEmail {
///     email: String,
/// }
///
/// impl QueueJob for WelcomeEmail {
///     fn job_key(&self) -> String {
///         self.email.clone()
///     }
/// }
/// ```
pub trait QueueJob: Serialize + DeserializeOwned + Send + Sync {
    /// Short identifier for logging and tracing.
    fn job_key(&self) -> String;
}

/// Trait for message processors.
///
/// Domain handlers implement this trait to process messages from a queue.
/// Returning `Err` hands the message to the worker's retry / dead-letter logic.
#[async_trait]
pub trait MessageProcessor<J: QueueJob>: Send + Sync {
    /// Process a single message.
    async fn process(&self, job: &J) -> Result<(), QueueError>;

    /// Get the processor name for logging and metric labels.
    fn name(&self) -> &'static str;

    /// Health check for the processor's downstream dependencies.
    async fn health_check(&self) -> Result<bool, QueueError> {
        Ok(true)
    }
}
