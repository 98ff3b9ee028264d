//! Prometheus metrics for queue workers and publishers
//!
//! Provides observability into delivery outcomes, retries and dead-lettering.

use crate::error::ErrorCategory;
use crate::lifecycle::DeliveryOutcome;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), BuildError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok::<_, BuildError>(handle)
    })?;
    Ok(())
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Record a message accepted by the broker from a publisher
pub fn record_published(exchange: &str, routing_key: &str) {
    counter!(
        "queue_messages_published_total",
        "exchange" => exchange.to_string(),
        "routing_key" => routing_key.to_string()
    )
    .increment(1);
}

/// Record a publish the broker refused or never confirmed
pub fn record_publish_failed(exchange: &str, routing_key: &str) {
    counter!(
        "queue_publish_failures_total",
        "exchange" => exchange.to_string(),
        "routing_key" => routing_key.to_string()
    )
    .increment(1);
}

/// Queue worker metrics helper
#[derive(Clone)]
pub struct QueueMetrics {
    /// Queue name for labeling
    queue: String,
    /// Processor name for labeling
    processor: String,
}

impl QueueMetrics {
    /// Create new QueueMetrics
    pub fn new(queue: impl Into<String>, processor: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            processor: processor.into(),
        }
    }

    /// Record a delivery being received
    pub fn message_received(&self, redelivered: bool) {
        counter!(
            "queue_worker_messages_received_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone(),
            "redelivered" => redelivered.to_string()
        )
        .increment(1);
    }

    /// Record the outcome of one processing attempt
    pub fn outcome(&self, outcome: DeliveryOutcome, duration: Duration) {
        counter!(
            "queue_worker_messages_processed_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone(),
            "outcome" => outcome.as_ref().to_string()
        )
        .increment(1);

        histogram!(
            "queue_worker_attempt_duration_seconds",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed attempt
    pub fn attempt_failed(&self, category: ErrorCategory) {
        counter!(
            "queue_worker_attempt_errors_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone(),
            "category" => category.as_ref().to_string()
        )
        .increment(1);
    }

    /// Record an attempt cut short by the attempt timeout
    pub fn attempt_timed_out(&self) {
        counter!(
            "queue_worker_attempt_timeouts_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone()
        )
        .increment(1);
    }

    /// Record a message republished to the retry queue
    pub fn retry_scheduled(&self, retry_count: u32) {
        counter!(
            "queue_worker_retries_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone(),
            "attempt" => retry_count.to_string()
        )
        .increment(1);
    }

    /// Record a message moved to the dead-letter exchange
    pub fn dead_lettered(&self) {
        counter!(
            "queue_worker_dead_lettered_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone()
        )
        .increment(1);
    }

    /// Record a delivery returned to its queue after a failed republish
    pub fn requeued(&self) {
        counter!(
            "queue_worker_requeued_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone()
        )
        .increment(1);
    }
}
