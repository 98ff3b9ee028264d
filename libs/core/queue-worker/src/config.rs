//! Worker configuration
//!
//! This module provides `WorkerConfig` for configuring the queue worker.

use crate::lifecycle::{FailurePolicy, RetryPolicy};
use crate::topology::QueueDef;
use std::time::Duration;
use uuid::Uuid;

/// Default deadline for a single processing attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where failed messages go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRoute {
    /// Exchange the retry queue is bound to (the queue's own exchange).
    pub exchange: String,
    /// Routing key (and name) of the delayed retry queue.
    pub retry_queue: String,
    pub dead_letter_exchange: String,
    pub dead_letter_routing_key: String,
}

/// Configuration for the queue worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue to consume
    pub queue: String,

    /// Consumer tag (auto-generated if not provided)
    pub consumer_tag: String,

    /// Maximum unacknowledged deliveries held by this consumer
    pub prefetch: u16,

    /// Deadline for one render/send attempt
    pub attempt_timeout: Duration,

    /// Retry budget and failure policy
    pub retry_policy: RetryPolicy,

    /// Retry / dead-letter routing; `None` rejects failed messages
    pub retry_route: Option<RetryRoute>,

    /// Upper bound for the re-subscribe backoff
    pub max_backoff: Duration,
}

impl WorkerConfig {
    /// Create a new WorkerConfig from a QueueDef
    pub fn from_queue_def<Q: QueueDef>() -> Self {
        let mut config = Self::new(Q::QUEUE);
        match Q::RETRY {
            Some(retry) => {
                config.retry_policy = RetryPolicy::new(retry.max_retries);
                config.retry_route = Some(RetryRoute {
                    exchange: Q::EXCHANGE.to_string(),
                    retry_queue: retry.retry_queue.to_string(),
                    dead_letter_exchange: retry.dead_letter_exchange.to_string(),
                    dead_letter_routing_key: Q::ROUTING_KEY.to_string(),
                });
            }
            None => {
                config.retry_policy = RetryPolicy::none();
            }
        }
        config
    }

    /// Create a new WorkerConfig with explicit values and no retry routing
    pub fn new(queue: impl Into<String>) -> Self {
        let queue = queue.into();
        Self {
            consumer_tag: format!("{}-{}", queue, Uuid::new_v4()),
            queue,
            prefetch: 1,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retry_policy: RetryPolicy::none(),
            retry_route: None,
            max_backoff: Duration::from_secs(30),
        }
    }

    /// Set the consumer tag
    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }

    /// Set the prefetch count (minimum 1)
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Set the per-attempt timeout
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set the failure policy, keeping the retry budget
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.retry_policy = self.retry_policy.with_failure_policy(policy);
        self
    }

    /// Set the upper bound for the re-subscribe backoff
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }
}
