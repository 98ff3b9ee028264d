//! Queue Worker Framework
//!
//! A generic AMQP worker framework for processing messages with delayed
//! retries and a dead-letter queue.
//!
//! ## Features
//!
//! - **Generic worker**: `QueueWorker<J, P>` processes any job type
//! - **Delayed retry**: failed messages wait in a TTL queue, counted by the `x-retry` header
//! - **Dead Letter Queue**: messages that exhaust their retries go to a DLX
//! - **Explicit lifecycle**: every delivery walks the `DeliveryState` machine
//! - **Injectable broker**: `AmqpBroker` in production, `InMemoryBroker` in tests
//! - **Prometheus metrics** and K8s-ready health endpoints
//!
//! ## Example
//!
//! ```ignore
//! use queue_worker::{QueueDef, QueueWorker, RetrySpec, WorkerConfig};
//!
//! struct WelcomeQueue;
//! impl QueueDef for WelcomeQueue {
//!     const EXCHANGE: &'static str = "notifications";
//!     const ROUTING_KEY: &'static str = "email.welcome";
//!     const QUEUE: &'static str = "email.welcome_queue";
//!     const RETRY: Option<RetrySpec> = Some(RetrySpec { /* ... */ });
//! }
//!
//! broker.declare(&WelcomeQueue::topology()).await?;
//! let config = WorkerConfig::from_queue_def::<WelcomeQueue>();
//! let worker = QueueWorker::new(broker, processor, config);
//! worker.run(shutdown_rx).await?;
//! ```

mod amqp;
pub mod backoff;
mod broker;
mod config;
mod error;
mod health;
mod lifecycle;
mod memory;
mod message;
pub mod metrics;
mod processor;
mod publisher;
mod topology;
mod worker;

// Re-export main types
pub use amqp::AmqpBroker;
pub use broker::{DeliveryStream, MessageBroker};
pub use config::{RetryRoute, WorkerConfig, DEFAULT_ATTEMPT_TIMEOUT};
pub use error::{BrokerError, ErrorCategory, QueueError};
pub use health::{health_router, HealthResponse, HealthState};
pub use lifecycle::{
    DeliveryEvent, DeliveryOutcome, DeliveryState, FailurePolicy, InvalidTransition, RetryPolicy,
};
pub use memory::{InMemoryBroker, PublishedMessage, StoredMessage};
pub use message::{
    Acknowledger, Delivery, HeaderValue, MessageHeaders, OutgoingMessage, JSON_CONTENT_TYPE,
    RETRY_HEADER,
};
pub use metrics::{init_metrics, QueueMetrics};
pub use processor::{MessageProcessor, QueueJob};
pub use publisher::Publisher;
pub use topology::{
    BindingSpec, ExchangeKind, ExchangeSpec, QueueArguments, QueueDef, QueueSpec, RetrySpec,
    Topology,
};
pub use worker::QueueWorker;
