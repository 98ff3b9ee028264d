//! Broker client abstraction.
//!
//! Workers and publishers hold an `Arc<dyn MessageBroker>`; production wires
//! in [`AmqpBroker`](crate::AmqpBroker), tests use
//! [`InMemoryBroker`](crate::InMemoryBroker).

use crate::error::BrokerError;
use crate::message::{Delivery, OutgoingMessage};
use crate::topology::Topology;
use async_trait::async_trait;

/// Message broker operations needed by publishers and workers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declare exchanges, queues and bindings. Idempotent for identical definitions.
    async fn declare(&self, topology: &Topology) -> Result<(), BrokerError>;

    /// Publish a message to an exchange (`""` is the default exchange).
    ///
    /// Returns once the broker has accepted the message.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutgoingMessage,
    ) -> Result<(), BrokerError>;

    /// Start consuming a queue with at most `prefetch` unacknowledged deliveries.
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<Box<dyn DeliveryStream>, BrokerError>;

    /// Whether the underlying connection is usable.
    fn is_connected(&self) -> bool;

    /// Broker name for logging.
    fn name(&self) -> &'static str;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Stream of deliveries from one consumer.
///
/// Dropping the stream cancels the consumer; unacknowledged deliveries are
/// returned to their queue by the broker.
#[async_trait]
pub trait DeliveryStream: Send {
    /// Next delivery, or `None` once the consumer is cancelled.
    async fn next(&mut self) -> Option<Result<Delivery, BrokerError>>;
}
