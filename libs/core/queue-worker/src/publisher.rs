//! Publishing side: persistent JSON messages to a named exchange.

use crate::broker::MessageBroker;
use crate::error::QueueError;
use crate::message::OutgoingMessage;
use crate::metrics;
use crate::topology::{ExchangeSpec, QueueDef, Topology};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error};

/// Publishes messages to one exchange.
///
/// The exchange is declared on first use and remembered; every message is
/// persistent and carries `content-type: application/json`. Each call returns
/// only after the broker has accepted the message.
pub struct Publisher {
    broker: Arc<dyn MessageBroker>,
    exchange: ExchangeSpec,
    declared: OnceCell<()>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn MessageBroker>, exchange: ExchangeSpec) -> Self {
        Self {
            broker,
            exchange,
            declared: OnceCell::new(),
        }
    }

    /// Publisher for the exchange a queue definition consumes from.
    pub fn for_queue_def<Q: QueueDef>(broker: Arc<dyn MessageBroker>) -> Self {
        let mut exchange = ExchangeSpec::new(Q::EXCHANGE, Q::EXCHANGE_KIND);
        exchange.durable = Q::EXCHANGE_DURABLE;
        Self::new(broker, exchange)
    }

    pub fn exchange(&self) -> &str {
        &self.exchange.name
    }

    async fn ensure_exchange(&self) -> Result<(), QueueError> {
        self.declared
            .get_or_try_init(|| async {
                let topology = Topology::new().exchange(self.exchange.clone());
                self.broker.declare(&topology).await
            })
            .await?;
        Ok(())
    }

    /// Serialize `payload` as JSON and publish it with `routing_key`.
    pub async fn publish<T>(&self, routing_key: &str, payload: &T) -> Result<(), QueueError>
    where
        T: Serialize + ?Sized,
    {
        let message = OutgoingMessage::json(payload)?;
        self.publish_message(routing_key, message).await
    }

    /// Publish a prepared message, keeping its headers and body as given.
    pub async fn publish_message(
        &self,
        routing_key: &str,
        message: OutgoingMessage,
    ) -> Result<(), QueueError> {
        self.ensure_exchange().await?;

        let size = message.body.len();
        match self
            .broker
            .publish(&self.exchange.name, routing_key, message)
            .await
        {
            Ok(()) => {
                metrics::record_published(&self.exchange.name, routing_key);
                debug!(
                    exchange = %self.exchange.name,
                    routing_key = %routing_key,
                    size = size,
                    "Published message"
                );
                Ok(())
            }
            Err(e) => {
                metrics::record_publish_failed(&self.exchange.name, routing_key);
                error!(
                    exchange = %self.exchange.name,
                    routing_key = %routing_key,
                    error = %e,
                    "Failed to publish message"
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockMessageBroker;
    use crate::error::BrokerError;
    use crate::memory::InMemoryBroker;
    use crate::message::JSON_CONTENT_TYPE;
    use crate::topology::{ExchangeKind, QueueSpec};
    use serde_json::json;

    fn notifications() -> ExchangeSpec {
        ExchangeSpec::new("notifications", ExchangeKind::Topic)
    }

    #[tokio::test]
    async fn test_declares_exchange_once() {
        let mut mock = MockMessageBroker::new();
        mock.expect_declare()
            .withf(|topology| {
                topology.exchanges.len() == 1 && topology.exchanges[0].name == "notifications"
            })
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_publish()
            .withf(|exchange, routing_key, message| {
                exchange.to_string() == "notifications"
                    && routing_key.to_string() == "email.verification"
                    && message.persistent
                    && message.content_type.as_deref() == Some(JSON_CONTENT_TYPE)
            })
            .times(2)
            .returning(|_, _, _| Ok(()));

        let publisher = Publisher::new(Arc::new(mock), notifications());
        publisher
            .publish("email.verification", &json!({"email": "a@example.com"}))
            .await
            .unwrap();
        publisher
            .publish("email.verification", &json!({"email": "b@example.com"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_broker_failure_is_returned() {
        let mut mock = MockMessageBroker::new();
        mock.expect_declare().returning(|_| Ok(()));
        mock.expect_publish().returning(|_, _, _| {
            Err(BrokerError::Nacked {
                exchange: "notifications".to_string(),
            })
        });

        let publisher = Publisher::new(Arc::new(mock), notifications());
        let result = publisher.publish("email.verification", &json!({})).await;
        assert!(matches!(
            result,
            Err(QueueError::Broker(BrokerError::Nacked { .. }))
        ));
    }

    #[tokio::test]
    async fn test_declare_failure_is_retried_on_next_publish() {
        let mut mock = MockMessageBroker::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_declare()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(BrokerError::Channel("closed".to_string())));
        mock.expect_declare()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_publish().times(1).returning(|_, _, _| Ok(()));

        let publisher = Publisher::new(Arc::new(mock), notifications());
        assert!(publisher.publish("k", &json!({})).await.is_err());
        assert!(publisher.publish("k", &json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_publish_routes_to_bound_queue() {
        let broker = InMemoryBroker::new();
        broker
            .declare(
                &Topology::new()
                    .exchange(notifications())
                    .queue(QueueSpec::new("email.verification_queue"))
                    .bind(
                        "email.verification_queue",
                        "notifications",
                        "email.verification",
                    ),
            )
            .await
            .unwrap();

        let publisher = Publisher::new(Arc::new(broker.clone()), notifications());
        publisher
            .publish("email.verification", &json!({"email": "a@example.com"}))
            .await
            .unwrap();

        let queued = broker.queue_messages("email.verification_queue");
        assert_eq!(queued.len(), 1);
        assert!(queued[0].persistent);
        assert_eq!(queued[0].body, br#"{"email":"a@example.com"}"#.to_vec());
    }
}
