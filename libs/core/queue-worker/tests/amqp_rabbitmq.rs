//! `AmqpBroker` against a real RabbitMQ.
//!
//! Needs Docker: `cargo test -p queue-worker -- --ignored`

use queue_worker::{
    AmqpBroker, ExchangeKind, ExchangeSpec, MessageBroker, OutgoingMessage, QueueDef, QueueSpec,
    RetrySpec, Topology, RETRY_HEADER,
};
use std::time::Duration;
use test_utils::{TestDataBuilder, TestRabbitMq};

struct ShortRetryQueue;

impl QueueDef for ShortRetryQueue {
    const EXCHANGE: &'static str = "it.notifications";
    const ROUTING_KEY: &'static str = "email.verification";
    const QUEUE: &'static str = "it.email.verification_queue";
    const RETRY: Option<RetrySpec> = Some(RetrySpec {
        retry_queue: "it_email_verification_retry_queue",
        retry_delay_ms: 200,
        dead_letter_exchange: "it.dlx.notifications",
        dead_letter_queue: "it_email_verification_dlq",
        max_retries: 3,
    });
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn publish_consume_and_ack() {
    let rabbit = TestRabbitMq::new().await;
    let broker = AmqpBroker::connect(rabbit.url()).await.unwrap();
    let builder = TestDataBuilder::from_test_name("publish_consume_and_ack");
    let queue = builder.name("queue", "plain");

    broker
        .declare(
            &Topology::new()
                .exchange(ExchangeSpec::new("it.events", ExchangeKind::Topic))
                .queue(QueueSpec::new(&queue))
                .bind(&queue, "it.events", "donation.*"),
        )
        .await
        .unwrap();

    let message = OutgoingMessage::json(&serde_json::json!({"email": builder.email("donor")}))
        .unwrap()
        .with_header(RETRY_HEADER, 2u32);
    broker
        .publish("it.events", "donation.receipt", message)
        .await
        .unwrap();

    let mut deliveries = broker.consume(&queue, "it-consumer", 1).await.unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(5), deliveries.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(delivery.routing_key, "donation.receipt");
    assert_eq!(delivery.retry_count(), 2);
    delivery.ack().await.unwrap();
    assert!(broker.is_connected());
    broker.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn retry_queue_dead_letters_back_after_ttl() {
    let rabbit = TestRabbitMq::new().await;
    let broker = AmqpBroker::connect(rabbit.url()).await.unwrap();
    broker.declare(&ShortRetryQueue::topology()).await.unwrap();
    // Redeclaring the same topology is a no-op.
    broker.declare(&ShortRetryQueue::topology()).await.unwrap();

    let retry = ShortRetryQueue::RETRY.unwrap();
    broker
        .publish(
            ShortRetryQueue::EXCHANGE,
            retry.retry_queue,
            OutgoingMessage::new(br#"{"email":"a@example.com"}"#.to_vec())
                .with_header(RETRY_HEADER, 1u32),
        )
        .await
        .unwrap();

    let mut deliveries = broker
        .consume(ShortRetryQueue::QUEUE, "it-retry", 1)
        .await
        .unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(10), deliveries.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(delivery.body, br#"{"email":"a@example.com"}"#.to_vec());
    assert_eq!(delivery.retry_count(), 1);
    delivery.ack().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn publish_channel_is_reopened_after_channel_error() {
    let rabbit = TestRabbitMq::new().await;
    let broker = AmqpBroker::connect(rabbit.url()).await.unwrap();
    broker.declare(&ShortRetryQueue::topology()).await.unwrap();

    // Publishing to a missing exchange makes the server close the channel.
    let missing = broker
        .publish(
            "it.missing",
            "anything",
            OutgoingMessage::new(b"{}".to_vec()),
        )
        .await;
    assert!(missing.is_err());

    broker
        .publish(
            ShortRetryQueue::EXCHANGE,
            ShortRetryQueue::ROUTING_KEY,
            OutgoingMessage::new(br#"{"email":"b@example.com"}"#.to_vec()),
        )
        .await
        .unwrap();

    let mut deliveries = broker
        .consume(ShortRetryQueue::QUEUE, "it-reopen", 1)
        .await
        .unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(5), deliveries.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(delivery.body, br#"{"email":"b@example.com"}"#.to_vec());
    delivery.ack().await.unwrap();
    assert!(broker.is_connected());

    broker.close().await.unwrap();
    assert!(!broker.is_connected());
    assert!(broker
        .publish(
            ShortRetryQueue::EXCHANGE,
            ShortRetryQueue::ROUTING_KEY,
            OutgoingMessage::new(b"{}".to_vec()),
        )
        .await
        .is_err());
}
