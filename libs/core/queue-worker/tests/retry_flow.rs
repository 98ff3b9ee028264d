//! End-to-end delivery behaviour of `QueueWorker` against the in-memory broker.

use async_trait::async_trait;
use queue_worker::{
    ErrorCategory, FailurePolicy, InMemoryBroker, MessageBroker, MessageProcessor,
    OutgoingMessage, Publisher, QueueDef, QueueError, QueueJob, QueueWorker, RetrySpec,
    WorkerConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

struct VerificationQueue;

impl QueueDef for VerificationQueue {
    const EXCHANGE: &'static str = "notifications";
    const ROUTING_KEY: &'static str = "email.verification";
    const QUEUE: &'static str = "email.verification_queue";
    const RETRY: Option<RetrySpec> = Some(RetrySpec {
        retry_queue: "email_verification_retry_queue",
        retry_delay_ms: 10_000,
        dead_letter_exchange: "dlx.notifications",
        dead_letter_queue: "email_verification_dlq",
        max_retries: 3,
    });
}

const RETRY_QUEUE: &str = "email_verification_retry_queue";
const DLQ: &str = "email_verification_dlq";

#[derive(Debug, Serialize, Deserialize)]
struct Verification {
    email: String,
}

impl QueueJob for Verification {
    fn job_key(&self) -> String {
        self.email.clone()
    }
}

enum Failure {
    None,
    Transient,
    Permanent,
    Hang(Duration),
}

/// Counts sends; fails the first `fail_first` attempts with `failure`.
struct ScriptedSender {
    sends: AtomicU32,
    fail_first: u32,
    failure: Failure,
    /// Notified after the first send, which then never returns.
    crash_after_first_send: Option<Arc<Notify>>,
}

impl ScriptedSender {
    fn new(fail_first: u32, failure: Failure) -> Self {
        Self {
            sends: AtomicU32::new(0),
            fail_first,
            failure,
            crash_after_first_send: None,
        }
    }

    fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageProcessor<Verification> for ScriptedSender {
    async fn process(&self, _job: &Verification) -> Result<(), QueueError> {
        let attempt = self.sends.fetch_add(1, Ordering::SeqCst);

        if attempt == 0 {
            if let Some(crashed) = &self.crash_after_first_send {
                crashed.notify_one();
                std::future::pending::<()>().await;
            }
        }

        if attempt < self.fail_first {
            return match self.failure {
                Failure::None => Ok(()),
                Failure::Transient => Err(QueueError::transient("smtp unavailable")),
                Failure::Permanent => Err(QueueError::permanent("mailbox does not exist")),
                Failure::Hang(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(())
                }
            };
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted_sender"
    }
}

async fn broker() -> InMemoryBroker {
    let broker = InMemoryBroker::new();
    broker.declare(&VerificationQueue::topology()).await.unwrap();
    broker
}

fn spawn_worker(
    broker: &InMemoryBroker,
    sender: Arc<ScriptedSender>,
    config: WorkerConfig,
) -> (watch::Sender<bool>, JoinHandle<Result<(), QueueError>>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = QueueWorker::with_arc_processor(Arc::new(broker.clone()), sender, config);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });
    (shutdown_tx, handle)
}

async fn publish(broker: &InMemoryBroker, email: &str) {
    let publisher = Publisher::for_queue_def::<VerificationQueue>(Arc::new(broker.clone()));
    publisher
        .publish(
            VerificationQueue::ROUTING_KEY,
            &Verification {
                email: email.to_string(),
            },
        )
        .await
        .unwrap();
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached in time");
}

fn retry_headers(broker: &InMemoryBroker) -> Vec<u32> {
    broker
        .published_to(VerificationQueue::EXCHANGE)
        .into_iter()
        .filter(|p| p.routing_key == RETRY_QUEUE)
        .map(|p| p.message.headers.retry_count())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn success_sends_exactly_once() {
    let broker = broker().await;
    let sender = Arc::new(ScriptedSender::new(0, Failure::None));
    let (_shutdown, _handle) = spawn_worker(
        &broker,
        sender.clone(),
        WorkerConfig::from_queue_def::<VerificationQueue>(),
    );

    publish(&broker, "donor@example.com").await;
    wait_until(|| sender.sends() == 1 && broker.unacked_count() == 0).await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(sender.sends(), 1);
    assert!(retry_headers(&broker).is_empty());
    assert_eq!(broker.queue_len(VerificationQueue::QUEUE), 0);
    assert_eq!(broker.queue_len(DLQ), 0);
}

#[tokio::test(start_paused = true)]
async fn failures_walk_retry_header_then_dead_letter() {
    let broker = broker().await;
    let sender = Arc::new(ScriptedSender::new(u32::MAX, Failure::Transient));
    let (_shutdown, _handle) = spawn_worker(
        &broker,
        sender.clone(),
        WorkerConfig::from_queue_def::<VerificationQueue>(),
    );

    publish(&broker, "donor@example.com").await;
    wait_until(|| broker.queue_len(DLQ) == 1).await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    // Original attempt plus three retries; no fourth retry.
    assert_eq!(sender.sends(), 4);
    assert_eq!(retry_headers(&broker), vec![1, 2, 3]);
    assert_eq!(broker.queue_len(DLQ), 1);
    assert_eq!(broker.queue_len(RETRY_QUEUE), 0);
    assert_eq!(broker.queue_len(VerificationQueue::QUEUE), 0);
}

#[tokio::test(start_paused = true)]
async fn fail_once_then_succeed_is_delivered() {
    let broker = broker().await;
    let sender = Arc::new(ScriptedSender::new(1, Failure::Transient));
    let (_shutdown, _handle) = spawn_worker(
        &broker,
        sender.clone(),
        WorkerConfig::from_queue_def::<VerificationQueue>(),
    );

    publish(&broker, "donor@example.com").await;
    wait_until(|| sender.sends() == 2 && broker.unacked_count() == 0).await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(sender.sends(), 2);
    assert_eq!(retry_headers(&broker), vec![1]);
    assert_eq!(broker.queue_len(DLQ), 0);
    assert_eq!(broker.queue_len(RETRY_QUEUE), 0);
}

#[tokio::test(start_paused = true)]
async fn retry_is_not_redelivered_before_ttl() {
    let broker = broker().await;
    let sender = Arc::new(ScriptedSender::new(1, Failure::Transient));
    let (_shutdown, _handle) = spawn_worker(
        &broker,
        sender.clone(),
        WorkerConfig::from_queue_def::<VerificationQueue>(),
    );

    publish(&broker, "donor@example.com").await;
    wait_until(|| broker.queue_len(RETRY_QUEUE) == 1).await;
    let parked_at = tokio::time::Instant::now();

    tokio::time::sleep_until(parked_at + Duration::from_millis(9_900)).await;
    assert_eq!(sender.sends(), 1);
    assert_eq!(broker.queue_len(RETRY_QUEUE), 1);

    tokio::time::sleep_until(parked_at + Duration::from_millis(10_100)).await;
    wait_until(|| sender.sends() == 2).await;
    assert_eq!(broker.queue_len(RETRY_QUEUE), 0);
}

#[tokio::test]
async fn crash_between_send_and_ack_sends_twice() {
    let broker = broker().await;
    let crashed = Arc::new(Notify::new());
    let sender = Arc::new(ScriptedSender {
        crash_after_first_send: Some(crashed.clone()),
        ..ScriptedSender::new(0, Failure::None)
    });
    let config = WorkerConfig::from_queue_def::<VerificationQueue>();

    let (_first_shutdown, first) = spawn_worker(&broker, sender.clone(), config.clone());
    publish(&broker, "donor@example.com").await;
    crashed.notified().await;

    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());
    assert_eq!(broker.queue_len(VerificationQueue::QUEUE), 1);
    assert!(broker.queue_messages(VerificationQueue::QUEUE)[0].redelivered);

    let (_second_shutdown, _second) = spawn_worker(&broker, sender.clone(), config);
    wait_until(|| sender.sends() == 2 && broker.unacked_count() == 0).await;

    assert_eq!(sender.sends(), 2);
    assert_eq!(broker.queue_len(VerificationQueue::QUEUE), 0);
    assert_eq!(broker.queue_len(DLQ), 0);
}

#[tokio::test(start_paused = true)]
async fn dead_lettered_body_is_byte_identical() {
    let broker = broker().await;
    let sender = Arc::new(ScriptedSender::new(u32::MAX, Failure::Transient));
    let (_shutdown, _handle) = spawn_worker(
        &broker,
        sender.clone(),
        WorkerConfig::from_queue_def::<VerificationQueue>(),
    );

    let body = br#"{ "email" : "donor@example.com",  "name": "Amina", "extra": [1, 2.50, null] }"#;
    broker
        .publish(
            VerificationQueue::EXCHANGE,
            VerificationQueue::ROUTING_KEY,
            OutgoingMessage::new(body.to_vec()),
        )
        .await
        .unwrap();

    wait_until(|| broker.queue_len(DLQ) == 1).await;

    let dead = broker.queue_messages(DLQ);
    assert_eq!(dead[0].body, body.to_vec());
    assert_eq!(dead[0].routing_key, VerificationQueue::ROUTING_KEY);
    assert!(dead[0].persistent);
}

#[tokio::test(start_paused = true)]
async fn timed_out_attempt_is_retried() {
    let broker = broker().await;
    let sender = Arc::new(ScriptedSender::new(1, Failure::Hang(Duration::from_secs(300))));
    let config = WorkerConfig::from_queue_def::<VerificationQueue>()
        .with_attempt_timeout(Duration::from_secs(5));
    let (_shutdown, _handle) = spawn_worker(&broker, sender.clone(), config);

    publish(&broker, "slow@example.com").await;
    wait_until(|| sender.sends() == 2 && broker.unacked_count() == 0).await;

    assert_eq!(retry_headers(&broker), vec![1]);
    assert_eq!(broker.queue_len(DLQ), 0);
}

#[tokio::test(start_paused = true)]
async fn classified_policy_dead_letters_permanent_failures_immediately() {
    let broker = broker().await;
    let sender = Arc::new(ScriptedSender::new(u32::MAX, Failure::Permanent));
    let config = WorkerConfig::from_queue_def::<VerificationQueue>()
        .with_failure_policy(FailurePolicy::Classified);
    let (_shutdown, _handle) = spawn_worker(&broker, sender.clone(), config);

    publish(&broker, "gone@example.com").await;
    wait_until(|| broker.queue_len(DLQ) == 1).await;

    assert_eq!(sender.sends(), 1);
    assert!(retry_headers(&broker).is_empty());
}

#[tokio::test(start_paused = true)]
async fn uniform_policy_retries_permanent_failures() {
    let broker = broker().await;
    let sender = Arc::new(ScriptedSender::new(u32::MAX, Failure::Permanent));
    let (_shutdown, _handle) = spawn_worker(
        &broker,
        sender.clone(),
        WorkerConfig::from_queue_def::<VerificationQueue>(),
    );

    publish(&broker, "gone@example.com").await;
    wait_until(|| broker.queue_len(DLQ) == 1).await;

    assert_eq!(sender.sends(), 4);
    assert_eq!(QueueError::permanent("x").category(), ErrorCategory::Permanent);
}

#[tokio::test(start_paused = true)]
async fn failed_retry_publish_keeps_the_message() {
    let broker = broker().await;
    let sender = Arc::new(ScriptedSender::new(1, Failure::Transient));

    publish(&broker, "donor@example.com").await;
    broker.fail_next_publishes(1);

    let (_shutdown, _handle) = spawn_worker(
        &broker,
        sender.clone(),
        WorkerConfig::from_queue_def::<VerificationQueue>(),
    );

    // First attempt fails, its retry publish fails, so the original is
    // requeued and the second attempt succeeds.
    wait_until(|| sender.sends() == 2 && broker.unacked_count() == 0).await;

    assert!(retry_headers(&broker).is_empty());
    assert_eq!(broker.queue_len(VerificationQueue::QUEUE), 0);
    assert_eq!(broker.queue_len(DLQ), 0);
}

#[tokio::test(start_paused = true)]
async fn repeated_republish_failures_back_off_between_attempts() {
    let broker = broker().await;
    let sender = Arc::new(ScriptedSender::new(u32::MAX, Failure::Transient));

    publish(&broker, "donor@example.com").await;
    broker.fail_next_publishes(5);
    let started = tokio::time::Instant::now();

    let (_shutdown, _handle) = spawn_worker(
        &broker,
        sender.clone(),
        WorkerConfig::from_queue_def::<VerificationQueue>()
            .with_max_backoff(Duration::from_secs(30)),
    );

    wait_until(|| sender.sends() == 1).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sender.sends(), 1);

    // Five failed republishes pause the consumer for 2 + 4 + 8 + 16 + 30 seconds
    // before the sixth attempt's retry publish goes through.
    wait_until(|| retry_headers(&broker).len() == 1).await;

    assert_eq!(sender.sends(), 6);
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(retry_headers(&broker), vec![1]);
    assert_eq!(broker.queue_len(VerificationQueue::QUEUE), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_worker_exit() {
    let broker = broker().await;
    let sender = Arc::new(ScriptedSender::new(0, Failure::None));
    let (shutdown, handle) = spawn_worker(
        &broker,
        sender,
        WorkerConfig::from_queue_def::<VerificationQueue>(),
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
