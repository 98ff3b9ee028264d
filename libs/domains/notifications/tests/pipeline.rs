//! Verification emails from `NotificationService` through the worker to the
//! mail transport, on the in-memory broker.

use domain_notifications::{
    notification_topology, DonationReceipt, EmailReceiptQueue, EmailVerificationQueue,
    NotificationConfig, NotificationService, ReceiptEmailProcessor, RecordingEmailProvider,
    TemplateEngine, VerificationEmail, VerificationEmailProcessor,
};
use queue_worker::{InMemoryBroker, MessageBroker, QueueDef, QueueError, QueueWorker, WorkerConfig};
use std::sync::Arc;
use std::time::Duration;
use test_utils::TestDataBuilder;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const DLQ: &str = "email_verification_dlq";

struct Harness {
    broker: InMemoryBroker,
    provider: Arc<RecordingEmailProvider>,
    service: NotificationService,
    _shutdown: watch::Sender<bool>,
    _workers: Vec<JoinHandle<Result<(), QueueError>>>,
}

async fn harness(provider: RecordingEmailProvider) -> Harness {
    let broker = InMemoryBroker::new();
    broker.declare(&notification_topology()).await.unwrap();

    let provider = Arc::new(provider);
    let templates = Arc::new(TemplateEngine::new().unwrap());
    let config = NotificationConfig::default();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let verification = QueueWorker::new(
        Arc::new(broker.clone()),
        VerificationEmailProcessor::new(provider.clone(), templates.clone(), config.clone()),
        WorkerConfig::from_queue_def::<EmailVerificationQueue>(),
    );
    let receipts = QueueWorker::new(
        Arc::new(broker.clone()),
        ReceiptEmailProcessor::new(provider.clone(), templates, config.clone()),
        WorkerConfig::from_queue_def::<EmailReceiptQueue>(),
    );

    let rx = shutdown_rx.clone();
    let workers = vec![
        tokio::spawn(async move { verification.run(rx).await }),
        tokio::spawn(async move { receipts.run(shutdown_rx).await }),
    ];

    Harness {
        service: NotificationService::new(Arc::new(broker.clone()), config),
        broker,
        provider,
        _shutdown: shutdown_tx,
        _workers: workers,
    }
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

#[tokio::test(start_paused = true)]
async fn verification_email_is_rendered_and_sent_once() {
    let data = TestDataBuilder::from_test_name("verification_email_is_rendered_and_sent_once");
    let h = harness(RecordingEmailProvider::new()).await;
    let email = data.email("amina");
    let token = data.token();

    h.service
        .queue_verification_email(
            Some(&data.tenant_id().to_string()),
            &email,
            Some("Amina"),
            &token,
            Some("https://cdn.example.org/logo.png"),
        )
        .await
        .unwrap();

    wait_until(|| h.provider.sent().len() == 1 && h.broker.unacked_count() == 0).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    let sent = h.provider.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to_email, email);
    assert_eq!(sent[0].subject, "Verify your email address");
    assert!(sent[0]
        .text_body
        .contains(&format!("http://localhost:3000/verify-email?token={}", token)));
    assert!(sent[0].html_body.contains("https://cdn.example.org/logo.png"));
    assert_eq!(h.broker.queue_len(DLQ), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_send_failure_is_retried_after_delay() {
    let h = harness(RecordingEmailProvider::failing(1)).await;

    h.service
        .queue_verification_email(None, "donor@example.com", None, "tok", None)
        .await
        .unwrap();

    wait_until(|| h.provider.attempts() == 1).await;
    assert!(h.provider.sent().is_empty());

    wait_until(|| h.provider.sent().len() == 1).await;
    assert_eq!(h.provider.attempts(), 2);
    assert_eq!(h.broker.queue_len(DLQ), 0);
}

#[tokio::test(start_paused = true)]
async fn unreachable_mail_server_ends_in_dead_letter_queue() {
    let h = harness(RecordingEmailProvider::failing(usize::MAX)).await;

    let event = h
        .service
        .queue_verification_email(None, "donor@example.com", Some("Baraka"), "tok", None)
        .await
        .unwrap();

    wait_until(|| h.broker.queue_len(DLQ) == 1).await;

    assert_eq!(h.provider.attempts(), 4);
    let dead = h.broker.queue_messages(DLQ);
    let body: VerificationEmail = serde_json::from_slice(&dead[0].body).unwrap();
    assert_eq!(body, event);
    assert_eq!(
        h.broker.queue_len(EmailVerificationQueue::QUEUE),
        0,
        "main queue should be drained"
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_address_spends_retries_under_uniform_policy() {
    let h = harness(RecordingEmailProvider::new()).await;

    h.service
        .queue_verification_email(None, "not-an-address", None, "tok", None)
        .await
        .unwrap();

    wait_until(|| h.broker.queue_len(DLQ) == 1).await;
    assert_eq!(h.provider.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn donation_receipt_is_emailed() {
    let h = harness(RecordingEmailProvider::new()).await;

    let mut receipt = DonationReceipt::new("donor@example.com", 2500);
    receipt.donor_name = Some("Baraka".to_string());
    h.service.queue_donation_receipt(&receipt).await.unwrap();

    wait_until(|| h.provider.sent().len() == 1).await;
    let sent = h.provider.sent();
    assert_eq!(sent[0].to_email, "donor@example.com");
    assert!(sent[0].html_body.contains("2500 KES"));
    // No consumer runs on sms_receipts here.
    assert_eq!(h.broker.queue_len("sms_receipts"), 1);
}
