//! Broker topology for notification queues.

use queue_worker::{ExchangeKind, QueueDef, RetrySpec, Topology};

/// Topic exchange all notification events are published to.
pub const NOTIFICATIONS_EXCHANGE: &str = "notifications";

/// Fanout exchange for completed donations.
pub const DONATION_EVENTS_EXCHANGE: &str = "donation_events";

/// Verification emails: delayed retry through a TTL queue, DLQ after 3 retries.
pub struct EmailVerificationQueue;

impl QueueDef for EmailVerificationQueue {
    const EXCHANGE: &'static str = NOTIFICATIONS_EXCHANGE;
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

/// Donation receipts delivered by email.
pub struct EmailReceiptQueue;

impl QueueDef for EmailReceiptQueue {
    const EXCHANGE: &'static str = DONATION_EVENTS_EXCHANGE;
    const EXCHANGE_KIND: ExchangeKind = ExchangeKind::Fanout;
    const ROUTING_KEY: &'static str = "";
    const QUEUE: &'static str = "email_requests";
}

/// Donation receipts delivered by SMS.
pub struct SmsReceiptQueue;

impl QueueDef for SmsReceiptQueue {
    const EXCHANGE: &'static str = DONATION_EVENTS_EXCHANGE;
    const EXCHANGE_KIND: ExchangeKind = ExchangeKind::Fanout;
    const ROUTING_KEY: &'static str = "";
    const QUEUE: &'static str = "sms_receipts";
}

/// Everything the notification worker consumes from.
pub fn notification_topology() -> Topology {
    EmailVerificationQueue::topology()
        .merge(EmailReceiptQueue::topology())
        .merge(SmsReceiptQueue::topology())
}
