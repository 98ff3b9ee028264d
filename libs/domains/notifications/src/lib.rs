//! Notifications Domain
//!
//! Verification emails and donation receipts for Donate Hub, delivered
//! through the broker with delayed retries and a dead-letter queue.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │ NotificationService │  ← publishes events
//! └──────────┬──────────┘
//!            │
//! ┌──────────▼──────────┐
//! │ notifications (topic)│ ── email.verification ──► email.verification_queue
//! └──────────┬──────────┘                                    │
//!            │ TTL 10s                                       ▼
//!  email_verification_retry_queue ◄── retry ── VerificationEmailProcessor
//!                                                            │ x-retry > 3
//!                                                            ▼
//!                                   dlx.notifications ──► email_verification_dlq
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{NotificationConfig, NotificationService};
//!
//! let service = NotificationService::new(broker, NotificationConfig::from_env()?);
//! service
//!     .queue_verification_email(Some(tenant_id), &email, Some(&name), &token, logo_url)
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod processor;
pub mod providers;
pub mod queues;
pub mod service;
pub mod templates;

pub use config::NotificationConfig;
pub use error::{NotificationError, NotificationResult};
pub use models::{DonationReceipt, RoutingKey, VerificationEmail};
pub use processor::{ReceiptEmailProcessor, SmsReceiptProcessor, VerificationEmailProcessor};
pub use providers::{EmailContent, EmailProvider, RecordingEmailProvider, SentEmail, SmtpConfig, SmtpProvider};
pub use queues::{
    notification_topology, EmailReceiptQueue, EmailVerificationQueue, SmsReceiptQueue,
    DONATION_EVENTS_EXCHANGE, NOTIFICATIONS_EXCHANGE,
};
pub use service::{verification_url, NotificationService};
pub use templates::{TemplateEngine, TemplateRenderer};
