//! Message processors for the notification queues.
//!
//! Each processor implements `MessageProcessor` for one payload type. Errors
//! are returned as `QueueError` so the worker can retry or dead-letter.

use crate::config::NotificationConfig;
use crate::error::{NotificationError, NotificationResult};
use crate::models::{DonationReceipt, VerificationEmail};
use crate::providers::{EmailContent, EmailProvider};
use crate::templates::{self, TemplateRenderer};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use queue_worker::{MessageProcessor, QueueError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use validator::ValidateEmail;

pub const VERIFICATION_SUBJECT: &str = "Verify your email address";
pub const RECEIPT_SUBJECT: &str = "Thank you for your donation";

fn ensure_valid_email(email: &str) -> NotificationResult<()> {
    if email.validate_email() {
        Ok(())
    } else {
        Err(NotificationError::InvalidEmail(email.to_string()))
    }
}

/// Renders a template pair and hands the result to the provider.
///
/// A response with `accepted == false` is a provider failure.
async fn render_and_send(
    provider: &dyn EmailProvider,
    templates: &dyn TemplateRenderer,
    (html_template, text_template): (&str, &str),
    context: &Value,
    mut email: EmailContent,
) -> NotificationResult<Option<String>> {
    email.html_body = templates.render(html_template, context)?;
    email.text_body = templates.render(text_template, context)?;

    let sent = provider.send(&email).await?;
    if !sent.accepted {
        return Err(NotificationError::ProviderError(format!(
            "{} did not accept email to {}",
            provider.name(),
            email.to_email
        )));
    }
    Ok(sent.message_id)
}

// ============================================================================
// Verification emails
// ============================================================================

/// Sends the account verification email.
pub struct VerificationEmailProcessor {
    provider: Arc<dyn EmailProvider>,
    templates: Arc<dyn TemplateRenderer>,
    config: NotificationConfig,
}

impl VerificationEmailProcessor {
    pub fn new(
        provider: Arc<dyn EmailProvider>,
        templates: Arc<dyn TemplateRenderer>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            provider,
            templates,
            config,
        }
    }

    /// Template context for one event. Missing fields fall back to defaults.
    pub fn context(&self, job: &VerificationEmail) -> Value {
        json!({
            "user": {
                "name": job.name.as_deref().unwrap_or("User"),
            },
            "verification_url": job
                .verification_url
                .as_deref()
                .unwrap_or(&self.config.frontend_url),
            "logo_url": job.logo_url.as_deref().unwrap_or(""),
            "brand_name": self.config.brand_name,
            "support_email": self.config.support_email,
            "now_year": Utc::now().year(),
        })
    }

    async fn send(&self, job: &VerificationEmail) -> NotificationResult<()> {
        ensure_valid_email(&job.email)?;

        let email = EmailContent {
            to_email: job.email.clone(),
            to_name: job.name.clone().unwrap_or_default(),
            subject: VERIFICATION_SUBJECT.to_string(),
            ..Default::default()
        };

        let message_id = render_and_send(
            self.provider.as_ref(),
            self.templates.as_ref(),
            (templates::EMAIL_VERIFICATION, templates::EMAIL_VERIFICATION_TEXT),
            &self.context(job),
            email,
        )
        .await?;

        info!(
            to = %job.email,
            tenant_id = ?job.tenant_id,
            message_id = ?message_id,
            "Verification email sent"
        );
        Ok(())
    }
}

#[async_trait]
impl MessageProcessor<VerificationEmail> for VerificationEmailProcessor {
    async fn process(&self, job: &VerificationEmail) -> Result<(), QueueError> {
        self.send(job).await.map_err(Into::into)
    }

    fn name(&self) -> &'static str {
        "verification_email"
    }

    async fn health_check(&self) -> Result<bool, QueueError> {
        self.provider.health_check().await.map_err(Into::into)
    }
}

// ============================================================================
// Donation receipts
// ============================================================================

/// Emails a donation receipt to the donor.
pub struct ReceiptEmailProcessor {
    provider: Arc<dyn EmailProvider>,
    templates: Arc<dyn TemplateRenderer>,
    config: NotificationConfig,
}

impl ReceiptEmailProcessor {
    pub fn new(
        provider: Arc<dyn EmailProvider>,
        templates: Arc<dyn TemplateRenderer>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            provider,
            templates,
            config,
        }
    }

    pub fn context(&self, job: &DonationReceipt) -> Value {
        json!({
            "donor": {
                "name": job.donor_name.as_deref().unwrap_or("Friend"),
            },
            "amount": job.display_amount(),
            "campaign_title": job.campaign_title,
            "brand_name": self.config.brand_name,
            "support_email": self.config.support_email,
            "now_year": Utc::now().year(),
        })
    }
}

#[async_trait]
impl MessageProcessor<DonationReceipt> for ReceiptEmailProcessor {
    async fn process(&self, job: &DonationReceipt) -> Result<(), QueueError> {
        ensure_valid_email(&job.donor_email)?;

        let email = EmailContent {
            to_email: job.donor_email.clone(),
            to_name: job.donor_name.clone().unwrap_or_default(),
            subject: RECEIPT_SUBJECT.to_string(),
            ..Default::default()
        };

        let message_id = render_and_send(
            self.provider.as_ref(),
            self.templates.as_ref(),
            (templates::DONATION_RECEIPT, templates::DONATION_RECEIPT_TEXT),
            &self.context(job),
            email,
        )
        .await?;

        info!(
            to = %job.donor_email,
            amount = %job.display_amount(),
            message_id = ?message_id,
            "Donation receipt emailed"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "receipt_email"
    }

    async fn health_check(&self) -> Result<bool, QueueError> {
        self.provider.health_check().await.map_err(Into::into)
    }
}

/// Logs the SMS receipt text. No SMS gateway is wired in yet.
pub struct SmsReceiptProcessor {
    brand_name: String,
}

impl SmsReceiptProcessor {
    pub fn new(brand_name: impl Into<String>) -> Self {
        Self {
            brand_name: brand_name.into(),
        }
    }
}

#[async_trait]
impl MessageProcessor<DonationReceipt> for SmsReceiptProcessor {
    async fn process(&self, job: &DonationReceipt) -> Result<(), QueueError> {
        let Some(phone) = job.donor_phone.as_deref() else {
            info!(donor = %job.donor_email, "No phone number on receipt, skipping SMS");
            return Ok(());
        };

        info!(
            phone = %phone,
            text = %job.sms_text(&self.brand_name),
            "SMS receipt"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sms_receipt"
    }
}
