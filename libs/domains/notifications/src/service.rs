//! Publisher-side facade used by registration and donation flows.

use crate::config::NotificationConfig;
use crate::error::NotificationResult;
use crate::models::{DonationReceipt, RoutingKey, VerificationEmail};
use crate::queues::{EmailReceiptQueue, EmailVerificationQueue};
use queue_worker::{MessageBroker, Publisher};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Frontend link a recipient opens to verify their address.
pub fn verification_url(base_url: &str, token: &str) -> String {
    format!(
        "{}/verify-email?token={}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(token)
    )
}

/// Queues notification events on the broker.
pub struct NotificationService {
    notifications: Publisher,
    donation_events: Publisher,
    config: NotificationConfig,
}

impl NotificationService {
    pub fn new(broker: Arc<dyn MessageBroker>, config: NotificationConfig) -> Self {
        Self {
            notifications: Publisher::for_queue_def::<EmailVerificationQueue>(Arc::clone(&broker)),
            donation_events: Publisher::for_queue_def::<EmailReceiptQueue>(broker),
            config,
        }
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Publish an event on the exchange its routing key is bound on.
    pub async fn publish<T>(&self, routing_key: RoutingKey, payload: &T) -> NotificationResult<()>
    where
        T: Serialize + ?Sized,
    {
        self.publisher_for(routing_key)
            .publish(routing_key.as_ref(), payload)
            .await?;
        Ok(())
    }

    fn publisher_for(&self, routing_key: RoutingKey) -> &Publisher {
        match routing_key {
            RoutingKey::EmailVerification => &self.notifications,
            RoutingKey::DonationReceipt => &self.donation_events,
        }
    }

    /// Queue the verification email for a newly registered account.
    pub async fn queue_verification_email(
        &self,
        tenant_id: Option<&str>,
        email: &str,
        name: Option<&str>,
        token: &str,
        logo_url: Option<&str>,
    ) -> NotificationResult<VerificationEmail> {
        let mut event = VerificationEmail::new(email)
            .with_verification_url(verification_url(&self.config.frontend_url, token));
        event.name = name.map(str::to_string);
        event.logo_url = logo_url.map(str::to_string);
        event.tenant_id = tenant_id.map(str::to_string);

        self.publish(RoutingKey::EmailVerification, &event).await?;

        info!(
            to = %email,
            tenant_id = ?tenant_id,
            "Queued verification email"
        );
        Ok(event)
    }

    /// Fan a completed donation out to the receipt consumers.
    pub async fn queue_donation_receipt(&self, receipt: &DonationReceipt) -> NotificationResult<()> {
        self.publish(RoutingKey::DonationReceipt, receipt).await?;

        info!(
            donor = %receipt.donor_email,
            amount = %receipt.display_amount(),
            "Queued donation receipt"
        );
        Ok(())
    }
}
