//! Data models for the notifications domain.

use queue_worker::QueueJob;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use strum::{AsRefStr, Display, EnumString};

/// Routing keys understood by notification consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
pub enum RoutingKey {
    /// Account email verification, consumed from `email.verification_queue`.
    #[strum(serialize = "email.verification")]
    EmailVerification,
    /// Donation receipt, fanned out to the email and SMS receipt queues.
    #[strum(serialize = "donation.receipt")]
    DonationReceipt,
}

// ============================================================================
// Events
// ============================================================================

/// Verification email request.
///
/// Fields other than the ones below are kept in `extra` so a message can be
/// republished or inspected without losing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationEmail {
    /// Recipient address.
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Full link the recipient clicks to verify.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VerificationEmail {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            verification_url: None,
            logo_url: None,
            tenant_id: None,
            extra: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_verification_url(mut self, url: impl Into<String>) -> Self {
        self.verification_url = Some(url.into());
        self
    }

    pub fn with_logo_url(mut self, url: impl Into<String>) -> Self {
        self.logo_url = Some(url.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

impl QueueJob for VerificationEmail {
    fn job_key(&self) -> String {
        self.email.clone()
    }
}

fn default_currency() -> String {
    "KES".to_string()
}

/// A completed donation, fanned out to receipt consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationReceipt {
    pub donor_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donor_phone: Option<String>,
    /// Amount as sent by the payment flow (integer or decimal).
    pub amount: Number,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DonationReceipt {
    pub fn new(donor_email: impl Into<String>, amount: impl Into<Number>) -> Self {
        Self {
            donor_email: donor_email.into(),
            donor_name: None,
            donor_phone: None,
            amount: amount.into(),
            currency: default_currency(),
            campaign_title: None,
            tenant_id: None,
            extra: Map::new(),
        }
    }

    /// Amount with currency, e.g. `1500 KES`.
    pub fn display_amount(&self) -> String {
        format!("{} {}", self.amount, self.currency)
    }

    /// One-line SMS text for the receipt.
    pub fn sms_text(&self, brand_name: &str) -> String {
        let greeting = self
            .donor_name
            .as_deref()
            .map(|name| format!("Hi {}, thank you", name))
            .unwrap_or_else(|| "Thank you".to_string());

        match &self.campaign_title {
            Some(campaign) => format!(
                "{} for donating {} to {}. - {}",
                greeting,
                self.display_amount(),
                campaign,
                brand_name
            ),
            None => format!(
                "{} for donating {}. - {}",
                greeting,
                self.display_amount(),
                brand_name
            ),
        }
    }
}

impl QueueJob for DonationReceipt {
    fn job_key(&self) -> String {
        self.donor_email.clone()
    }
}
