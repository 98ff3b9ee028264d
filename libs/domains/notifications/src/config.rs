//! Branding and link configuration shared by the publisher and the worker.

use core_config::{env_or_default, ConfigError, FromEnv};

pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
pub const DEFAULT_BRAND_NAME: &str = "Donate Hub";
pub const DEFAULT_SUPPORT_EMAIL: &str = "support@fazilabs.com";

/// Values rendered into every notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    /// Base URL of the web app; verification links point here.
    pub frontend_url: String,
    pub brand_name: String,
    pub support_email: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            frontend_url: DEFAULT_FRONTEND_URL.to_string(),
            brand_name: DEFAULT_BRAND_NAME.to_string(),
            support_email: DEFAULT_SUPPORT_EMAIL.to_string(),
        }
    }
}

impl FromEnv for NotificationConfig {
    /// Reads `FRONTEND_URL`, `BRAND_NAME` and `SUPPORT_EMAIL`.
    fn from_env() -> Result<Self, ConfigError> {
        let frontend_url = env_or_default("FRONTEND_URL", DEFAULT_FRONTEND_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            frontend_url,
            brand_name: env_or_default("BRAND_NAME", DEFAULT_BRAND_NAME),
            support_email: env_or_default("SUPPORT_EMAIL", DEFAULT_SUPPORT_EMAIL),
        })
    }
}
