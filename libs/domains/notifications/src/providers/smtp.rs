//! SMTP email provider implementation using lettre.
//!
//! Plain SMTP is used unless `MAIL_STARTTLS` is set, which suits local
//! MailHog/Mailpit setups.

use super::{EmailContent, EmailProvider, SentEmail};
use crate::config::DEFAULT_BRAND_NAME;
use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use core_config::{env_or_default, env_parse, ConfigError, FromEnv};
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// SMTP configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Sender email address.
    pub from_email: String,
    /// Sender name.
    pub from_name: String,
    /// SMTP username (optional for dev servers like Mailpit).
    pub username: Option<String>,
    /// SMTP password (optional for dev servers like Mailpit).
    pub password: Option<String>,
    /// Upgrade the connection with STARTTLS.
    pub starttls: bool,
}

impl SmtpConfig {
    /// Create a new SMTP configuration.
    pub fn new(host: String, port: u16, from_email: String, from_name: String) -> Self {
        Self {
            host,
            port,
            from_email,
            from_name,
            username: None,
            password: None,
            starttls: false,
        }
    }

    /// Builder method to enable STARTTLS.
    pub fn with_starttls(mut self, starttls: bool) -> Self {
        self.starttls = starttls;
        self
    }

    /// Builder method to set credentials.
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }
}

impl FromEnv for SmtpConfig {
    /// Reads the `MAIL_*` variables.
    fn from_env() -> Result<Self, ConfigError> {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let starttls = matches!(
            env_or_default("MAIL_STARTTLS", "false").to_lowercase().as_str(),
            "true" | "1" | "yes"
        );

        Ok(Self {
            host: env_or_default("MAIL_SERVER", "localhost"),
            port: env_parse("MAIL_PORT", 1025)?,
            from_email: env_or_default("MAIL_FROM", "noreply@localhost"),
            from_name: env_or_default("MAIL_FROM_NAME", DEFAULT_BRAND_NAME),
            username: non_empty("MAIL_USERNAME"),
            password: non_empty("MAIL_PASSWORD"),
            starttls,
        })
    }
}

/// SMTP email provider.
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: Arc<SmtpConfig>,
}

impl SmtpProvider {
    /// Create a new SMTP provider.
    pub fn new(config: SmtpConfig) -> NotificationResult<Self> {
        let transport = Self::build_transport(&config)?;
        Ok(Self {
            transport,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    fn build_transport(
        config: &SmtpConfig,
    ) -> NotificationResult<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host).map_err(|e| {
                NotificationError::ProviderError(format!("Failed to create SMTP relay: {}", e))
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        }
        .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    /// Build a lettre Message from EmailContent.
    fn build_message(&self, email: &EmailContent) -> NotificationResult<Message> {
        let from = Mailbox::new(
            Some(self.config.from_name.clone()),
            self.config.from_email.parse().map_err(|e| {
                NotificationError::ConfigError(format!("Invalid from address: {}", e))
            })?,
        );

        let to_address = email
            .to_email
            .parse()
            .map_err(|e| NotificationError::InvalidEmail(format!("{}: {}", email.to_email, e)))?;
        let to_name = (!email.to_name.is_empty()).then(|| email.to_name.clone());
        let to = Mailbox::new(to_name, to_address);

        let mut builder = Message::builder().from(from).to(to).subject(&email.subject);

        if let Some(reply_to) = &email.reply_to {
            let reply_to_mailbox: Mailbox = reply_to.parse().map_err(|e| {
                NotificationError::ConfigError(format!("Invalid reply-to address: {}", e))
            })?;
            builder = builder.reply_to(reply_to_mailbox);
        }

        let html = SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone());

        let message = if email.text_body.is_empty() {
            builder.singlepart(html)
        } else {
            builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text_body.clone()),
                    )
                    .singlepart(html),
            )
        }
        .map_err(|e| NotificationError::ProviderError(format!("Failed to build email: {}", e)))?;

        Ok(message)
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &EmailContent) -> NotificationResult<SentEmail> {
        debug!(
            to = %email.to_email,
            subject = %email.subject,
            host = %self.config.host,
            port = %self.config.port,
            "Sending email via SMTP"
        );

        let message = self.build_message(email)?;

        let response = self.transport.send(message).await.map_err(|e| {
            error!(to = %email.to_email, error = %e, "Failed to send email via SMTP");
            NotificationError::ProviderError(format!("SMTP send failed: {}", e))
        })?;

        let message_id = response.message().next().map(|s| s.to_string());

        info!(
            to = %email.to_email,
            message_id = ?message_id,
            "Email sent via SMTP"
        );

        Ok(SentEmail {
            message_id,
            accepted: response.is_positive(),
        })
    }

    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        self.transport.test_connection().await.map_err(|e| {
            NotificationError::ProviderError(format!("SMTP health check failed: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIL_VARS: [&str; 7] = [
        "MAIL_SERVER",
        "MAIL_PORT",
        "MAIL_USERNAME",
        "MAIL_PASSWORD",
        "MAIL_FROM",
        "MAIL_FROM_NAME",
        "MAIL_STARTTLS",
    ];

    #[test]
    fn test_smtp_config_defaults() {
        temp_env::with_vars(MAIL_VARS.map(|k| (k, None::<&str>)), || {
            let config = SmtpConfig::from_env().unwrap();
            assert_eq!(config.host, "localhost");
            assert_eq!(config.port, 1025);
            assert_eq!(config.from_email, "noreply@localhost");
            assert_eq!(config.from_name, "Donate Hub");
            assert!(config.username.is_none());
            assert!(!config.starttls);
        });
    }

    #[test]
    fn test_smtp_config_from_env() {
        temp_env::with_vars(
            [
                ("MAIL_SERVER", Some("smtp.example.com")),
                ("MAIL_PORT", Some("587")),
                ("MAIL_USERNAME", Some("mailer")),
                ("MAIL_PASSWORD", Some("secret")),
                ("MAIL_FROM", Some("hello@example.com")),
                ("MAIL_FROM_NAME", Some("Example")),
                ("MAIL_STARTTLS", Some("True")),
            ],
            || {
                let config = SmtpConfig::from_env().unwrap();
                assert_eq!(
                    config,
                    SmtpConfig::new(
                        "smtp.example.com".to_string(),
                        587,
                        "hello@example.com".to_string(),
                        "Example".to_string(),
                    )
                    .with_starttls(true)
                    .with_credentials("mailer".to_string(), "secret".to_string())
                );
            },
        );
    }

    #[test]
    fn test_smtp_config_rejects_bad_port() {
        temp_env::with_var("MAIL_PORT", Some("smtp"), || {
            assert!(SmtpConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_message_rejects_bad_recipient() {
        let provider = SmtpProvider::new(SmtpConfig::new(
            "localhost".to_string(),
            1025,
            "noreply@localhost".to_string(),
            "Donate Hub".to_string(),
        ))
        .unwrap();

        let email = EmailContent {
            to_email: "not an address".to_string(),
            subject: "Hi".to_string(),
            html_body: "<p>Hi</p>".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            provider.build_message(&email),
            Err(NotificationError::InvalidEmail(_))
        ));
    }

    #[test]
    fn test_message_builds_html_only_and_alternative() {
        let provider = SmtpProvider::new(SmtpConfig::new(
            "localhost".to_string(),
            1025,
            "noreply@localhost".to_string(),
            "Donate Hub".to_string(),
        ))
        .unwrap();

        let mut email = EmailContent {
            to_email: "amina@example.com".to_string(),
            to_name: "Amina".to_string(),
            subject: "Verify your email address".to_string(),
            html_body: "<p>Hi</p>".to_string(),
            ..Default::default()
        };
        let html_only = String::from_utf8(provider.build_message(&email).unwrap().formatted())
            .unwrap();
        assert!(html_only.contains("text/html"));
        assert!(!html_only.contains("multipart/alternative"));

        email.text_body = "Hi".to_string();
        let both =
            String::from_utf8(provider.build_message(&email).unwrap().formatted()).unwrap();
        assert!(both.contains("multipart/alternative"));
        assert!(both.contains("text/plain"));
    }
}
