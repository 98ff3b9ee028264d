//! In-memory provider that records every email instead of sending it.

use super::{EmailContent, EmailProvider, SentEmail};
use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Records sends, optionally failing the first `fail_times` attempts.
#[derive(Debug, Default)]
pub struct RecordingEmailProvider {
    sent: Mutex<Vec<EmailContent>>,
    attempts: AtomicUsize,
    fail_times: usize,
}

impl RecordingEmailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `fail_times` sends with a provider error.
    pub fn failing(fail_times: usize) -> Self {
        Self {
            fail_times,
            ..Self::default()
        }
    }

    /// Emails accepted so far.
    pub fn sent(&self) -> Vec<EmailContent> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Every call to `send`, failed or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailProvider for RecordingEmailProvider {
    async fn send(&self, email: &EmailContent) -> NotificationResult<SentEmail> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_times {
            return Err(NotificationError::ProviderError(format!(
                "simulated failure {} of {}",
                attempt + 1,
                self.fail_times
            )));
        }

        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotificationError::ProviderError("recorder poisoned".to_string()))?;
        sent.push(email.clone());

        Ok(SentEmail {
            message_id: Some(format!("recorded-{}", sent.len())),
            accepted: true,
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        Ok(true)
    }
}
