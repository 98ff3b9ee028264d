//! Worker tuning read from the environment.

use core_config::{env_parse, ConfigError, FromEnv};
use queue_worker::{FailurePolicy, WorkerConfig, DEFAULT_ATTEMPT_TIMEOUT};
use std::time::Duration;

/// Settings shared by every queue consumer in this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub attempt_timeout: Duration,
    pub prefetch: u16,
    pub failure_policy: FailurePolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            prefetch: 1,
            failure_policy: FailurePolicy::Uniform,
        }
    }
}

impl FromEnv for WorkerSettings {
    /// Reads from environment variables:
    /// - EMAIL_ATTEMPT_TIMEOUT_SECS: defaults to 30
    /// - WORKER_PREFETCH: defaults to 1
    /// - NOTIFICATION_FAILURE_POLICY: `uniform` (default) or `classified`
    fn from_env() -> Result<Self, ConfigError> {
        let timeout_secs: u64 =
            env_parse("EMAIL_ATTEMPT_TIMEOUT_SECS", DEFAULT_ATTEMPT_TIMEOUT.as_secs())?;
        let prefetch: u16 = env_parse("WORKER_PREFETCH", 1)?;

        if timeout_secs == 0 || prefetch == 0 {
            return Err(ConfigError::ParseError {
                key: if timeout_secs == 0 {
                    "EMAIL_ATTEMPT_TIMEOUT_SECS".to_string()
                } else {
                    "WORKER_PREFETCH".to_string()
                },
                details: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            attempt_timeout: Duration::from_secs(timeout_secs),
            prefetch,
            failure_policy: env_parse("NOTIFICATION_FAILURE_POLICY", FailurePolicy::Uniform)?,
        })
    }
}

impl WorkerSettings {
    /// Apply these settings on top of a queue's own configuration.
    pub fn apply(&self, config: WorkerConfig) -> WorkerConfig {
        config
            .with_prefetch(self.prefetch)
            .with_attempt_timeout(self.attempt_timeout)
            .with_failure_policy(self.failure_policy)
    }
}
