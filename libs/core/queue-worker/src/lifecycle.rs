//! Per-message delivery lifecycle.
//!
//! ```text
//! Pending ──Received──▶ Processing ──Succeeded──▶ Delivered
//!    ▲                      │
//!    │                      ├─Failed, budget left──▶ Retrying ──RetryDelayElapsed──┐
//!    │                      │                                                      │
//!    └──────────────────────┼──────────────────────────────────────────────────────┘
//!                           └─Failed, budget spent──▶ DeadLettered
//! ```
//!
//! The transition function is pure; the worker maps the resulting state onto
//! broker actions (ack, republish to the retry queue, publish to the DLX).

use crate::error::ErrorCategory;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// How failures spend the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum FailurePolicy {
    /// Every failure consumes one retry, whatever its category.
    #[default]
    Uniform,
    /// Permanent failures are dead-lettered at once; transient ones retry.
    Classified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub failure_policy: FailurePolicy,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            failure_policy: FailurePolicy::Uniform,
        }
    }

    /// No retries: the first failure is final.
    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Whether a failure with `category` after `retry_count` retries gets another attempt.
    pub fn should_retry(&self, retry_count: u32, category: ErrorCategory) -> bool {
        if self.failure_policy == FailurePolicy::Classified && !category.is_retryable() {
            return false;
        }
        retry_count < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES)
    }
}

/// Where a message is in its lifecycle. `retry_count` is the value of `x-retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending { retry_count: u32 },
    Processing { retry_count: u32 },
    Delivered,
    /// Waiting in the retry queue; `retry_count` is the incremented value it carries.
    Retrying { retry_count: u32 },
    DeadLettered { retry_count: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEvent {
    Received,
    Succeeded,
    Failed(ErrorCategory),
    RetryDelayElapsed,
}

/// Terminal or parking outcome of one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Retrying,
    DeadLettered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid delivery transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: DeliveryState,
    pub event: DeliveryEvent,
}

impl DeliveryState {
    pub fn pending(retry_count: u32) -> Self {
        DeliveryState::Pending { retry_count }
    }

    pub fn transition(
        self,
        event: DeliveryEvent,
        policy: &RetryPolicy,
    ) -> Result<Self, InvalidTransition> {
        use DeliveryEvent::*;
        use DeliveryState::*;

        match (self, event) {
            (Pending { retry_count }, Received) => Ok(Processing { retry_count }),
            (Processing { .. }, Succeeded) => Ok(Delivered),
            (Processing { retry_count }, Failed(category)) => {
                if policy.should_retry(retry_count, category) {
                    Ok(Retrying {
                        retry_count: retry_count.saturating_add(1),
                    })
                } else {
                    Ok(DeadLettered { retry_count })
                }
            }
            (Retrying { retry_count }, RetryDelayElapsed) => Ok(Pending { retry_count }),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Delivered | DeliveryState::DeadLettered { .. })
    }

    pub fn outcome(&self) -> Option<DeliveryOutcome> {
        match self {
            DeliveryState::Delivered => Some(DeliveryOutcome::Delivered),
            DeliveryState::Retrying { .. } => Some(DeliveryOutcome::Retrying),
            DeliveryState::DeadLettered { .. } => Some(DeliveryOutcome::DeadLettered),
            DeliveryState::Pending { .. } | DeliveryState::Processing { .. } => None,
        }
    }
}
