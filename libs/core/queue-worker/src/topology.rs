//! Broker topology types and queue definitions.
//!
//! This module provides:
//! - `ExchangeSpec`, `QueueSpec`, `BindingSpec` describing what must exist on the broker
//! - `Topology`, an ordered set of declarations applied by `MessageBroker::declare`
//! - `QueueDef` trait for domain-specific queue definitions
//! - `RetrySpec` for queues consumed with delayed retry and a dead-letter queue

use serde::Serialize;
use strum::{AsRefStr, Display};

/// AMQP exchange type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    Topic,
    Fanout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeSpec {
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
        }
    }

    pub fn transient(mut self) -> Self {
        self.durable = false;
        self
    }
}

/// Queue arguments understood by RabbitMQ (`x-message-ttl`, `x-dead-letter-*`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueArguments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_ttl_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_exchange: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_routing_key: Option<String>,
}

impl QueueArguments {
    pub fn is_empty(&self) -> bool {
        self.message_ttl_ms.is_none()
            && self.dead_letter_exchange.is_none()
            && self.dead_letter_routing_key.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub arguments: QueueArguments,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            arguments: QueueArguments::default(),
        }
    }

    /// Messages expire after `ttl_ms` and are dead-lettered.
    pub fn with_message_ttl(mut self, ttl_ms: u32) -> Self {
        self.arguments.message_ttl_ms = Some(ttl_ms);
        self
    }

    /// Route rejected or expired messages to `exchange` with `routing_key`.
    pub fn with_dead_letter(
        mut self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.arguments.dead_letter_exchange = Some(exchange.into());
        self.arguments.dead_letter_routing_key = Some(routing_key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingSpec {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// Exchanges, queues and bindings to declare, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<BindingSpec>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exchange(mut self, exchange: ExchangeSpec) -> Self {
        if !self.exchanges.iter().any(|e| e.name == exchange.name) {
            self.exchanges.push(exchange);
        }
        self
    }

    pub fn queue(mut self, queue: QueueSpec) -> Self {
        if !self.queues.iter().any(|q| q.name == queue.name) {
            self.queues.push(queue);
        }
        self
    }

    pub fn bind(
        mut self,
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        let binding = BindingSpec {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        };
        if !self.bindings.contains(&binding) {
            self.bindings.push(binding);
        }
        self
    }

    /// Combine two topologies, keeping the first declaration of each name.
    pub fn merge(self, other: Topology) -> Self {
        let mut merged = self;
        for exchange in other.exchanges {
            merged = merged.exchange(exchange);
        }
        for queue in other.queues {
            merged = merged.queue(queue);
        }
        for binding in other.bindings {
            merged = merged.bind(binding.queue, binding.exchange, binding.routing_key);
        }
        merged
    }

    pub fn find_queue(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|q| q.name == name)
    }

    pub fn find_exchange(&self, name: &str) -> Option<&ExchangeSpec> {
        self.exchanges.iter().find(|e| e.name == name)
    }
}

/// Delayed-retry and dead-letter routing for a consumed queue.
///
/// Failed messages are republished to the queue's exchange under
/// `retry_queue` (the retry queue is bound with its own name as routing key),
/// wait `retry_delay_ms` in that queue, then expire back onto the main
/// exchange. Once `max_retries` is spent they go to `dead_letter_exchange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySpec {
    pub retry_queue: &'static str,
    pub retry_delay_ms: u32,
    pub dead_letter_exchange: &'static str,
    pub dead_letter_queue: &'static str,
    pub max_retries: u32,
}

/// Queue definition trait.
///
/// Each domain implements this trait to define where its messages are
/// published and consumed.
///
/// # Example
///
/// ```rust,ignore
/// use queue_worker::{ExchangeKind, QueueDef, RetrySpec};
///
/// pub struct EmailVerificationQueue;
///
/// impl QueueDef for EmailVerificationQueue {
///     const EXCHANGE: &'static str = "notifications";
///     const ROUTING_KEY: &'static str = "email.verification";
///     const QUEUE: &'static str = "email.verification_queue";
///     const RETRY: Option<RetrySpec> = Some(RetrySpec { /* ... */ });
/// }
/// ```
pub trait QueueDef: Send + Sync + 'static {
    /// Exchange the queue is bound to.
    const EXCHANGE: &'static str;

    /// Exchange type.
    const EXCHANGE_KIND: ExchangeKind = ExchangeKind::Topic;

    /// Whether the exchange survives a broker restart.
    const EXCHANGE_DURABLE: bool = true;

    /// Binding key between exchange and queue (ignored by fanout exchanges).
    const ROUTING_KEY: &'static str;

    /// Queue consumed by the worker.
    const QUEUE: &'static str;

    /// Retry and dead-letter routing. `None` means failures are rejected.
    const RETRY: Option<RetrySpec> = None;

    /// Full topology required to publish to and consume from this queue.
    fn topology() -> Topology {
        let exchange = ExchangeSpec::new(Self::EXCHANGE, Self::EXCHANGE_KIND);
        let exchange = if Self::EXCHANGE_DURABLE {
            exchange
        } else {
            exchange.transient()
        };
        let topology = Topology::new().exchange(exchange);

        match Self::RETRY {
            None => topology
                .queue(QueueSpec::new(Self::QUEUE))
                .bind(Self::QUEUE, Self::EXCHANGE, Self::ROUTING_KEY),
            Some(retry) => topology
                .exchange(ExchangeSpec::new(retry.dead_letter_exchange, ExchangeKind::Topic))
                .queue(QueueSpec::new(retry.dead_letter_queue))
                .bind(
                    retry.dead_letter_queue,
                    retry.dead_letter_exchange,
                    Self::ROUTING_KEY,
                )
                .queue(
                    QueueSpec::new(retry.retry_queue)
                        .with_message_ttl(retry.retry_delay_ms)
                        .with_dead_letter(Self::EXCHANGE, Self::ROUTING_KEY),
                )
                .bind(retry.retry_queue, Self::EXCHANGE, retry.retry_queue)
                .queue(
                    QueueSpec::new(Self::QUEUE)
                        .with_dead_letter(retry.dead_letter_exchange, Self::ROUTING_KEY),
                )
                .bind(Self::QUEUE, Self::EXCHANGE, Self::ROUTING_KEY),
        }
    }
}
