//! In-process broker with RabbitMQ routing semantics.
//!
//! Supports direct, topic and fanout exchanges, the default exchange,
//! per-queue message TTL with dead-lettering, prefetch limits and
//! redelivery of unacknowledged messages when a consumer goes away.
//! TTL expiry runs on tokio timers, so tests can drive it with a paused clock.
//!
//! Must be used from within a tokio runtime.

use crate::broker::{DeliveryStream, MessageBroker};
use crate::error::BrokerError;
use crate::message::{Acknowledger, Delivery, MessageHeaders, OutgoingMessage};
use crate::topology::{BindingSpec, ExchangeKind, ExchangeSpec, QueueArguments, QueueSpec, Topology};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// A message sitting in a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub body: Vec<u8>,
    pub headers: MessageHeaders,
    pub exchange: String,
    pub routing_key: String,
    pub persistent: bool,
    pub redelivered: bool,
}

/// A message accepted by `publish`, recorded in publish order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub message: OutgoingMessage,
}

struct QueuedEntry {
    id: u64,
    message: StoredMessage,
}

struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<QueuedEntry>,
}

struct Unacked {
    queue: String,
    consumer: u64,
    entry: QueuedEntry,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<BindingSpec>,
    unacked: HashMap<u64, Unacked>,
    published: Vec<PublishedMessage>,
    next_message_id: u64,
    next_delivery_tag: u64,
    next_consumer_id: u64,
    failing_publishes: u32,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

/// In-memory [`MessageBroker`].
///
/// Cloning shares the same broker state.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Number of messages ready for delivery in `queue`.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Ready messages in `queue`, head first.
    pub fn queue_messages(&self, queue: &str) -> Vec<StoredMessage> {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|e| e.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Deliveries handed to consumers and not yet settled.
    pub fn unacked_count(&self) -> usize {
        self.shared.lock().unacked.len()
    }

    /// Every message accepted by `publish`, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.shared.lock().published.clone()
    }

    /// Messages accepted by `publish` for one exchange.
    pub fn published_to(&self, exchange: &str) -> Vec<PublishedMessage> {
        self.shared
            .lock()
            .published
            .iter()
            .filter(|p| p.exchange == exchange)
            .cloned()
            .collect()
    }

    /// Make the next `count` publishes fail.
    pub fn fail_next_publishes(&self, count: u32) {
        self.shared.lock().failing_publishes = count;
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route a message through `exchange`; returns the number of queues it reached.
    fn route(
        self: &Arc<Self>,
        state: &mut State,
        exchange: &str,
        routing_key: &str,
        message: StoredMessage,
    ) -> Result<usize, BrokerError> {
        let targets: Vec<String> = if exchange.is_empty() {
            if state.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            }
        } else {
            let kind = state
                .exchanges
                .get(exchange)
                .map(|e| e.kind)
                .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;

            let mut targets = Vec::new();
            for binding in state.bindings.iter().filter(|b| b.exchange == exchange) {
                let matched = match kind {
                    ExchangeKind::Fanout => true,
                    ExchangeKind::Direct => binding.routing_key == routing_key,
                    ExchangeKind::Topic => topic_matches(&binding.routing_key, routing_key),
                };
                if matched && !targets.contains(&binding.queue) {
                    targets.push(binding.queue.clone());
                }
            }
            targets
        };

        if targets.is_empty() {
            debug!(exchange = %exchange, routing_key = %routing_key, "Message unroutable, dropped");
        }

        for queue in &targets {
            self.enqueue(state, queue, message.clone());
        }
        Ok(targets.len())
    }

    fn enqueue(self: &Arc<Self>, state: &mut State, queue: &str, message: StoredMessage) {
        state.next_message_id += 1;
        let id = state.next_message_id;

        let Some(target) = state.queues.get_mut(queue) else {
            return;
        };

        if let Some(ttl_ms) = target.spec.arguments.message_ttl_ms {
            let shared = Arc::clone(self);
            let queue = queue.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(u64::from(ttl_ms))).await;
                shared.expire(&queue, id);
            });
        }

        target.ready.push_back(QueuedEntry { id, message });
        self.notify.notify_waiters();
    }

    /// Dead-letter message `id` if it is still waiting in `queue`.
    fn expire(self: &Arc<Self>, queue: &str, id: u64) {
        let mut state = self.lock();
        let Some(target) = state.queues.get_mut(queue) else {
            return;
        };
        let Some(position) = target.ready.iter().position(|e| e.id == id) else {
            return;
        };
        let Some(entry) = target.ready.remove(position) else {
            return;
        };
        let arguments = target.spec.arguments.clone();

        debug!(queue = %queue, "Message TTL expired");
        self.dead_letter(&mut state, queue, &arguments, entry.message);
    }

    fn dead_letter(
        self: &Arc<Self>,
        state: &mut State,
        queue: &str,
        arguments: &QueueArguments,
        mut message: StoredMessage,
    ) {
        let Some(exchange) = arguments.dead_letter_exchange.clone() else {
            debug!(queue = %queue, "No dead-letter exchange, message dropped");
            return;
        };
        let routing_key = arguments
            .dead_letter_routing_key
            .clone()
            .unwrap_or_else(|| message.routing_key.clone());

        message.exchange = exchange.clone();
        message.routing_key = routing_key.clone();
        message.redelivered = false;

        if let Err(e) = self.route(state, &exchange, &routing_key, message) {
            warn!(queue = %queue, error = %e, "Failed to dead-letter message");
        }
    }

    fn take(
        self: &Arc<Self>,
        state: &mut State,
        queue: &str,
        consumer: u64,
        prefetch: u16,
    ) -> Option<Delivery> {
        if prefetch > 0 {
            let in_flight = state
                .unacked
                .values()
                .filter(|u| u.consumer == consumer)
                .count();
            if in_flight >= usize::from(prefetch) {
                return None;
            }
        }

        let entry = state.queues.get_mut(queue)?.ready.pop_front()?;
        state.next_delivery_tag += 1;
        let delivery_tag = state.next_delivery_tag;

        let message = &entry.message;
        let delivery = Delivery::new(
            delivery_tag,
            message.body.clone(),
            message.headers.clone(),
            message.exchange.clone(),
            message.routing_key.clone(),
            message.redelivered,
            Box::new(MemoryAcker {
                shared: Arc::clone(self),
                delivery_tag,
            }),
        );

        state.unacked.insert(
            delivery_tag,
            Unacked {
                queue: queue.to_string(),
                consumer,
                entry,
            },
        );
        Some(delivery)
    }

    fn requeue(state: &mut State, unacked: Unacked) {
        let mut entry = unacked.entry;
        entry.message.redelivered = true;
        if let Some(queue) = state.queues.get_mut(&unacked.queue) {
            queue.ready.push_front(entry);
        }
    }

    fn settle(self: &Arc<Self>, delivery_tag: u64, requeue: Option<bool>) -> Result<(), BrokerError> {
        let mut state = self.lock();
        let unacked = state
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| BrokerError::Ack(format!("unknown delivery tag {}", delivery_tag)))?;

        match requeue {
            None => {}
            Some(true) => Self::requeue(&mut state, unacked),
            Some(false) => {
                let arguments = state
                    .queues
                    .get(&unacked.queue)
                    .map(|q| q.spec.arguments.clone())
                    .unwrap_or_default();
                self.dead_letter(&mut state, &unacked.queue, &arguments, unacked.entry.message);
            }
        }

        self.notify.notify_waiters();
        Ok(())
    }
}

fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let words: Vec<&str> = routing_key.split('.').collect();
    topic_words_match(&pattern, &words)
}

fn topic_words_match(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => (0..=words.len()).any(|skip| topic_words_match(rest, &words[skip..])),
        Some((&"*", rest)) => !words.is_empty() && topic_words_match(rest, &words[1..]),
        Some((word, rest)) => words.first() == Some(word) && topic_words_match(rest, &words[1..]),
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare(&self, topology: &Topology) -> Result<(), BrokerError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }

        for exchange in &topology.exchanges {
            match state.exchanges.get(&exchange.name) {
                Some(existing) if existing != exchange => {
                    return Err(BrokerError::Declare {
                        kind: "exchange",
                        name: exchange.name.clone(),
                        details: "inequivalent arguments".to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    state.exchanges.insert(exchange.name.clone(), exchange.clone());
                }
            }
        }

        for queue in &topology.queues {
            match state.queues.get(&queue.name) {
                Some(existing) if existing.spec != *queue => {
                    return Err(BrokerError::Declare {
                        kind: "queue",
                        name: queue.name.clone(),
                        details: "inequivalent arguments".to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    state.queues.insert(
                        queue.name.clone(),
                        QueueState {
                            spec: queue.clone(),
                            ready: VecDeque::new(),
                        },
                    );
                }
            }
        }

        for binding in &topology.bindings {
            if !state.exchanges.contains_key(&binding.exchange) {
                return Err(BrokerError::UnknownExchange(binding.exchange.clone()));
            }
            if !state.queues.contains_key(&binding.queue) {
                return Err(BrokerError::UnknownQueue(binding.queue.clone()));
            }
            if !state.bindings.contains(binding) {
                state.bindings.push(binding.clone());
            }
        }

        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutgoingMessage,
    ) -> Result<(), BrokerError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(BrokerError::Publish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                details: "injected failure".to_string(),
            });
        }

        let stored = StoredMessage {
            body: message.body.clone(),
            headers: message.headers.clone(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            persistent: message.persistent,
            redelivered: false,
        };
        self.shared.route(&mut state, exchange, routing_key, stored)?;

        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            message,
        });
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<Box<dyn DeliveryStream>, BrokerError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }

        state.next_consumer_id += 1;
        debug!(queue = %queue, consumer_tag = %consumer_tag, "Consumer registered");

        Ok(Box::new(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            queue: queue.to_string(),
            consumer: state.next_consumer_id,
            prefetch,
        }))
    }

    fn is_connected(&self) -> bool {
        !self.shared.lock().closed
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.shared.lock().closed = true;
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

struct MemoryConsumer {
    shared: Arc<Shared>,
    queue: String,
    consumer: u64,
    prefetch: u16,
}

#[async_trait]
impl DeliveryStream for MemoryConsumer {
    async fn next(&mut self) -> Option<Result<Delivery, BrokerError>> {
        loop {
            // Registered before checking state so a concurrent publish is not missed.
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.lock();
                if state.closed {
                    return None;
                }
                if let Some(delivery) =
                    self.shared
                        .take(&mut state, &self.queue, self.consumer, self.prefetch)
                {
                    return Some(Ok(delivery));
                }
            }
            notified.await;
        }
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        let mut tags: Vec<u64> = state
            .unacked
            .iter()
            .filter(|(_, u)| u.consumer == self.consumer)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();

        // Newest first so the oldest ends up at the head of the queue.
        for tag in tags.into_iter().rev() {
            if let Some(unacked) = state.unacked.remove(&tag) {
                Shared::requeue(&mut state, unacked);
            }
        }
        drop(state);
        self.shared.notify.notify_waiters();
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    delivery_tag: u64,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.shared.settle(self.delivery_tag, None)
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.shared.settle(self.delivery_tag, Some(requeue))
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.shared.settle(self.delivery_tag, Some(requeue))
    }
}
