//! The generic `QueueWorker`: consume, process, then ack, retry or dead-letter.

use crate::broker::MessageBroker;
use crate::config::WorkerConfig;
use crate::error::QueueError;
use crate::lifecycle::{DeliveryEvent, DeliveryOutcome, DeliveryState};
use crate::message::{Delivery, MessageHeaders, OutgoingMessage};
use crate::metrics::QueueMetrics;
use crate::processor::{MessageProcessor, QueueJob};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Generic queue worker that processes messages using a processor.
///
/// For every delivery the worker:
/// - decodes the JSON body into `J` and runs the processor under the attempt timeout
/// - acks on success
/// - on failure, republishes the unchanged body to the retry queue with
///   `x-retry` incremented, or publishes it to the dead-letter exchange once the
///   retry budget is spent, and only then acks the original
/// - nacks with requeue if that republish fails, so the message is never lost,
///   then pauses the consumer with the re-subscribe backoff before taking more work
///
/// Acks happen after the side effect, so delivery is at-least-once: a crash
/// between a successful send and the ack causes a redelivery and a second send.
///
/// # Type Parameters
///
/// * `J` - The message payload type (must implement `QueueJob`)
/// * `P` - The processor type (must implement `MessageProcessor<J>`)
pub struct QueueWorker<J, P>
where
    J: QueueJob,
    P: MessageProcessor<J>,
{
    broker: Arc<dyn MessageBroker>,
    processor: Arc<P>,
    config: WorkerConfig,
    metrics: QueueMetrics,
    _phantom: PhantomData<J>,
}

impl<J, P> QueueWorker<J, P>
where
    J: QueueJob + 'static,
    P: MessageProcessor<J> + 'static,
{
    /// Create a new queue worker.
    pub fn new(broker: Arc<dyn MessageBroker>, processor: P, config: WorkerConfig) -> Self {
        Self::with_arc_processor(broker, Arc::new(processor), config)
    }

    /// Create a new queue worker with an Arc processor.
    pub fn with_arc_processor(
        broker: Arc<dyn MessageBroker>,
        processor: Arc<P>,
        config: WorkerConfig,
    ) -> Self {
        let metrics = QueueMetrics::new(&config.queue, processor.name());
        Self {
            broker,
            processor,
            config,
            metrics,
            _phantom: PhantomData,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run the worker loop.
    ///
    /// Consumes until the shutdown receiver flips to `true`. A message being
    /// processed when shutdown arrives is settled before the loop exits. If the
    /// consumer fails or is cancelled by the broker, the worker re-subscribes
    /// with exponential backoff. A delivery that could not be settled (its
    /// retry or dead-letter republish failed) also pauses the consumer for the
    /// same backoff, so a broken publish path cannot turn into a resend loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        info!(
            queue = %self.config.queue,
            consumer_tag = %self.config.consumer_tag,
            processor = %self.processor.name(),
            broker = %self.broker.name(),
            prefetch = self.config.prefetch,
            max_retries = self.config.retry_policy.max_retries,
            failure_policy = %self.config.retry_policy.failure_policy,
            attempt_timeout_ms = self.config.attempt_timeout.as_millis() as u64,
            "Starting queue worker"
        );

        self.check_processor_health().await;

        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let mut deliveries = match self
                .broker
                .consume(
                    &self.config.queue,
                    &self.config.consumer_tag,
                    self.config.prefetch,
                )
                .await
            {
                Ok(deliveries) => {
                    if consecutive_errors > 0 {
                        info!(
                            queue = %self.config.queue,
                            consecutive_errors = consecutive_errors,
                            "Consumer recovered"
                        );
                    } else {
                        info!(queue = %self.config.queue, "Listening for messages");
                    }
                    deliveries
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let backoff = self.backoff(consecutive_errors);
                    warn!(
                        queue = %self.config.queue,
                        error = %e,
                        consecutive_errors = consecutive_errors,
                        backoff_secs = backoff.as_secs(),
                        "Failed to start consumer, backing off"
                    );
                    if wait_or_shutdown(&mut shutdown, backoff).await {
                        break;
                    }
                    continue;
                }
            };

            let stopped = loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break true;
                        }
                    }
                    next = deliveries.next() => match next {
                        Some(Ok(delivery)) => {
                            if self.handle_delivery(delivery).await.is_some() {
                                consecutive_errors = 0;
                            } else {
                                consecutive_errors += 1;
                                warn!(
                                    queue = %self.config.queue,
                                    consecutive_errors = consecutive_errors,
                                    "Delivery returned to queue, pausing consumer"
                                );
                                break false;
                            }
                        }
                        Some(Err(e)) => {
                            consecutive_errors += 1;
                            warn!(queue = %self.config.queue, error = %e, "Delivery stream failed");
                            break false;
                        }
                        None => {
                            consecutive_errors += 1;
                            warn!(queue = %self.config.queue, "Consumer cancelled by broker");
                            break false;
                        }
                    }
                }
            };
            drop(deliveries);

            if stopped {
                break;
            }

            let backoff = self.backoff(consecutive_errors);
            info!(
                queue = %self.config.queue,
                backoff_secs = backoff.as_secs(),
                "Re-subscribing after backoff"
            );
            if wait_or_shutdown(&mut shutdown, backoff).await {
                break;
            }
        }

        info!(queue = %self.config.queue, "Queue worker stopped");
        Ok(())
    }

    async fn check_processor_health(&self) {
        match self.processor.health_check().await {
            Ok(true) => debug!(processor = %self.processor.name(), "Processor dependencies healthy"),
            Ok(false) => warn!(processor = %self.processor.name(), "Processor dependencies unhealthy"),
            Err(e) => warn!(
                processor = %self.processor.name(),
                error = %e,
                "Processor health check failed"
            ),
        }
    }

    fn backoff(&self, consecutive_errors: u32) -> Duration {
        Duration::from_secs(2u64.pow(consecutive_errors.min(5))).min(self.config.max_backoff)
    }

    /// Process one delivery and settle it.
    ///
    /// Returns `None` when the delivery was handed back to the queue instead of
    /// being settled.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Option<DeliveryOutcome> {
        let started = Instant::now();
        let retry_count = delivery.retry_count();
        self.metrics.message_received(delivery.redelivered);

        debug!(
            queue = %self.config.queue,
            delivery_tag = delivery.delivery_tag,
            retry_count = retry_count,
            redelivered = delivery.redelivered,
            "Processing message"
        );

        let event = match self.attempt(&delivery).await {
            Ok(()) => DeliveryEvent::Succeeded,
            Err(e) => {
                let category = e.category();
                if matches!(e, QueueError::Timeout(_)) {
                    self.metrics.attempt_timed_out();
                }
                self.metrics.attempt_failed(category);
                warn!(
                    queue = %self.config.queue,
                    delivery_tag = delivery.delivery_tag,
                    retry_count = retry_count,
                    error = %e,
                    error_category = %category,
                    "Processing attempt failed"
                );
                DeliveryEvent::Failed(category)
            }
        };

        let policy = &self.config.retry_policy;
        let state = match DeliveryState::pending(retry_count)
            .transition(DeliveryEvent::Received, policy)
            .and_then(|processing| processing.transition(event, policy))
        {
            Ok(state) => state,
            Err(e) => {
                error!(queue = %self.config.queue, error = %e, "Delivery state machine rejected event");
                self.requeue(&delivery).await;
                return None;
            }
        };

        let settled = match state {
            DeliveryState::Delivered => {
                self.ack(&delivery).await;
                Some(DeliveryOutcome::Delivered)
            }
            DeliveryState::Retrying { retry_count: next } => self.schedule_retry(&delivery, next).await,
            DeliveryState::DeadLettered { .. } => self.dead_letter(&delivery, retry_count).await,
            DeliveryState::Pending { .. } | DeliveryState::Processing { .. } => {
                error!(queue = %self.config.queue, state = ?state, "Attempt ended in a non-final state");
                self.requeue(&delivery).await;
                None
            }
        };

        if let Some(outcome) = settled {
            self.metrics.outcome(outcome, started.elapsed());
        }
        settled
    }

    async fn attempt(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let job: J = delivery.json()?;
        debug!(job_key = %job.job_key(), processor = %self.processor.name(), "Decoded message");

        let timeout = self.config.attempt_timeout;
        match tokio::time::timeout(timeout, self.processor.process(&job)).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout(timeout)),
        }
    }

    /// Republish to the retry queue with only `x-retry = next_retry`, then ack.
    async fn schedule_retry(&self, delivery: &Delivery, next_retry: u32) -> Option<DeliveryOutcome> {
        let Some(route) = &self.config.retry_route else {
            return self.reject(delivery).await;
        };

        let message = OutgoingMessage::new(delivery.body.clone())
            .with_headers(MessageHeaders::new().with_retry_count(next_retry));

        match self
            .broker
            .publish(&route.exchange, &route.retry_queue, message)
            .await
        {
            Ok(()) => {
                info!(
                    queue = %self.config.queue,
                    retry_queue = %route.retry_queue,
                    retry = next_retry,
                    "Sent to retry queue"
                );
                self.metrics.retry_scheduled(next_retry);
                self.ack(delivery).await;
                Some(DeliveryOutcome::Retrying)
            }
            Err(e) => {
                error!(
                    queue = %self.config.queue,
                    retry_queue = %route.retry_queue,
                    error = %e,
                    "Failed to publish to retry queue, returning message to queue"
                );
                self.requeue(delivery).await;
                None
            }
        }
    }

    /// Publish the unchanged body to the dead-letter exchange, then ack.
    async fn dead_letter(&self, delivery: &Delivery, retry_count: u32) -> Option<DeliveryOutcome> {
        let Some(route) = &self.config.retry_route else {
            return self.reject(delivery).await;
        };

        let message = OutgoingMessage::new(delivery.body.clone());

        match self
            .broker
            .publish(
                &route.dead_letter_exchange,
                &route.dead_letter_routing_key,
                message,
            )
            .await
        {
            Ok(()) => {
                warn!(
                    queue = %self.config.queue,
                    dead_letter_exchange = %route.dead_letter_exchange,
                    retries = retry_count,
                    body = %String::from_utf8_lossy(&delivery.body),
                    "Moved to DLQ after exhausting retries"
                );
                self.metrics.dead_lettered();
                self.ack(delivery).await;
                Some(DeliveryOutcome::DeadLettered)
            }
            Err(e) => {
                error!(
                    queue = %self.config.queue,
                    dead_letter_exchange = %route.dead_letter_exchange,
                    error = %e,
                    "Failed to publish to dead-letter exchange, returning message to queue"
                );
                self.requeue(delivery).await;
                None
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = delivery.ack().await {
            error!(
                queue = %self.config.queue,
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "Failed to ACK message"
            );
        }
    }

    async fn requeue(&self, delivery: &Delivery) {
        self.metrics.requeued();
        if let Err(e) = delivery.nack(true).await {
            error!(
                queue = %self.config.queue,
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "Failed to NACK message"
            );
        }
    }

    /// Queues without retry routing drop (or broker-dead-letter) failed messages.
    async fn reject(&self, delivery: &Delivery) -> Option<DeliveryOutcome> {
        warn!(
            queue = %self.config.queue,
            delivery_tag = delivery.delivery_tag,
            "Rejecting message without requeue"
        );
        match delivery.reject(false).await {
            Ok(()) => Some(DeliveryOutcome::DeadLettered),
            Err(e) => {
                error!(queue = %self.config.queue, error = %e, "Failed to reject message");
                None
            }
        }
    }
}

/// Sleep for `delay`; returns true if shutdown was requested meanwhile.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        _ = tokio::time::sleep(delay) => false,
    }
}
