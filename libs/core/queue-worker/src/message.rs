//! Message envelopes: outgoing messages, headers and inbound deliveries.

use crate::error::BrokerError;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::fmt;

/// Header carrying the number of retries already spent on a message.
pub const RETRY_HEADER: &str = "x-retry";

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A header value as carried in an AMQP field table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<u32> for HeaderValue {
    fn from(value: u32) -> Self {
        HeaderValue::Int(i64::from(value))
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Str(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Str(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

/// Message headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders(BTreeMap<String, HeaderValue>);

impl MessageHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<HeaderValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.0.iter()
    }

    /// Retries already spent, read from `x-retry`.
    ///
    /// A missing, negative or non-numeric header counts as zero.
    pub fn retry_count(&self) -> u32 {
        match self.get(RETRY_HEADER) {
            Some(HeaderValue::Int(n)) => u32::try_from(*n).unwrap_or(if *n < 0 { 0 } else { u32::MAX }),
            Some(HeaderValue::Str(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.insert(RETRY_HEADER, retry_count);
        self
    }
}

impl FromIterator<(String, HeaderValue)> for MessageHeaders {
    fn from_iter<T: IntoIterator<Item = (String, HeaderValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A message ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    pub headers: MessageHeaders,
    /// Delivery mode 2 when true.
    pub persistent: bool,
    pub content_type: Option<String>,
}

impl OutgoingMessage {
    /// Persistent message carrying `body` unchanged.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            headers: MessageHeaders::new(),
            persistent: true,
            content_type: None,
        }
    }

    /// Persistent JSON message.
    pub fn json<T: Serialize + ?Sized>(payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            body: serde_json::to_vec(payload)?,
            headers: MessageHeaders::new(),
            persistent: true,
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
        })
    }

    pub fn with_headers(mut self, headers: MessageHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Settles a delivery on the broker it came from.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Negative acknowledgement; `requeue = false` dead-letters or drops.
    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A message received from a queue, not yet settled.
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub headers: MessageHeaders,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        body: Vec<u8>,
        headers: MessageHeaders,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            body,
            headers,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            redelivered,
            acker,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.headers.retry_count()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(requeue).await
    }

    pub async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.reject(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}
