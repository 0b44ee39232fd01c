//! Queue port.
//!
//! The [`MessageQueue`] trait is the publisher's only view of the transport.
//! Delivery is assumed to be at-least-once: consumers receive
//! [`ReceivedMessage`]s that may be redelivered any number of times and
//! must neutralize duplicates through the idempotency key.
//!
//! Message attributes are a flat string map so consumers can route or
//! filter without deserializing the body. See the `ATTR_*` constants for
//! the attributes every ingest message carries.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

pub const ATTR_TENANT_ID: &str = "tenant_id";
pub const ATTR_IDEMPOTENCY_KEY: &str = "idempotency_key";
pub const ATTR_EVENT_TYPE: &str = "event_type";
pub const ATTR_RECEIVED_AT: &str = "received_at";

/// A message handed to the queue by the publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub body: String,
    pub attributes: BTreeMap<String, String>,
}

/// A message as seen by a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// Transport-assigned identifier, stable across redeliveries.
    pub message_id: String,
    /// How many times this message has been handed out, including this one.
    pub receive_count: u32,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
}

impl ReceivedMessage {
    /// Trimmed attribute value, or `None` when absent or blank.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Outbound queue transport.
///
/// Implementations must not retry internally on behalf of the caller beyond
/// what the transport itself does; errors are returned as-is.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn send(&self, message: QueueMessage) -> Result<()>;
}

/// In-memory queue for tests and local runs.
///
/// Records every message sent and can be told to fail the next sends.
pub struct InMemoryQueue {
    sent: Mutex<Vec<QueueMessage>>,
    failures: Mutex<u32>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(0),
        }
    }

    /// Make the next `n` calls to [`send`](MessageQueue::send) fail.
    pub fn fail_next(&self, n: u32) {
        *self.failures.lock().unwrap() = n;
    }

    /// Snapshot of all successfully sent messages, oldest first.
    pub fn sent(&self) -> Vec<QueueMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Turn every sent message into a [`ReceivedMessage`], as a consumer
    /// would see it on first delivery.
    pub fn drain(&self) -> Vec<ReceivedMessage> {
        self.sent
            .lock()
            .unwrap()
            .drain(..)
            .map(|m| ReceivedMessage {
                message_id: Uuid::new_v4().to_string(),
                receive_count: 1,
                body: m.body,
                attributes: m.attributes,
            })
            .collect()
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn send(&self, message: QueueMessage) -> Result<()> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                bail!("queue unavailable");
            }
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &str) -> QueueMessage {
        QueueMessage {
            body: body.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_send_records_in_order() {
        let q = InMemoryQueue::new();
        q.send(message("a")).await.unwrap();
        q.send(message("b")).await.unwrap();
        let bodies: Vec<_> = q.sent().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_fail_next() {
        let q = InMemoryQueue::new();
        q.fail_next(1);
        assert!(q.send(message("a")).await.is_err());
        assert!(q.send(message("b")).await.is_ok());
        assert_eq!(q.sent().len(), 1);
    }

    #[test]
    fn test_attribute_blank_is_none() {
        let mut attributes = BTreeMap::new();
        attributes.insert(ATTR_TENANT_ID.to_string(), "  ".to_string());
        attributes.insert(ATTR_IDEMPOTENCY_KEY.to_string(), " k ".to_string());
        let msg = ReceivedMessage {
            message_id: "m".into(),
            receive_count: 1,
            body: String::new(),
            attributes,
        };
        assert_eq!(msg.attribute(ATTR_TENANT_ID), None);
        assert_eq!(msg.attribute(ATTR_IDEMPOTENCY_KEY), Some("k"));
        assert_eq!(msg.attribute(ATTR_EVENT_TYPE), None);
    }
}
