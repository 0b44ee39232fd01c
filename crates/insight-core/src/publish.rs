//! Ingest publisher: stamps, keys, serializes, and enqueues events.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::SecondsFormat;

use crate::idempotency::derive_for_event;
use crate::models::IngestEvent;
use crate::queue::{
    MessageQueue, QueueMessage, ATTR_EVENT_TYPE, ATTR_IDEMPOTENCY_KEY, ATTR_RECEIVED_AT,
    ATTR_TENANT_ID,
};

/// Wraps a normalized event into a queue message and hands it to the
/// [`MessageQueue`] port.
///
/// Exactly one `send` per [`enqueue`](IngestPublisher::enqueue) call; retry
/// policy belongs to the transport, and its errors come back unchanged.
pub struct IngestPublisher {
    queue: Arc<dyn MessageQueue>,
}

impl IngestPublisher {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }

    /// Stamp `tenant_id`, derive the idempotency key, and enqueue.
    pub async fn enqueue(&self, event: IngestEvent, tenant_id: &str) -> Result<()> {
        let message = build_message(event, tenant_id)?;
        self.queue.send(message).await
    }
}

/// Build the queue message for an event without sending it.
///
/// The body is the full event (key included); the attributes duplicate the
/// routing-relevant fields.
pub fn build_message(mut event: IngestEvent, tenant_id: &str) -> Result<QueueMessage> {
    event.tenant_id = tenant_id.to_string();
    event.idempotency_key = derive_for_event(&event);

    let body = serde_json::to_string(&event).context("Failed to serialize ingest event")?;

    let mut attributes = BTreeMap::new();
    attributes.insert(ATTR_TENANT_ID.to_string(), event.tenant_id.clone());
    attributes.insert(
        ATTR_IDEMPOTENCY_KEY.to_string(),
        event.idempotency_key.clone(),
    );
    attributes.insert(ATTR_EVENT_TYPE.to_string(), event.event_type.clone());
    attributes.insert(
        ATTR_RECEIVED_AT.to_string(),
        event
            .received_at
            .to_rfc3339_opts(SecondsFormat::AutoSi, true),
    );

    Ok(QueueMessage { body, attributes })
}
