//! Delivery consumer: turns one received queue message into an [`Outcome`].
//!
//! The idempotency key attribute is never taken on trust: after the body is
//! reconciled with its attributes the key is derived again from the event's
//! own fields, and a message whose key does not match is dropped.
//!
//! Every failure is resolved to exactly one of two dispositions. Problems
//! with the message itself (bad JSON, missing attributes, attribute drift)
//! and permanent processing errors drop the message. Transient processing
//! errors leave it for redelivery. Nothing is propagated past this module.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Classification, DeliveryError, ProcessError};
use crate::idempotency::derive_for_event;
use crate::models::{Highlight, IngestEvent};
use crate::process::{InsightProcessor, ProcessResult};
use crate::queue::{ReceivedMessage, ATTR_IDEMPOTENCY_KEY, ATTR_TENANT_ID};

/// What the transport should do with a message after handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Processed; remove from the queue.
    Acknowledged { inserted: bool },
    /// Can never succeed; remove from the queue.
    Dropped { reason: String },
    /// A dependency failed; make the message visible again.
    Redeliver { reason: String },
}

impl Outcome {
    /// Whether the message should be deleted from the queue.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Redeliver { .. })
    }
}

impl From<DeliveryError> for Outcome {
    fn from(err: DeliveryError) -> Self {
        match err.classification() {
            Classification::Permanent => Outcome::Dropped {
                reason: err.to_string(),
            },
            Classification::Transient => Outcome::Redeliver {
                reason: err.to_string(),
            },
        }
    }
}

/// Map a processing result to its disposition.
///
/// This is the single place a [`ProcessError`]'s classification is read.
pub fn outcome_for(result: Result<ProcessResult, ProcessError>) -> Outcome {
    match result {
        Ok(res) => Outcome::Acknowledged {
            inserted: res.inserted,
        },
        Err(err) => match err.classification() {
            Classification::Permanent => Outcome::Dropped {
                reason: err.to_string(),
            },
            Classification::Transient => Outcome::Redeliver {
                reason: err.to_string(),
            },
        },
    }
}

/// Message body as it may appear on the wire. Tenant and key default to
/// empty so the attribute cross-check can decide what to do with them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    #[serde(default)]
    idempotency_key: String,
    #[serde(default)]
    tenant_id: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    event_type: String,
    received_at: DateTime<Utc>,
    highlight: Option<Highlight>,
}

/// Decode a queue message body into an [`IngestEvent`].
pub fn decode_body(body: &str) -> Result<IngestEvent, DeliveryError> {
    let raw: MessageBody =
        serde_json::from_str(body).map_err(|e| DeliveryError::InvalidBody(e.to_string()))?;

    if raw.source.trim().is_empty() {
        return Err(DeliveryError::InvalidBody("missing source".to_string()));
    }
    if raw.event_type.trim().is_empty() {
        return Err(DeliveryError::InvalidBody("missing event type".to_string()));
    }
    let highlight = match raw.highlight {
        Some(h) if h.id.is_well_formed() => h,
        _ => {
            return Err(DeliveryError::InvalidBody(
                "missing/invalid highlight id".to_string(),
            ))
        }
    };

    Ok(IngestEvent {
        idempotency_key: raw.idempotency_key,
        tenant_id: raw.tenant_id,
        source: raw.source,
        event_type: raw.event_type,
        received_at: raw.received_at,
        highlight,
    })
}

/// Fill blank body fields from the attributes and reject any disagreement.
///
/// The attributes are authoritative for routing; a body that names a
/// different tenant or key than its envelope is treated as corrupt.
pub fn reconcile(
    mut event: IngestEvent,
    tenant_attr: &str,
    key_attr: &str,
) -> Result<IngestEvent, DeliveryError> {
    check_drift(ATTR_TENANT_ID, &event.tenant_id, tenant_attr)?;
    check_drift(ATTR_IDEMPOTENCY_KEY, &event.idempotency_key, key_attr)?;
    event.tenant_id = tenant_attr.to_string();
    event.idempotency_key = key_attr.to_string();
    Ok(event)
}

fn check_drift(attribute: &'static str, body: &str, attr: &str) -> Result<(), DeliveryError> {
    let body = body.trim();
    if !body.is_empty() && body != attr {
        return Err(DeliveryError::AttributeDrift {
            attribute,
            body: body.to_string(),
            attr: attr.to_string(),
        });
    }
    Ok(())
}

/// Check that the event's key is the one its own fields derive to.
pub fn verify_key(event: &IngestEvent) -> Result<(), DeliveryError> {
    let derived = derive_for_event(event);
    if derived != event.idempotency_key {
        return Err(DeliveryError::UnderivableKey {
            attr: event.idempotency_key.clone(),
            derived,
        });
    }
    Ok(())
}

/// Consumes ingest messages and persists them through an [`InsightProcessor`].
pub struct DeliveryConsumer {
    processor: Arc<InsightProcessor>,
}

impl DeliveryConsumer {
    pub fn new(processor: Arc<InsightProcessor>) -> Self {
        Self { processor }
    }

    /// Decode, validate, and cross-check a message without processing it.
    pub fn prepare(&self, msg: &ReceivedMessage) -> Result<IngestEvent, DeliveryError> {
        let event = decode_body(&msg.body)?;
        let tenant = msg
            .attribute(ATTR_TENANT_ID)
            .ok_or(DeliveryError::MissingAttribute(ATTR_TENANT_ID))?;
        let key = msg
            .attribute(ATTR_IDEMPOTENCY_KEY)
            .ok_or(DeliveryError::MissingAttribute(ATTR_IDEMPOTENCY_KEY))?;
        let event = reconcile(event, tenant, key)?;
        verify_key(&event)?;
        Ok(event)
    }

    /// Handle one message end to end.
    pub async fn handle(&self, msg: &ReceivedMessage) -> Outcome {
        let event = match self.prepare(msg) {
            Ok(event) => event,
            Err(err) => return err.into(),
        };
        outcome_for(self.processor.process(&event).await)
    }
}
