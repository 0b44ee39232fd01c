//! Provider payload normalization.
//!
//! Maps a raw webhook body ([`WebhookPayload`]) into a canonical
//! [`IngestEvent`]. Validation rules run in order and the first failure wins:
//!
//! 1. The highlight id must be present and well-formed (numeric ids > 0,
//!    opaque ids non-blank).
//! 2. `eventType` must be non-blank after trimming.
//! 3. `text` must be non-blank after trimming.
//!
//! Everything else (note, URL, color, location, book id) is optional and
//! copied through. A missing tag list becomes an empty vec, never `None`.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::IngestError;
use crate::models::{Highlight, HighlightId, IngestEvent};

/// Raw highlight webhook body, using the provider's field names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub id: Option<HighlightId>,
    #[serde(default)]
    pub book_id: Option<i64>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub highlighted_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "updatedAt")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: i64,
    #[serde(default)]
    pub location_type: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub event_type: String,
    /// Shared secret some providers embed in the body instead of a header.
    #[serde(default)]
    pub secret: Option<String>,
}

/// Normalize a provider payload into an [`IngestEvent`].
///
/// The returned event has an empty `tenant_id` and `idempotency_key`; both
/// are stamped by the publisher.
///
/// A payload without an `updated` timestamp is pinned to the Unix epoch so
/// that redeliveries of the same webhook still derive the same key.
pub fn normalize(
    source: &str,
    payload: WebhookPayload,
    received_at: DateTime<Utc>,
) -> Result<IngestEvent, IngestError> {
    let id = match payload.id {
        Some(id) if id.is_well_formed() => id,
        _ => {
            return Err(IngestError::InvalidPayload(
                "missing/invalid highlight id".to_string(),
            ))
        }
    };
    if payload.event_type.trim().is_empty() {
        return Err(IngestError::InvalidPayload(
            "missing event type".to_string(),
        ));
    }
    if payload.text.trim().is_empty() {
        return Err(IngestError::InvalidPayload(format!(
            "empty highlight text (id={})",
            id
        )));
    }

    Ok(IngestEvent {
        idempotency_key: String::new(),
        tenant_id: String::new(),
        source: source.to_string(),
        event_type: payload.event_type,
        received_at,
        highlight: Highlight {
            id,
            book_id: payload.book_id,
            text: payload.text,
            note: payload.note,
            url: payload.url,
            tags: payload.tags.unwrap_or_default(),
            highlighted_at: payload.highlighted_at,
            updated_at: payload.updated.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            location: payload.location,
            location_type: payload.location_type,
            color: payload.color,
        },
    })
}
