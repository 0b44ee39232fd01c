//! Core data models shared across the ingestion pipeline.
//!
//! A [`Highlight`] arrives wrapped in an [`IngestEvent`], travels through the
//! queue as JSON, and is finally projected into an [`Insight`] by the worker.
//! Wire field names are camelCase on every type.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External identifier of a highlight.
///
/// Numeric for providers such as Readwise, opaque strings for others.
/// Serialized untagged, so `42` and `"hl_42"` both round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HighlightId {
    Numeric(i64),
    Opaque(String),
}

impl HighlightId {
    /// Whether the identifier is usable as part of a dedup identity.
    ///
    /// Numeric ids must be strictly positive; opaque ids must be non-blank.
    pub fn is_well_formed(&self) -> bool {
        match self {
            HighlightId::Numeric(n) => *n > 0,
            HighlightId::Opaque(s) => !s.trim().is_empty(),
        }
    }
}

impl fmt::Display for HighlightId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HighlightId::Numeric(n) => write!(f, "{}", n),
            HighlightId::Opaque(s) => f.write_str(s),
        }
    }
}

impl From<i64> for HighlightId {
    fn from(n: i64) -> Self {
        HighlightId::Numeric(n)
    }
}

impl From<&str> for HighlightId {
    fn from(s: &str) -> Self {
        HighlightId::Opaque(s.to_string())
    }
}

/// A single annotated passage, as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub id: HighlightId,
    #[serde(default)]
    pub book_id: Option<i64>,
    pub text: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub highlighted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub location: i64,
    #[serde(default)]
    pub location_type: String,
    #[serde(default)]
    pub color: String,
}

/// Envelope around a [`Highlight`], created once per inbound webhook call.
///
/// `received_at` is stamped at the HTTP boundary and never recomputed.
/// `idempotency_key` stays empty until the publisher derives it; after that
/// the event is immutable and is serialized as the queue message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEvent {
    pub idempotency_key: String,
    pub tenant_id: String,
    pub source: String,
    pub event_type: String,
    pub received_at: DateTime<Utc>,
    pub highlight: Highlight,
}

/// The persisted projection of an [`IngestEvent`].
///
/// Keyed by `(tenant_id, idempotency_key)`. Created on the first successful
/// insert and updated at most once more, by the enrichment path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub tenant_id: String,
    pub idempotency_key: String,
    pub highlight_id: HighlightId,
    pub source: String,
    pub event_type: String,
    pub received_at: DateTime<Utc>,
    pub text: String,
    pub note: Option<String>,
    pub url: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once an enrichment update has been written for this record.
    #[serde(default)]
    pub enriched: bool,
}
