//! Canonical idempotency-key derivation.
//!
//! The key is a pure function of five fields:
//!
//! ```text
//! sha256_hex("{tenant}|{source}|{event_type}|{highlight_id}|{updated_at}")
//! ```
//!
//! The highlight id enters as its display form, so a numeric id `42` and
//! the opaque id `"42"` name the same highlight and share a key. Providers
//! switching between the two encodings do not create duplicates.
//!
//! `updated_at` is rendered as RFC 3339 in UTC with second precision and a
//! `Z` suffix, so the same instant expressed in any offset yields the same
//! key. The publisher derives the key before enqueueing, and the worker
//! can re-derive it independently from the message body.
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use insight_core::idempotency::derive_key;
//! use insight_core::models::HighlightId;
//!
//! let updated = Utc.with_ymd_and_hms(2026, 1, 2, 15, 4, 5).unwrap();
//! let key = derive_key("tenant-123", "provider-x", "create", &HighlightId::Numeric(42), updated);
//! assert_eq!(key.len(), 64);
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::models::{HighlightId, IngestEvent};

/// Field delimiter. Not expected in tenant ids, source tags, or event types.
const DELIMITER: &str = "|";

/// Derive the idempotency key for a logical event.
pub fn derive_key(
    tenant_id: &str,
    source: &str,
    event_type: &str,
    highlight_id: &HighlightId,
    highlight_updated_at: DateTime<Utc>,
) -> String {
    let updated = highlight_updated_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    let canonical = [
        tenant_id.to_string(),
        source.to_string(),
        event_type.to_string(),
        highlight_id.to_string(),
        updated,
    ]
    .join(DELIMITER);

    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Derive the key for an event using its own tenant, source, and highlight.
pub fn derive_for_event(event: &IngestEvent) -> String {
    derive_key(
        &event.tenant_id,
        &event.source,
        &event.event_type,
        &event.highlight.id,
        event.highlight.updated_at,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn fixed_updated() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 15, 4, 5).unwrap()
    }

    #[test]
    fn test_known_vector() {
        let key = derive_key(
            "tenant-123",
            "provider-x",
            "create",
            &HighlightId::Numeric(42),
            fixed_updated(),
        );
        assert_eq!(
            key,
            "76ee226c0e15fdc9a83e95fc7908b5aa940f7e763dc9546bde564a25937c7b76"
        );
    }

    #[test]
    fn test_deterministic() {
        let a = derive_key("t", "s", "e", &HighlightId::from("x"), fixed_updated());
        let b = derive_key("t", "s", "e", &HighlightId::from("x"), fixed_updated());
        assert_eq!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_offset_normalized_to_utc() {
        let cet = FixedOffset::east_opt(3600).unwrap();
        let same_instant = cet
            .with_ymd_and_hms(2026, 1, 2, 16, 4, 5)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            derive_key("t", "s", "e", &HighlightId::Numeric(1), fixed_updated()),
            derive_key("t", "s", "e", &HighlightId::Numeric(1), same_instant)
        );
    }

    #[test]
    fn test_subsecond_precision_ignored() {
        let with_millis = fixed_updated() + chrono::Duration::milliseconds(250);
        assert_eq!(
            derive_key("t", "s", "e", &HighlightId::Numeric(1), fixed_updated()),
            derive_key("t", "s", "e", &HighlightId::Numeric(1), with_millis)
        );
    }

    #[test]
    fn test_numeric_and_string_id_share_key() {
        assert_eq!(
            derive_key("t", "s", "e", &HighlightId::Numeric(42), fixed_updated()),
            derive_key("t", "s", "e", &HighlightId::from("42"), fixed_updated())
        );
    }

    #[test]
    fn test_each_field_changes_key() {
        let base = derive_key("t", "s", "e", &HighlightId::Numeric(1), fixed_updated());
        let later = fixed_updated() + chrono::Duration::seconds(1);
        for other in [
            derive_key("t2", "s", "e", &HighlightId::Numeric(1), fixed_updated()),
            derive_key("t", "s2", "e", &HighlightId::Numeric(1), fixed_updated()),
            derive_key("t", "s", "e2", &HighlightId::Numeric(1), fixed_updated()),
            derive_key("t", "s", "e", &HighlightId::Numeric(2), fixed_updated()),
            derive_key("t", "s", "e", &HighlightId::Numeric(1), later),
        ] {
            assert_ne!(base, other);
        }
    }
}
