//! `insight deliver`: run one message body through the delivery path
//! locally, as if it had just been received from the queue.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use insight_core::delivery::{decode_body, DeliveryConsumer, Outcome};
use insight_core::idempotency::derive_for_event;
use insight_core::process::InsightProcessor;
use insight_core::queue::{ReceivedMessage, ATTR_IDEMPOTENCY_KEY, ATTR_TENANT_ID};

use crate::config::Config;
use crate::db;
use crate::enrich::create_enricher;
use crate::sqlite_store::SqliteInsightStore;

/// Build the received message for `body`. Attributes not given explicitly
/// are taken from the body itself; a body without a key gets the key its
/// fields derive to under the chosen tenant.
pub fn local_message(
    body: String,
    tenant_id: Option<String>,
    idempotency_key: Option<String>,
) -> ReceivedMessage {
    // Let the consumer report a decode failure.
    let decoded = decode_body(&body).ok();

    let tenant_id = tenant_id
        .or_else(|| decoded.as_ref().map(|e| e.tenant_id.clone()))
        .unwrap_or_default();
    let idempotency_key = match (idempotency_key, decoded) {
        (Some(key), _) => key,
        (None, Some(event)) if !event.idempotency_key.trim().is_empty() => event.idempotency_key,
        (None, Some(mut event)) => {
            event.tenant_id = tenant_id.clone();
            derive_for_event(&event)
        }
        (None, None) => String::new(),
    };

    let mut attributes = BTreeMap::new();
    attributes.insert(ATTR_TENANT_ID.to_string(), tenant_id);
    attributes.insert(ATTR_IDEMPOTENCY_KEY.to_string(), idempotency_key);

    ReceivedMessage {
        message_id: format!("local-{}", Uuid::new_v4()),
        receive_count: 1,
        body,
        attributes,
    }
}

pub async fn run_deliver(
    config: &Config,
    path: &Path,
    tenant_id: Option<String>,
    idempotency_key: Option<String>,
) -> Result<Outcome> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read message body: {}", path.display()))?;

    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteInsightStore::new(pool));
    let enricher = create_enricher(&config.enrich)?;
    let consumer = DeliveryConsumer::new(Arc::new(InsightProcessor::new(store, enricher)));

    let msg = local_message(body, tenant_id, idempotency_key);
    Ok(consumer.handle(&msg).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_default_to_body() {
        let body = serde_json::json!({
            "idempotencyKey": "k-1",
            "tenantId": "t-1",
            "source": "readwise",
            "eventType": "create",
            "receivedAt": "2026-01-03T08:00:00Z",
            "highlight": { "id": 1, "text": "x", "updatedAt": "2026-01-02T15:04:05Z" }
        })
        .to_string();

        let msg = local_message(body.clone(), None, None);
        assert_eq!(msg.attribute(ATTR_TENANT_ID), Some("t-1"));
        assert_eq!(msg.attribute(ATTR_IDEMPOTENCY_KEY), Some("k-1"));

        let msg = local_message(body, Some("t-2".into()), None);
        assert_eq!(msg.attribute(ATTR_TENANT_ID), Some("t-2"));
    }

    #[test]
    fn test_missing_key_defaults_to_derived_key() {
        let body = serde_json::json!({
            "tenantId": "t-1",
            "source": "readwise",
            "eventType": "create",
            "receivedAt": "2026-01-03T08:00:00Z",
            "highlight": { "id": 1, "text": "x", "updatedAt": "2026-01-02T15:04:05Z" }
        })
        .to_string();

        let mut event = decode_body(&body).unwrap();
        let msg = local_message(body.clone(), None, None);
        assert_eq!(
            msg.attribute(ATTR_IDEMPOTENCY_KEY),
            Some(derive_for_event(&event).as_str())
        );

        event.tenant_id = "t-2".into();
        let msg = local_message(body, Some("t-2".into()), None);
        assert_eq!(
            msg.attribute(ATTR_IDEMPOTENCY_KEY),
            Some(derive_for_event(&event).as_str())
        );
    }

    #[test]
    fn test_undecodable_body_has_blank_attributes() {
        let msg = local_message("nope".into(), None, None);
        assert_eq!(msg.attribute(ATTR_TENANT_ID), None);
    }
}
