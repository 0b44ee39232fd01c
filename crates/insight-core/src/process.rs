//! Processing orchestration: dedup-insert, then optionally enrich-update.
//!
//! [`InsightProcessor::process`] runs a fixed sequence for each event:
//!
//! 1. Reject a blank idempotency key before touching the store.
//! 2. Project the event into an [`Insight`] (trimmed text and note).
//! 3. `put_if_absent`. A duplicate stops here with `inserted = false`.
//! 4. Without an enricher, stop with `inserted = true`.
//! 5. `enrich`. A failure leaves the base record in place.
//! 6. `update` with the enriched copy.
//!
//! A redelivery that arrives after step 3 succeeded is a duplicate and is
//! never enriched again; such records keep `enriched = false` and can be
//! found and repaired out of band.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::enrich::Enricher;
use crate::error::ProcessError;
use crate::models::{IngestEvent, Insight};
use crate::store::InsightStore;

/// Source of "now" for `created_at` / `updated_at`.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Result of a successful [`InsightProcessor::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessResult {
    /// `true` when this call created the record, `false` for a duplicate.
    pub inserted: bool,
}

pub struct InsightProcessor {
    store: Arc<dyn InsightStore>,
    enricher: Option<Arc<dyn Enricher>>,
    clock: Clock,
}

impl InsightProcessor {
    pub fn new(store: Arc<dyn InsightStore>, enricher: Option<Arc<dyn Enricher>>) -> Self {
        Self {
            store,
            enricher,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock, mainly for deterministic tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub async fn process(&self, event: &IngestEvent) -> Result<ProcessResult, ProcessError> {
        if event.idempotency_key.trim().is_empty() {
            return Err(ProcessError::MissingIdempotencyKey);
        }
        if event.tenant_id.trim().is_empty() {
            return Err(ProcessError::InvalidEvent("missing tenant id".to_string()));
        }

        let base = self.build_insight(event);

        let inserted = self
            .store
            .put_if_absent(&base)
            .await
            .map_err(ProcessError::Store)?;
        if !inserted {
            return Ok(ProcessResult { inserted: false });
        }

        let Some(enricher) = &self.enricher else {
            return Ok(ProcessResult { inserted: true });
        };

        let mut enriched = enricher
            .enrich(&base)
            .await
            .map_err(ProcessError::Enrich)?;
        pin_identity(&mut enriched, &base);
        enriched.enriched = true;
        enriched.updated_at = (self.clock)();

        self.store
            .update(&enriched)
            .await
            .map_err(ProcessError::Store)?;

        Ok(ProcessResult { inserted: true })
    }

    fn build_insight(&self, event: &IngestEvent) -> Insight {
        let now = (self.clock)();
        let h = &event.highlight;
        Insight {
            tenant_id: event.tenant_id.clone(),
            idempotency_key: event.idempotency_key.clone(),
            highlight_id: h.id.clone(),
            source: event.source.clone(),
            event_type: event.event_type.clone(),
            received_at: event.received_at,
            text: h.text.trim().to_string(),
            note: h
                .note
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            url: h.url.clone(),
            tags: h.tags.clone(),
            created_at: now,
            updated_at: now,
            enriched: false,
        }
    }
}

fn pin_identity(enriched: &mut Insight, base: &Insight) {
    enriched.tenant_id = base.tenant_id.clone();
    enriched.idempotency_key = base.idempotency_key.clone();
    enriched.highlight_id = base.highlight_id.clone();
    enriched.source = base.source.clone();
    enriched.event_type = base.event_type.clone();
    enriched.received_at = base.received_at;
    enriched.created_at = base.created_at;
}
