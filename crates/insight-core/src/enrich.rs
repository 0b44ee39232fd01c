//! Enricher port.
//!
//! An [`Enricher`] takes a freshly inserted [`Insight`] and returns an
//! augmented copy. The processor only calls it after a successful first
//! insert, and writes the result back with
//! [`InsightStore::update`](crate::store::InsightStore::update).
//!
//! Implementations may change `text`, `note`, `url` and `tags`. Identity
//! fields are pinned by the processor regardless of what comes back.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Insight;

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Return an enriched copy of `insight`.
    async fn enrich(&self, insight: &Insight) -> Result<Insight>;
}

/// Appends a fixed set of tags to every insight.
///
/// Tags already present are not repeated. Useful for labeling everything
/// that flows through one deployment without an external service.
pub struct StaticTagEnricher {
    tags: Vec<String>,
}

impl StaticTagEnricher {
    pub fn new(tags: Vec<String>) -> Self {
        Self { tags }
    }
}

#[async_trait]
impl Enricher for StaticTagEnricher {
    async fn enrich(&self, insight: &Insight) -> Result<Insight> {
        let mut out = insight.clone();
        for tag in &self.tags {
            if !out.tags.contains(tag) {
                out.tags.push(tag.clone());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HighlightId;
    use chrono::Utc;

    #[tokio::test]
    async fn test_static_tags_appended_once() {
        let now = Utc::now();
        let insight = Insight {
            tenant_id: "t".into(),
            idempotency_key: "k".into(),
            highlight_id: HighlightId::Numeric(3),
            source: "readwise".into(),
            event_type: "create".into(),
            received_at: now,
            text: "x".into(),
            note: None,
            url: None,
            tags: vec!["inbox".into()],
            created_at: now,
            updated_at: now,
            enriched: false,
        };
        let enricher = StaticTagEnricher::new(vec!["inbox".into(), "kindle".into()]);
        let out = enricher.enrich(&insight).await.unwrap();
        assert_eq!(out.tags, vec!["inbox", "kindle"]);
        assert_eq!(out.text, "x");
    }
}
