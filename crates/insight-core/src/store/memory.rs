//! In-memory [`InsightStore`] implementation for tests and local runs.
//!
//! A `HashMap` behind `std::sync::RwLock`. The write lock makes the
//! check-and-insert in `put_if_absent` atomic, mirroring the conditional
//! write a real backend performs.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Insight;

use super::{InsightNotFound, InsightStore};

type Key = (String, String);

fn key_of(insight: &Insight) -> Key {
    (insight.tenant_id.clone(), insight.idempotency_key.clone())
}

/// In-memory store for testing.
pub struct InMemoryInsightStore {
    insights: RwLock<HashMap<Key, Insight>>,
}

impl InMemoryInsightStore {
    pub fn new() -> Self {
        Self {
            insights: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored insights across all tenants.
    pub fn len(&self) -> usize {
        self.insights.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryInsightStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InsightStore for InMemoryInsightStore {
    async fn put_if_absent(&self, insight: &Insight) -> Result<bool> {
        let mut insights = self.insights.write().unwrap();
        let key = key_of(insight);
        if insights.contains_key(&key) {
            return Ok(false);
        }
        insights.insert(key, insight.clone());
        Ok(true)
    }

    async fn update(&self, insight: &Insight) -> Result<()> {
        let mut insights = self.insights.write().unwrap();
        match insights.get_mut(&key_of(insight)) {
            Some(existing) => {
                *existing = insight.clone();
                Ok(())
            }
            None => Err(InsightNotFound::for_insight(insight).into()),
        }
    }

    async fn get(&self, tenant_id: &str, idempotency_key: &str) -> Result<Option<Insight>> {
        let insights = self.insights.read().unwrap();
        Ok(insights
            .get(&(tenant_id.to_string(), idempotency_key.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HighlightId;
    use chrono::Utc;

    fn insight(tenant: &str, key: &str, text: &str) -> Insight {
        let now = Utc::now();
        Insight {
            tenant_id: tenant.into(),
            idempotency_key: key.into(),
            highlight_id: HighlightId::Numeric(1),
            source: "readwise".into(),
            event_type: "create".into(),
            received_at: now,
            text: text.into(),
            note: None,
            url: None,
            tags: vec![],
            created_at: now,
            updated_at: now,
            enriched: false,
        }
    }

    #[tokio::test]
    async fn test_put_if_absent_dedups() {
        let store = InMemoryInsightStore::new();
        assert!(store.put_if_absent(&insight("t", "k", "first")).await.unwrap());
        assert!(!store.put_if_absent(&insight("t", "k", "second")).await.unwrap());
        assert_eq!(store.len(), 1);
        let stored = store.get("t", "k").await.unwrap().unwrap();
        assert_eq!(stored.text, "first");
    }

    #[tokio::test]
    async fn test_key_is_scoped_by_tenant() {
        let store = InMemoryInsightStore::new();
        assert!(store.put_if_absent(&insight("t1", "k", "a")).await.unwrap());
        assert!(store.put_if_absent(&insight("t2", "k", "b")).await.unwrap());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let store = InMemoryInsightStore::new();
        let err = store.update(&insight("t", "k", "x")).await.unwrap_err();
        assert!(err.downcast_ref::<InsightNotFound>().is_some());
        assert!(store.is_empty());

        store.put_if_absent(&insight("t", "k", "x")).await.unwrap();
        store.update(&insight("t", "k", "y")).await.unwrap();
        assert_eq!(store.get("t", "k").await.unwrap().unwrap().text, "y");
    }
}
