//! Dedup store abstraction.
//!
//! The [`InsightStore`] trait is the single cross-worker coordination point
//! of the pipeline. Its conditional insert is what keeps at most one
//! [`Insight`] per `(tenant_id, idempotency_key)` under concurrent delivery
//! of the same logical event; no in-process locking is involved.
//!
//! # Contract
//!
//! | Method | Behavior |
//! |--------|----------|
//! | [`put_if_absent`](InsightStore::put_if_absent) | Atomic insert. `Ok(false)` when the key already exists. Duplicates are a successful outcome, not an error. |
//! | [`update`](InsightStore::update) | Fails with [`InsightNotFound`] when the key is absent. Never upserts. |
//! | [`get`](InsightStore::get) | Point lookup by key. |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::Insight;

/// Returned (inside `anyhow::Error`) by [`InsightStore::update`] when no
/// record exists under the insight's key.
#[derive(Debug, Error)]
#[error("insight not found for update (tenant={tenant_id}, key={idempotency_key})")]
pub struct InsightNotFound {
    pub tenant_id: String,
    pub idempotency_key: String,
}

impl InsightNotFound {
    pub fn for_insight(insight: &Insight) -> Self {
        Self {
            tenant_id: insight.tenant_id.clone(),
            idempotency_key: insight.idempotency_key.clone(),
        }
    }
}

/// Conditional-write store keyed by `(tenant_id, idempotency_key)`.
#[async_trait]
pub trait InsightStore: Send + Sync {
    /// Insert the insight unless its key already exists.
    ///
    /// Returns `true` when this call created the record.
    async fn put_if_absent(&self, insight: &Insight) -> Result<bool>;

    /// Overwrite the mutable fields of an existing record.
    async fn update(&self, insight: &Insight) -> Result<()>;

    /// Fetch a record by key.
    async fn get(&self, tenant_id: &str, idempotency_key: &str) -> Result<Option<Insight>>;
}
