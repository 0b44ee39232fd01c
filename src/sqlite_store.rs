//! SQLite-backed [`InsightStore`] implementation.
//!
//! `put_if_absent` is a single `INSERT … ON CONFLICT DO NOTHING` against the
//! `UNIQUE(tenant_id, idempotency_key)` constraint, so concurrent workers
//! racing on the same key cannot both insert. `update` is a plain `UPDATE`
//! that reports [`InsightNotFound`] when no row matched.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use insight_core::models::{HighlightId, Insight};
use insight_core::store::{InsightNotFound, InsightStore};

use crate::config::Config;
use crate::db;

pub struct SqliteInsightStore {
    pool: SqlitePool,
}

impl SqliteInsightStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insights whose enrichment update never landed, oldest first.
    pub async fn list_unenriched(&self, limit: i64) -> Result<Vec<Insight>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM insights
            WHERE enriched = 0
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_insight).collect()
    }
}

/// Entry point for `insight unenriched`.
///
/// With enrichment disabled no insight is ever enriched, so there is nothing
/// to repair and listing the table would only mislead.
pub async fn run_unenriched(config: &Config, limit: i64) -> Result<Vec<Insight>> {
    if !config.enrich.is_enabled() {
        bail!("enrichment is disabled ([enrich].provider = \"disabled\"); nothing to repair");
    }
    let store = SqliteInsightStore::new(db::connect(config).await?);
    store.list_unenriched(limit).await
}

/// Fixed-width RFC 3339 so text order in SQLite matches time order.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.get(column);
    let ts = DateTime::parse_from_rfc3339(&raw)
        .with_context(|| format!("Invalid timestamp in insights.{}: {}", column, raw))?;
    Ok(ts.with_timezone(&Utc))
}

fn row_to_insight(row: &SqliteRow) -> Result<Insight> {
    let highlight_id: String = row.get("highlight_id");
    let tags_json: String = row.get("tags_json");
    let enriched: i64 = row.get("enriched");

    Ok(Insight {
        tenant_id: row.get("tenant_id"),
        idempotency_key: row.get("idempotency_key"),
        highlight_id: serde_json::from_str::<HighlightId>(&highlight_id)
            .context("Invalid highlight_id")?,
        source: row.get("source"),
        event_type: row.get("event_type"),
        received_at: parse_ts(row, "received_at")?,
        text: row.get("text"),
        note: row.get("note"),
        url: row.get("url"),
        tags: serde_json::from_str(&tags_json).context("Invalid tags_json")?,
        created_at: parse_ts(row, "created_at")?,
        updated_at: parse_ts(row, "updated_at")?,
        enriched: enriched != 0,
    })
}

#[async_trait]
impl InsightStore for SqliteInsightStore {
    async fn put_if_absent(&self, insight: &Insight) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO insights (tenant_id, idempotency_key, highlight_id, source,
                                  event_type, received_at, text, note, url, tags_json,
                                  created_at, updated_at, enriched)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, idempotency_key) DO NOTHING
            "#,
        )
        .bind(&insight.tenant_id)
        .bind(&insight.idempotency_key)
        .bind(serde_json::to_string(&insight.highlight_id)?)
        .bind(&insight.source)
        .bind(&insight.event_type)
        .bind(format_ts(&insight.received_at))
        .bind(&insight.text)
        .bind(&insight.note)
        .bind(&insight.url)
        .bind(serde_json::to_string(&insight.tags)?)
        .bind(format_ts(&insight.created_at))
        .bind(format_ts(&insight.updated_at))
        .bind(insight.enriched as i64)
        .execute(&self.pool)
        .await
        .context("Failed to insert insight")?;

        Ok(result.rows_affected() == 1)
    }

    async fn update(&self, insight: &Insight) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE insights SET
                text = ?,
                note = ?,
                url = ?,
                tags_json = ?,
                updated_at = ?,
                enriched = ?
            WHERE tenant_id = ? AND idempotency_key = ?
            "#,
        )
        .bind(&insight.text)
        .bind(&insight.note)
        .bind(&insight.url)
        .bind(serde_json::to_string(&insight.tags)?)
        .bind(format_ts(&insight.updated_at))
        .bind(insight.enriched as i64)
        .bind(&insight.tenant_id)
        .bind(&insight.idempotency_key)
        .execute(&self.pool)
        .await
        .context("Failed to update insight")?;

        if result.rows_affected() == 0 {
            return Err(InsightNotFound::for_insight(insight).into());
        }
        Ok(())
    }

    async fn get(&self, tenant_id: &str, idempotency_key: &str) -> Result<Option<Insight>> {
        let row = sqlx::query("SELECT * FROM insights WHERE tenant_id = ? AND idempotency_key = ?")
            .bind(tenant_id)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_insight).transpose()
    }
}
