use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per (tenant, key); the unique constraint is the dedup guard.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS insights (
            tenant_id TEXT NOT NULL,
            idempotency_key TEXT NOT NULL,
            highlight_id TEXT NOT NULL,
            source TEXT NOT NULL,
            event_type TEXT NOT NULL,
            received_at TEXT NOT NULL,
            text TEXT NOT NULL,
            note TEXT,
            url TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            enriched INTEGER NOT NULL DEFAULT 0,
            UNIQUE(tenant_id, idempotency_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_messages (
            id TEXT PRIMARY KEY,
            body TEXT NOT NULL,
            attributes_json TEXT NOT NULL DEFAULT '{}',
            enqueued_at INTEGER NOT NULL,
            visible_at INTEGER NOT NULL,
            receive_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue_messages_visible_at ON queue_messages(visible_at, enqueued_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_insights_enriched ON insights(enriched)")
        .execute(pool)
        .await?;

    Ok(())
}
