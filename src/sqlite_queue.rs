//! Durable at-least-once queue on top of the `queue_messages` table.
//!
//! Messages are leased rather than popped: [`SqliteQueue::receive`] hides
//! each returned message for a visibility timeout and bumps its receive
//! count. A consumer that neither acks nor releases in time simply lets the
//! lease expire and the message becomes visible again. This is the source
//! of redelivery, and why every consumer must be idempotent.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use insight_core::queue::{MessageQueue, QueueMessage, ReceivedMessage};

pub struct SqliteQueue {
    pool: SqlitePool,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Lease up to `max` visible messages for `visibility`.
    ///
    /// The lease is a single `UPDATE … RETURNING`, so two workers polling
    /// concurrently never receive the same message within one lease.
    pub async fn receive(&self, max: usize, visibility: Duration) -> Result<Vec<ReceivedMessage>> {
        let now = now_millis();
        let hidden_until = now + visibility.as_millis() as i64;

        let rows = sqlx::query(
            r#"
            UPDATE queue_messages
            SET receive_count = receive_count + 1,
                visible_at = ?
            WHERE id IN (
                SELECT id FROM queue_messages
                WHERE visible_at <= ?
                ORDER BY enqueued_at ASC, id ASC
                LIMIT ?
            )
            RETURNING id, body, attributes_json, receive_count, enqueued_at
            "#,
        )
        .bind(hidden_until)
        .bind(now)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to lease queue messages")?;

        let mut leased = Vec::with_capacity(rows.len());
        for row in rows {
            let attributes_json: String = row.get("attributes_json");
            let attributes: BTreeMap<String, String> =
                serde_json::from_str(&attributes_json).context("Invalid attributes_json")?;
            let receive_count: i64 = row.get("receive_count");
            let enqueued_at: i64 = row.get("enqueued_at");
            leased.push((
                enqueued_at,
                ReceivedMessage {
                    message_id: row.get("id"),
                    receive_count: receive_count as u32,
                    body: row.get("body"),
                    attributes,
                },
            ));
        }
        leased.sort_by(|a, b| (a.0, &a.1.message_id).cmp(&(b.0, &b.1.message_id)));

        Ok(leased.into_iter().map(|(_, m)| m).collect())
    }

    /// Delete a message after it has been handled.
    pub async fn ack(&self, message_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM queue_messages WHERE id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Push a leased message's visibility out to `visibility` from now.
    ///
    /// A batch is leased at once but handled record by record; renewing
    /// before each record keeps the lease ahead of the work.
    pub async fn extend_lease(&self, message_id: &str, visibility: Duration) -> Result<()> {
        sqlx::query("UPDATE queue_messages SET visible_at = ? WHERE id = ?")
            .bind(now_millis() + visibility.as_millis() as i64)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// End a lease early so the message is visible again immediately.
    pub async fn release(&self, message_id: &str) -> Result<()> {
        sqlx::query("UPDATE queue_messages SET visible_at = ? WHERE id = ?")
            .bind(now_millis())
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of messages in the queue, leased or not.
    pub async fn depth(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl MessageQueue for SqliteQueue {
    async fn send(&self, message: QueueMessage) -> Result<()> {
        let now = now_millis();
        sqlx::query(
            r#"
            INSERT INTO queue_messages (id, body, attributes_json, enqueued_at, visible_at, receive_count)
            VALUES (?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&message.body)
        .bind(serde_json::to_string(&message.attributes)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to enqueue message")?;
        Ok(())
    }
}
