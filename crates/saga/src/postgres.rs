//! PostgreSQL delay queue.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use messaging::Message;
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::Result;
use crate::delay::{DEFAULT_LEASE, DelayScheduler, DelayedEntry, due_after};

/// Delay queue in `delayed_messages`; survives restarts.
///
/// Due rows are leased by setting `claimed_until` over a `SKIP LOCKED`
/// selection, so concurrent sweepers never take the same row at once. A
/// row is deleted only when the sweeper completes it; a sweeper that dies
/// mid-batch leaves rows that become due again when their lease runs out.
#[derive(Clone)]
pub struct PostgresDelayQueue {
    pool: PgPool,
    lease: Duration,
}

impl PostgresDelayQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn row_to_entry(row: PgRow) -> Result<DelayedEntry> {
        let Json(message): Json<Message> = row.try_get("message")?;
        Ok(DelayedEntry {
            topic: row.try_get("topic")?,
            key: row.try_get("routing_key")?,
            message,
            execute_at: row.try_get("execute_at")?,
        })
    }
}

#[async_trait]
impl DelayScheduler for PostgresDelayQueue {
    async fn schedule(&self, entry: DelayedEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO delayed_messages (message_id, topic, routing_key, message, execute_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(entry.message.id)
        .bind(&entry.topic)
        .bind(&entry.key)
        .bind(Json(&entry.message))
        .bind(entry.execute_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DelayedEntry>> {
        let leased_until = due_after(now, self.lease)?;
        let rows = sqlx::query(
            r#"
            UPDATE delayed_messages SET claimed_until = $3
            WHERE message_id IN (
                SELECT message_id FROM delayed_messages
                WHERE execute_at <= $1
                  AND (claimed_until IS NULL OR claimed_until <= $1)
                ORDER BY execute_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING topic, routing_key, message, execute_at
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .bind(leased_until)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = rows
            .into_iter()
            .map(Self::row_to_entry)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING does not preserve the subquery order.
        entries.sort_by_key(|entry| entry.execute_at);
        Ok(entries)
    }

    async fn complete(&self, message_id: Uuid) -> Result<()> {
        sqlx::query(
            "DELETE FROM delayed_messages WHERE message_id = $1 AND claimed_until IS NOT NULL",
        )
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retry_at(&self, message_id: Uuid, execute_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE delayed_messages SET execute_at = $2, claimed_until = NULL
            WHERE message_id = $1 AND claimed_until IS NOT NULL
            "#,
        )
        .bind(message_id)
        .bind(execute_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM delayed_messages WHERE claimed_until IS NULL OR claimed_until <= now()",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as usize)
    }
}
