use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventStoreError, Result, Version,
    idempotency::IdempotencyStore,
    outbox::{MAX_RETRIES_EXCEEDED, OutboxRecord, OutboxStatus, OutboxStore, claim_cutoff},
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
};

const EVENT_COLUMNS: &str =
    "id, event_type, aggregate_id, aggregate_type, version, timestamp, payload";

// Spelled out rather than formatted: the query borrows its SQL for as long
// as the returned stream lives.
const STREAM_ALL_EVENTS: &str = "SELECT id, event_type, aggregate_id, aggregate_type, version, \
     timestamp, payload FROM events ORDER BY sequence ASC";

const OUTBOX_COLUMNS: &str = "id, event_id, aggregate_id, aggregate_type, event_type, event_data, \
     version, created_at, published_at, status, retry_count, error_message, claimed_at";

/// PostgreSQL-backed event store and outbox.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
        })
    }

    fn row_to_record(row: PgRow) -> Result<OutboxRecord> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<OutboxStatus>()
            .map_err(|e| EventStoreError::Database(sqlx::Error::Decode(e.into())))?;

        Ok(OutboxRecord {
            id: row.try_get("id")?,
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            event_data: row.try_get("event_data")?,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
            status,
            retry_count: row.try_get("retry_count")?,
            error_message: row.try_get("error_message")?,
            claimed_at: row.try_get("claimed_at")?,
        })
    }

    async fn insert_outbox_record(
        tx: &mut Transaction<'_, Postgres>,
        record: &OutboxRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox (event_id, aggregate_id, aggregate_type, event_type, event_data, version, created_at, status, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0)
            "#,
        )
        .bind(record.event_id.as_uuid())
        .bind(record.aggregate_id.as_uuid())
        .bind(&record.aggregate_type)
        .bind(&record.event_type)
        .bind(&record.event_data)
        .bind(record.version.as_i64())
        .bind(record.created_at)
        .bind(OutboxStatus::Pending.as_str())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn save_events(
        &self,
        events: Vec<EventEnvelope>,
        options: AppendOptions,
    ) -> Result<Version> {
        validate_events_for_append(&events, options.expected_version)?;

        let aggregate_id = events[0].aggregate_id;
        let mut tx = self.pool.begin().await?;

        if let Some(expected) = options.expected_version {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                    .bind(aggregate_id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await?;

            let actual = current.map(Version::new).unwrap_or(Version::NEW);
            if actual != expected {
                return Err(EventStoreError::OptimisticLock {
                    aggregate_id,
                    expected,
                    actual,
                });
            }
        }

        let mut last_version = Version::NEW;
        for event in &events {
            sqlx::query(
                r#"
                INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, timestamp, payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(event.aggregate_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(event.version.as_i64())
            .bind(event.timestamp)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // A concurrent writer committed the same version first.
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_aggregate_version")
                {
                    return EventStoreError::OptimisticLock {
                        aggregate_id,
                        expected: options.expected_version.unwrap_or(Version::NEW),
                        actual: event.version,
                    };
                }
                EventStoreError::Database(e)
            })?;

            Self::insert_outbox_record(&mut tx, &OutboxRecord::pending(event)?).await?;
            last_version = event.version;
        }

        tx.commit().await?;
        metrics::counter!("events_appended_total").increment(events.len() as u64);
        tracing::debug!(%aggregate_id, version = %last_version, count = events.len(), "events saved");
        Ok(last_version)
    }

    async fn load_events(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE aggregate_id = $1 AND aggregate_type = $2 ORDER BY version ASC"
        ))
        .bind(aggregate_id.as_uuid())
        .bind(aggregate_type)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(EventStoreError::NotFound {
                aggregate_type: aggregate_type.to_string(),
                aggregate_id,
            });
        }

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::StreamExt;

        let stream = sqlx::query(STREAM_ALL_EVENTS)
            .fetch(&self.pool)
            .map(|result| match result {
                Ok(row) => Self::row_to_event(row),
                Err(e) => Err(EventStoreError::Database(e)),
            });

        Ok(Box::pin(stream))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }
}

#[async_trait]
impl OutboxStore for PostgresEventStore {
    async fn get_and_mark_processing(
        &self,
        limit: usize,
        max_retries: i32,
    ) -> Result<Vec<OutboxRecord>> {
        let mut tx = self.pool.begin().await?;

        // Rows locked by another claimer are skipped, not waited on.
        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id FROM outbox
                WHERE status = 'PENDING' AND retry_count < $1
                ORDER BY id ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox o
            SET status = 'PROCESSING', claimed_at = now()
            FROM claimable c
            WHERE o.id = c.id
            RETURNING o.*
            "#,
        )
        .bind(max_retries)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut records = rows
            .into_iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn mark_as_published(&self, event_ids: &[EventId]) -> Result<()> {
        if event_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = event_ids.iter().map(EventId::as_uuid).collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE outbox SET status = 'PUBLISHED', published_at = now()
            WHERE status = 'PROCESSING' AND event_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_as_failed(&self, event_id: EventId, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox SET status = 'FAILED', error_message = $2
            WHERE event_id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_retry_count(&self, event_id: EventId) -> Result<()> {
        sqlx::query(
            "UPDATE outbox SET retry_count = retry_count + 1 WHERE event_id = $1 AND status = 'PROCESSING'",
        )
        .bind(event_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        event_id: EventId,
        message: &str,
        max_retries: i32,
    ) -> Result<OutboxStatus> {
        let mut tx = self.pool.begin().await?;
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE outbox
            SET retry_count = retry_count + 1,
                error_message = $2,
                claimed_at = NULL,
                status = CASE WHEN retry_count + 1 < $3 THEN 'PENDING' ELSE 'FAILED' END
            WHERE event_id = $1 AND status = 'PROCESSING'
            RETURNING status
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(message)
        .bind(max_retries)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        status
            .ok_or(EventStoreError::OutboxRecordNotFound(event_id))?
            .parse::<OutboxStatus>()
            .map_err(|e| EventStoreError::Database(sqlx::Error::Decode(e.into())))
    }

    async fn release_claims(&self, event_ids: &[EventId]) -> Result<u64> {
        if event_ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = event_ids.iter().map(EventId::as_uuid).collect();
        let result = sqlx::query(
            r#"
            UPDATE outbox SET status = 'PENDING', claimed_at = NULL
            WHERE status = 'PROCESSING' AND event_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn release_stale_claims(&self, older_than: Duration) -> Result<u64> {
        let Some(cutoff) = claim_cutoff(older_than) else {
            return Ok(0);
        };
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'PENDING', retry_count = retry_count + 1, claimed_at = NULL
            WHERE status = 'PROCESSING' AND claimed_at <= $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn sweep_expired_retries(&self, max_retries: i32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox SET status = 'FAILED', error_message = $2
            WHERE status IN ('PENDING', 'PROCESSING') AND retry_count >= $1
            "#,
        )
        .bind(max_retries)
        .bind(MAX_RETRIES_EXCEEDED)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_record(&self, event_id: EventId) -> Result<Option<OutboxRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE event_id = $1"
        ))
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }
}

/// PostgreSQL-backed [`IdempotencyStore`] over the `processed_events` table.
#[derive(Clone)]
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn is_processed(&self, consumer: &str, event_id: EventId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE consumer = $1 AND event_id = $2)",
        )
        .bind(consumer)
        .bind(event_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn mark_processed(&self, consumer: &str, event_id: EventId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (consumer, event_id)
            VALUES ($1, $2)
            ON CONFLICT (consumer, event_id) DO NOTHING
            "#,
        )
        .bind(consumer)
        .bind(event_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
