//! Transactional outbox: durable publish intents written alongside events.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, EventEnvelope, EventId, Result, Version};

/// Error text stored on records failed by [`OutboxStore::sweep_expired_retries`].
pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

/// Delivery state of an outbox record.
///
/// PENDING -> PROCESSING -> PUBLISHED, or back to PENDING on a retryable
/// failure, or FAILED once retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::Failed)
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSING" => Ok(OutboxStatus::Processing),
            "PUBLISHED" => Ok(OutboxStatus::Published),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

/// One publish intent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    /// Surrogate key, assigned by the store.
    pub id: i64,
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_type: String,
    /// Serialized event payload.
    pub event_data: Vec<u8>,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub error_message: Option<String>,
    /// When the record was last flipped to PROCESSING.
    pub claimed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Builds the PENDING record for a freshly saved event. `id` is filled
    /// in by the store.
    pub fn pending(event: &EventEnvelope) -> Result<Self> {
        Ok(Self {
            id: 0,
            event_id: event.event_id,
            aggregate_id: event.aggregate_id,
            aggregate_type: event.aggregate_type.clone(),
            event_type: event.event_type.clone(),
            event_data: event.payload_bytes()?,
            version: event.version,
            created_at: event.timestamp,
            published_at: None,
            status: OutboxStatus::Pending,
            retry_count: 0,
            error_message: None,
            claimed_at: None,
        })
    }
}

/// Claim time before which a PROCESSING record counts as stale.
/// `None` when `older_than` reaches past the representable range.
pub(crate) fn claim_cutoff(older_than: Duration) -> Option<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(older_than).ok()?;
    Utc::now().checked_sub_signed(delta)
}

/// Storage side of the outbox.
///
/// Records are inserted by [`crate::EventStore::save_events`]; this trait
/// covers everything the publisher does with them afterwards.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Atomically claims up to `limit` PENDING records with
    /// `retry_count < max_retries` in insertion order, flipping them to
    /// PROCESSING. Concurrent callers never receive the same record.
    async fn get_and_mark_processing(
        &self,
        limit: usize,
        max_retries: i32,
    ) -> Result<Vec<OutboxRecord>>;

    /// Marks PROCESSING records PUBLISHED in one transaction.
    async fn mark_as_published(&self, event_ids: &[EventId]) -> Result<()>;

    /// Marks a PROCESSING record FAILED without further retries.
    async fn mark_as_failed(&self, event_id: EventId, message: &str) -> Result<()>;

    /// Bumps the retry counter of a PROCESSING record.
    async fn increment_retry_count(&self, event_id: EventId) -> Result<()>;

    /// Records a failed publish in one transaction: stores the error, bumps
    /// the retry counter and returns the record to PENDING, or to FAILED if
    /// the counter reached `max_retries`. Returns the resulting status.
    async fn record_failure(
        &self,
        event_id: EventId,
        message: &str,
        max_retries: i32,
    ) -> Result<OutboxStatus>;

    /// Hands PROCESSING records back to PENDING untouched: the retry
    /// counter and error message stay as they are. Returns how many were
    /// released.
    async fn release_claims(&self, event_ids: &[EventId]) -> Result<u64>;

    /// Returns PROCESSING records claimed more than `older_than` ago to
    /// PENDING. Returns how many were released.
    async fn release_stale_claims(&self, older_than: Duration) -> Result<u64>;

    /// Fails PENDING/PROCESSING records whose retries are exhausted.
    /// Returns how many were swept.
    async fn sweep_expired_retries(&self, max_retries: i32) -> Result<u64>;

    /// Looks up a record by event id.
    async fn get_record(&self, event_id: EventId) -> Result<Option<OutboxRecord>>;
}
