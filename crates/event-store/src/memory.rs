use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventId, EventStoreError, Result, Version,
    outbox::{MAX_RETRIES_EXCEEDED, OutboxRecord, OutboxStatus, OutboxStore, claim_cutoff},
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
};

#[derive(Default)]
struct State {
    events: Vec<EventEnvelope>,
    outbox: Vec<OutboxRecord>,
    next_outbox_id: i64,
}

impl State {
    fn current_version(&self, aggregate_id: AggregateId) -> Version {
        self.events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::NEW)
    }

    fn processing_mut(&mut self, event_id: EventId) -> Option<&mut OutboxRecord> {
        self.outbox
            .iter_mut()
            .find(|r| r.event_id == event_id && r.status == OutboxStatus::Processing)
    }
}

/// In-memory event store and outbox, used by tests and by the server when
/// no database is configured.
///
/// Events and outbox records live behind one lock, which gives
/// `save_events` the same all-or-nothing behaviour as the PostgreSQL
/// transaction.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// Snapshot of every outbox record, in insertion order.
    pub async fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.state.read().await.outbox.clone()
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.events.clear();
        state.outbox.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save_events(
        &self,
        events: Vec<EventEnvelope>,
        options: AppendOptions,
    ) -> Result<Version> {
        validate_events_for_append(&events, options.expected_version)?;

        let aggregate_id = events[0].aggregate_id;
        let first_version = events[0].version;
        let mut state = self.state.write().await;
        let current = state.current_version(aggregate_id);

        if let Some(expected) = options.expected_version
            && current != expected
        {
            return Err(EventStoreError::OptimisticLock {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        // Mirrors the (aggregate_id, version) unique constraint.
        if first_version <= current {
            return Err(EventStoreError::OptimisticLock {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current),
                actual: current,
            });
        }

        let mut records = Vec::with_capacity(events.len());
        for event in &events {
            let mut record = OutboxRecord::pending(event)?;
            state.next_outbox_id += 1;
            record.id = state.next_outbox_id;
            records.push(record);
        }

        let last_version = events.last().map(|e| e.version).unwrap_or(current);
        metrics::counter!("events_appended_total").increment(events.len() as u64);
        state.events.extend(events);
        state.outbox.extend(records);

        Ok(last_version)
    }

    async fn load_events(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Vec<EventEnvelope>> {
        let state = self.state.read().await;
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.aggregate_type == aggregate_type)
            .cloned()
            .collect();

        if events.is_empty() {
            return Err(EventStoreError::NotFound {
                aggregate_type: aggregate_type.to_string(),
                aggregate_id,
            });
        }

        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.state.read().await.events.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version = self.state.read().await.current_version(aggregate_id);
        Ok((!version.is_new()).then_some(version))
    }
}

#[async_trait]
impl OutboxStore for InMemoryEventStore {
    async fn get_and_mark_processing(
        &self,
        limit: usize,
        max_retries: i32,
    ) -> Result<Vec<OutboxRecord>> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let mut candidates: Vec<usize> = state
            .outbox
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == OutboxStatus::Pending && r.retry_count < max_retries)
            .map(|(i, _)| i)
            .collect();
        candidates.sort_by_key(|&i| state.outbox[i].id);
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for i in candidates {
            let record = &mut state.outbox[i];
            record.status = OutboxStatus::Processing;
            record.claimed_at = Some(now);
            claimed.push(record.clone());
        }

        Ok(claimed)
    }

    async fn mark_as_published(&self, event_ids: &[EventId]) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        for record in state.outbox.iter_mut() {
            if record.status == OutboxStatus::Processing && event_ids.contains(&record.event_id) {
                record.status = OutboxStatus::Published;
                record.published_at = Some(now);
            }
        }
        Ok(())
    }

    async fn mark_as_failed(&self, event_id: EventId, message: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(record) = state.processing_mut(event_id) {
            record.status = OutboxStatus::Failed;
            record.error_message = Some(message.to_string());
        }
        Ok(())
    }

    async fn increment_retry_count(&self, event_id: EventId) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(record) = state.processing_mut(event_id) {
            record.retry_count += 1;
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        event_id: EventId,
        message: &str,
        max_retries: i32,
    ) -> Result<OutboxStatus> {
        let mut state = self.state.write().await;
        let record = state
            .processing_mut(event_id)
            .ok_or(EventStoreError::OutboxRecordNotFound(event_id))?;

        record.retry_count += 1;
        record.error_message = Some(message.to_string());
        record.claimed_at = None;
        record.status = if record.retry_count < max_retries {
            OutboxStatus::Pending
        } else {
            OutboxStatus::Failed
        };
        Ok(record.status)
    }

    async fn release_claims(&self, event_ids: &[EventId]) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut released = 0;
        for record in state.outbox.iter_mut() {
            if record.status == OutboxStatus::Processing && event_ids.contains(&record.event_id) {
                record.status = OutboxStatus::Pending;
                record.claimed_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn release_stale_claims(&self, older_than: Duration) -> Result<u64> {
        let Some(cutoff) = claim_cutoff(older_than) else {
            return Ok(0);
        };
        let mut state = self.state.write().await;
        let mut released = 0;
        for record in state.outbox.iter_mut() {
            if record.status == OutboxStatus::Processing
                && record.claimed_at.is_some_and(|at| at <= cutoff)
            {
                record.status = OutboxStatus::Pending;
                record.retry_count += 1;
                record.claimed_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn sweep_expired_retries(&self, max_retries: i32) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut swept = 0;
        for record in state.outbox.iter_mut() {
            if matches!(
                record.status,
                OutboxStatus::Pending | OutboxStatus::Processing
            ) && record.retry_count >= max_retries
            {
                record.status = OutboxStatus::Failed;
                record.error_message = Some(MAX_RETRIES_EXCEEDED.to_string());
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn get_record(&self, event_id: EventId) -> Result<Option<OutboxRecord>> {
        Ok(self
            .state
            .read()
            .await
            .outbox
            .iter()
            .find(|r| r.event_id == event_id)
            .cloned())
    }
}
