use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Options for saving events.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOptions {
    /// Version the caller loaded the aggregate at. `None` skips the check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expects the aggregate to be at `version`.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Expects the aggregate to have no history.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::NEW)
    }
}

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Append-only event log.
///
/// Every implementation writes one PENDING outbox record per saved event in
/// the same atomic step as the events themselves, so a durable state change
/// and its publish intent can never diverge.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Saves events for a single aggregate atomically, together with their
    /// outbox records.
    ///
    /// Fails with `OptimisticLock` if the stored version differs from
    /// `options.expected_version` or a concurrent writer claimed the same
    /// version first. Returns the aggregate version after the write.
    async fn save_events(&self, events: Vec<EventEnvelope>, options: AppendOptions)
    -> Result<Version>;

    /// Loads an aggregate's history in version order.
    ///
    /// Returns `NotFound` if the aggregate has no events.
    async fn load_events(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Vec<EventEnvelope>>;

    /// Streams every stored event in commit order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Current version of an aggregate, `None` if it has no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;
}

/// Checks that a batch is non-empty, targets one aggregate and carries
/// gap-free versions continuing from `expected` when one is given.
pub fn validate_events_for_append(
    events: &[EventEnvelope],
    expected: Option<Version>,
) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty event list".to_string(),
        ));
    };

    if let Some(expected) = expected
        && first.version != expected.next()
    {
        return Err(EventStoreError::InvalidAppend(format!(
            "first event version must be {}, got {}",
            expected.next(),
            first.version
        )));
    }

    let mut previous = first.version;
    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type
        {
            return Err(EventStoreError::InvalidAppend(
                "all events must belong to the same aggregate".to_string(),
            ));
        }
        if event.version != previous.next() {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {}, got {}",
                previous.next(),
                event.version
            )));
        }
        previous = event.version;
    }

    Ok(())
}
