//! Processed-event bookkeeping for at-least-once consumers.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{EventId, Result};

/// Remembers which events a consumer has already applied, keyed by
/// `(consumer, event_id)`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn is_processed(&self, consumer: &str, event_id: EventId) -> Result<bool>;

    /// Records the event as processed. Returns false if it already was.
    async fn mark_processed(&self, consumer: &str, event_id: EventId) -> Result<bool>;
}

/// Process-local idempotency store. Forgets everything on restart.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyStore {
    seen: Arc<RwLock<HashSet<(String, EventId)>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.seen.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.seen.read().await.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn is_processed(&self, consumer: &str, event_id: EventId) -> Result<bool> {
        Ok(self
            .seen
            .read()
            .await
            .contains(&(consumer.to_string(), event_id)))
    }

    async fn mark_processed(&self, consumer: &str, event_id: EventId) -> Result<bool> {
        Ok(self
            .seen
            .write()
            .await
            .insert((consumer.to_string(), event_id)))
    }
}
