//! Delayed message scheduling.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use messaging::Message;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{Result, SagaError};

/// A message waiting for its due time.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayedEntry {
    pub topic: String,
    pub key: String,
    pub message: Message,
    pub execute_at: DateTime<Utc>,
}

/// `now + delay`, failing instead of overflowing.
pub fn due_after(now: DateTime<Utc>, delay: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or(SagaError::DelayOutOfRange(delay))
}

/// Holds messages until they are due.
///
/// Entries are keyed by message id: scheduling an id that is already
/// queued, waiting or leased, keeps the existing entry.
///
/// Firing is at least once. [`take_due`](Self::take_due) leases entries
/// instead of removing them; the caller [`complete`](Self::complete)s an
/// entry once its message went out or hands it back with
/// [`retry_at`](Self::retry_at). An entry whose lease runs out is due again.
#[async_trait]
pub trait DelayScheduler: Send + Sync {
    /// Queues an entry. Returns `false` when its message id was already
    /// queued and the entry was dropped.
    async fn schedule(&self, entry: DelayedEntry) -> Result<bool>;

    /// Leases up to `limit` entries due at `now`, earliest first. Leased
    /// entries are hidden from other callers until the lease runs out.
    async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DelayedEntry>>;

    /// Drops a leased entry for good.
    async fn complete(&self, message_id: Uuid) -> Result<()>;

    /// Returns a leased entry to the queue, due at `execute_at`.
    async fn retry_at(&self, message_id: Uuid, execute_at: DateTime<Utc>) -> Result<()>;

    /// Entries waiting to fire; leased entries are not counted.
    async fn pending_count(&self) -> Result<usize>;

    /// Schedules `message` on `topic` to fire `delay` from now. Returns
    /// `false` when the message id was already queued.
    async fn schedule_delayed(
        &self,
        topic: &str,
        key: &str,
        message: Message,
        delay: Duration,
    ) -> Result<bool> {
        let execute_at = due_after(Utc::now(), delay)?;
        let inserted = self
            .schedule(DelayedEntry {
                topic: topic.to_string(),
                key: key.to_string(),
                message,
                execute_at,
            })
            .await?;
        if inserted {
            metrics::counter!("delayed_messages_scheduled_total").increment(1);
        }
        Ok(inserted)
    }
}

/// How long a taken entry stays hidden before it is due again.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Heap slot ordered by due time, then by insertion.
struct Slot {
    seq: u64,
    entry: DelayedEntry,
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Slot {}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry
            .execute_at
            .cmp(&other.entry.execute_at)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<Slot>>,
    /// Taken entries with the end of their lease.
    leased: HashMap<Uuid, (DateTime<Utc>, DelayedEntry)>,
    /// Ids in the heap or leased.
    queued: HashSet<Uuid>,
    next_seq: u64,
}

impl QueueState {
    fn push(&mut self, entry: DelayedEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Slot { seq, entry }));
    }
}

/// Process-local delay queue: a min-heap on due time. Loses everything on
/// restart; use [`crate::PostgresDelayQueue`] where that matters.
#[derive(Clone)]
pub struct InMemoryDelayQueue {
    state: Arc<Mutex<QueueState>>,
    lease: Duration,
}

impl Default for InMemoryDelayQueue {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            lease: DEFAULT_LEASE,
        }
    }
}

impl InMemoryDelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

#[async_trait]
impl DelayScheduler for InMemoryDelayQueue {
    async fn schedule(&self, entry: DelayedEntry) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.queued.insert(entry.message.id) {
            return Ok(false);
        }
        state.push(entry);
        Ok(true)
    }

    async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DelayedEntry>> {
        let leased_until = due_after(now, self.lease)?;
        let mut state = self.state.lock().await;

        let expired: Vec<Uuid> = state
            .leased
            .iter()
            .filter(|(_, (until, _))| *until <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((_, entry)) = state.leased.remove(&id) {
                state.push(entry);
            }
        }

        let mut due = Vec::new();
        while due.len() < limit {
            match state.heap.peek() {
                Some(Reverse(slot)) if slot.entry.execute_at <= now => {}
                _ => break,
            }
            if let Some(Reverse(slot)) = state.heap.pop() {
                state
                    .leased
                    .insert(slot.entry.message.id, (leased_until, slot.entry.clone()));
                due.push(slot.entry);
            }
        }
        Ok(due)
    }

    async fn complete(&self, message_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.leased.remove(&message_id).is_some() {
            state.queued.remove(&message_id);
        }
        Ok(())
    }

    async fn retry_at(&self, message_id: Uuid, execute_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some((_, mut entry)) = state.leased.remove(&message_id) {
            entry.execute_at = execute_at;
            state.push(entry);
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize> {
        Ok(self.state.lock().await.heap.len())
    }
}
