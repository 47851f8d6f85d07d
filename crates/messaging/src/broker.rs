//! Broker transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};

use crate::{Headers, Result};

/// A record as stored in a topic log.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub topic: String,
    /// Position in the topic, starting at 0.
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Headers,
    pub timestamp: DateTime<Utc>,
}

/// Append-only topics with per-group committed offsets.
///
/// A group sees every record of a topic from its committed offset onwards;
/// fetching does not advance the offset, committing does. Records fetched
/// but never committed are delivered again on the next fetch.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Appends a record and returns its offset once it is stored.
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>, headers: Headers)
    -> Result<u64>;

    /// Up to `max` records after the group's committed offset.
    async fn fetch(&self, group: &str, topic: &str, max: usize) -> Result<Vec<Record>>;

    /// Sets the group's committed offset: the next offset it wants to see.
    async fn commit(&self, group: &str, topic: &str, next_offset: u64) -> Result<()>;

    /// Waits until new records may be available or `timeout` elapses.
    async fn wait_for_records(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Record>>,
    offsets: HashMap<(String, String), u64>,
}

/// Process-local broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
    appended: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record ever sent to `topic`.
    pub async fn records(&self, topic: &str) -> Vec<Record> {
        self.state
            .read()
            .await
            .topics
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn committed_offset(&self, group: &str, topic: &str) -> u64 {
        self.state
            .read()
            .await
            .offsets
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> Result<u64> {
        let offset = {
            let mut state = self.state.write().await;
            let log = state.topics.entry(topic.to_string()).or_default();
            let offset = log.len() as u64;
            log.push(Record {
                topic: topic.to_string(),
                offset,
                key: key.to_string(),
                payload,
                headers,
                timestamp: Utc::now(),
            });
            offset
        };
        self.appended.notify_waiters();
        Ok(offset)
    }

    async fn fetch(&self, group: &str, topic: &str, max: usize) -> Result<Vec<Record>> {
        let state = self.state.read().await;
        let committed = state
            .offsets
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0) as usize;

        Ok(state
            .topics
            .get(topic)
            .map(|log| log.iter().skip(committed).take(max).cloned().collect())
            .unwrap_or_default())
    }

    async fn commit(&self, group: &str, topic: &str, next_offset: u64) -> Result<()> {
        let mut state = self.state.write().await;
        let committed = state
            .offsets
            .entry((group.to_string(), topic.to_string()))
            .or_insert(0);
        // Offsets never move backwards.
        *committed = (*committed).max(next_offset);
        Ok(())
    }

    async fn wait_for_records(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.appended.notified()).await;
    }
}
