//! Message producer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::{Broker, Headers, Message, MessagingError, Result};

/// Publishes messages and returns only once the broker acknowledged them.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, message: &Message) -> Result<()>;
}

/// Send settings for [`BrokerProducer`].
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub ack_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            max_retries: 5,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

impl ProducerConfig {
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Synchronous producer over any [`Broker`].
///
/// Each send waits for the broker's acknowledgment up to the ack timeout.
/// Failed or timed out sends are retried `max_retries` times.
#[derive(Clone)]
pub struct BrokerProducer {
    broker: Arc<dyn Broker>,
    config: ProducerConfig,
}

impl BrokerProducer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self::with_config(broker, ProducerConfig::default())
    }

    pub fn with_config(broker: Arc<dyn Broker>, config: ProducerConfig) -> Self {
        Self { broker, config }
    }

    /// Sends raw bytes with the producer's timeout and retry policy.
    pub async fn send_with_retries(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> Result<()> {
        let attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let send = self
                .broker
                .send(topic, key, payload.clone(), headers.clone());
            let error = match tokio::time::timeout(self.config.ack_timeout, send).await {
                Ok(Ok(_offset)) => return Ok(()),
                Ok(Err(e)) => e,
                Err(_) => MessagingError::AckTimeout(self.config.ack_timeout),
            };

            warn!(topic, key, attempt, error = %error, "Broker send failed");
            last_error = error.to_string();
            if attempt < attempts {
                tokio::time::sleep(self.config.retry_backoff).await;
            }
        }

        Err(MessagingError::RetriesExhausted {
            topic: topic.to_string(),
            attempts,
            last_error,
        })
    }
}

#[async_trait]
impl MessageProducer for BrokerProducer {
    async fn publish(&self, topic: &str, key: &str, message: &Message) -> Result<()> {
        self.send_with_retries(topic, key, message.to_bytes()?, message.headers())
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use common::AggregateId;
    use event_store::Version;

    use super::*;
    use crate::{InMemoryBroker, Record};

    /// Fails the first `failures` sends, then delegates.
    struct FlakyBroker {
        inner: InMemoryBroker,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Broker for FlakyBroker {
        async fn send(
            &self,
            topic: &str,
            key: &str,
            payload: Vec<u8>,
            headers: Headers,
        ) -> Result<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(MessagingError::Broker("leader not available".into()));
            }
            self.inner.send(topic, key, payload, headers).await
        }

        async fn fetch(&self, group: &str, topic: &str, max: usize) -> Result<Vec<Record>> {
            self.inner.fetch(group, topic, max).await
        }

        async fn commit(&self, group: &str, topic: &str, next_offset: u64) -> Result<()> {
            self.inner.commit(group, topic, next_offset).await
        }
    }

    fn message() -> Message {
        Message::new(
            "CartCreatedEvent",
            serde_json::json!({}),
            AggregateId::new(),
            Version::first(),
        )
    }

    fn fast() -> ProducerConfig {
        ProducerConfig::default().with_retry_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn publish_sets_headers_and_key() {
        let broker = InMemoryBroker::new();
        let producer = BrokerProducer::new(Arc::new(broker.clone()));
        let message = message();

        producer.publish("t", "key-1", &message).await.unwrap();

        let records = broker.records("t").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "key-1");
        assert_eq!(records[0].headers["message-type"], "CartCreatedEvent");
        assert_eq!(records[0].headers["version"], "1");
        assert_eq!(Message::from_bytes(&records[0].payload).unwrap(), message);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let flaky = Arc::new(FlakyBroker {
            inner: InMemoryBroker::new(),
            failures: 3,
            calls: AtomicU32::new(0),
        });
        let producer = BrokerProducer::with_config(flaky.clone(), fast());

        producer.publish("t", "k", &message()).await.unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
        assert_eq!(flaky.inner.records("t").await.len(), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let flaky = Arc::new(FlakyBroker {
            inner: InMemoryBroker::new(),
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let producer = BrokerProducer::with_config(flaky.clone(), fast().with_max_retries(2));

        let err = producer.publish("t", "k", &message()).await.unwrap_err();
        assert!(matches!(err, MessagingError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }
}
