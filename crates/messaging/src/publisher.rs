//! Outbox publisher.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::AggregateId;
use event_store::{EventId, OutboxStatus, OutboxStore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{Message, MessageProducer, Result, TopicRouter};

/// Polling settings for [`OutboxPublisher`].
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Publish attempts per record before it is failed for good.
    pub max_retries: i32,
    /// A PROCESSING claim older than this belongs to a dead publisher.
    pub stale_claim_after: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            batch_size: 100,
            max_retries: 3,
            stale_claim_after: Duration::from_secs(30),
        }
    }
}

impl PublisherConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_stale_claim_after(mut self, after: Duration) -> Self {
        self.stale_claim_after = after;
        self
    }
}

/// What one publisher tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub claimed: usize,
    pub published: usize,
    /// Records that failed this tick, whether returned to PENDING or FAILED.
    pub failed: usize,
    /// Records handed back unsent because an earlier record of the same
    /// aggregate failed this tick.
    pub deferred: usize,
    /// Stale PROCESSING claims returned to PENDING.
    pub released: u64,
    /// Records failed because their retries were exhausted.
    pub swept: u64,
}

/// Moves outbox records to the broker.
///
/// Every tick claims a batch, publishes each record on the topic the router
/// picks with the aggregate id as key, and records the result on the outbox
/// row. Several publishers may run against one store; claims never overlap.
///
/// Records of one aggregate leave in version order. Once a send fails, the
/// aggregate's later records in the batch are not sent and go back to
/// PENDING with their retry counters untouched, to be claimed again behind
/// the failed one.
pub struct OutboxPublisher {
    outbox: Arc<dyn OutboxStore>,
    producer: Arc<dyn MessageProducer>,
    router: Arc<TopicRouter>,
    config: PublisherConfig,
}

impl OutboxPublisher {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        producer: Arc<dyn MessageProducer>,
        router: Arc<TopicRouter>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            outbox,
            producer,
            router,
            config,
        }
    }

    /// Runs a single tick.
    pub async fn publish_pending(&self) -> Result<PublishReport> {
        let mut report = PublishReport {
            released: self
                .outbox
                .release_stale_claims(self.config.stale_claim_after)
                .await?,
            swept: self
                .outbox
                .sweep_expired_retries(self.config.max_retries)
                .await?,
            ..PublishReport::default()
        };
        if report.released > 0 {
            warn!(released = report.released, "Released stale outbox claims");
        }
        if report.swept > 0 {
            warn!(swept = report.swept, "Swept outbox records with exhausted retries");
            metrics::counter!("outbox_records_swept_total").increment(report.swept);
        }

        let records = self
            .outbox
            .get_and_mark_processing(self.config.batch_size, self.config.max_retries)
            .await?;
        report.claimed = records.len();
        if records.is_empty() {
            return Ok(report);
        }
        metrics::counter!("outbox_records_claimed_total").increment(records.len() as u64);

        let mut published: Vec<EventId> = Vec::with_capacity(records.len());
        let mut blocked: HashSet<AggregateId> = HashSet::new();
        let mut held: Vec<EventId> = Vec::new();
        for record in &records {
            if blocked.contains(&record.aggregate_id) {
                held.push(record.event_id);
                continue;
            }

            let message = match Message::from_outbox(record) {
                Ok(message) => message,
                Err(e) => {
                    error!(event_id = %record.event_id, error = %e, "Unpublishable outbox record");
                    self.outbox
                        .mark_as_failed(record.event_id, &e.to_string())
                        .await?;
                    blocked.insert(record.aggregate_id);
                    report.failed += 1;
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    continue;
                }
            };

            let topic = self
                .router
                .topic_for(&record.event_type, &record.aggregate_type);
            let key = record.aggregate_id.to_string();

            match self.producer.publish(topic, &key, &message).await {
                Ok(()) => {
                    debug!(event_id = %record.event_id, topic, "Published outbox record");
                    published.push(record.event_id);
                }
                Err(e) => {
                    let status = self
                        .outbox
                        .record_failure(record.event_id, &e.to_string(), self.config.max_retries)
                        .await?;
                    warn!(
                        event_id = %record.event_id,
                        topic,
                        retry_count = record.retry_count + 1,
                        status = %status,
                        error = %e,
                        "Outbox publish failed"
                    );
                    if status == OutboxStatus::Failed {
                        error!(event_id = %record.event_id, "Outbox record failed permanently");
                    }
                    blocked.insert(record.aggregate_id);
                    report.failed += 1;
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                }
            }
        }

        if !published.is_empty() {
            self.outbox.mark_as_published(&published).await?;
            metrics::counter!("outbox_records_published_total").increment(published.len() as u64);
        }
        report.published = published.len();

        if !held.is_empty() {
            self.outbox.release_claims(&held).await?;
            debug!(
                deferred = held.len(),
                aggregates = blocked.len(),
                "Deferred outbox records behind failed publishes"
            );
            metrics::counter!("outbox_records_deferred_total").increment(held.len() as u64);
        }
        report.deferred = held.len();

        Ok(report)
    }

    /// Ticks every poll interval until `shutdown` is cancelled. A tick in
    /// flight is finished before returning.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Outbox publisher started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.publish_pending().await {
                        Ok(report) if report.claimed > 0 => {
                            debug!(?report, "Outbox tick");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Outbox tick failed"),
                    }
                }
            }
        }

        info!("Outbox publisher stopped");
    }
}
