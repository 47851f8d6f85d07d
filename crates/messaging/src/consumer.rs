//! Consumer groups.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::ErrorKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::message::HEADER_DEAD_LETTER_REASON;
use crate::{Broker, Message, Record, Result, dead_letter_topic};

/// What a handler did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Processed, or deliberately skipped.
    Ack,
    /// Transient failure; deliver to this handler again.
    Retry(String),
    /// Will never succeed; park it on the dead-letter topic.
    DeadLetter(String),
}

impl HandlerOutcome {
    /// Classifies a failed operation by its error kind. Input and state
    /// machine violations are permanent, everything else is worth a retry.
    pub fn from_error(kind: ErrorKind, reason: impl Into<String>) -> Self {
        match kind {
            ErrorKind::NotFound | ErrorKind::InvalidParameter | ErrorKind::UnpermittedOp => {
                HandlerOutcome::DeadLetter(reason.into())
            }
            ErrorKind::OptimisticLock
            | ErrorKind::Repository
            | ErrorKind::Query
            | ErrorKind::Unknown => HandlerOutcome::Retry(reason.into()),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            HandlerOutcome::Ack => "ack",
            HandlerOutcome::Retry(_) => "retry",
            HandlerOutcome::DeadLetter(_) => "dead_letter",
        }
    }
}

/// Receives every message of the topics its group subscribes to.
///
/// Delivery is at least once: handlers must tolerate seeing the same
/// message id again.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Used in logs and dead-letter reasons.
    fn name(&self) -> &str;

    async fn handle(&self, message: &Message) -> HandlerOutcome;
}

/// Settings for one consumer group.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group: String,
    pub topics: Vec<String>,
    /// Records fetched per topic per poll.
    pub batch_size: usize,
    /// Deliveries per handler before a retrying message is dead-lettered.
    pub max_attempts: u32,
    /// Multiplied by the attempt number between deliveries.
    pub retry_backoff: Duration,
    /// Longest wait for new records when a poll came back empty.
    pub idle_wait: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: "default-group".to_string(),
            topics: Vec::new(),
            batch_size: 100,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            idle_wait: Duration::from_millis(500),
        }
    }
}

impl ConsumerConfig {
    pub fn new<I, T>(group: impl Into<String>, topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            group: group.into(),
            topics: topics.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait = wait;
        self
    }
}

/// A named group reading one or more topics and fanning every record out
/// to its handlers.
///
/// A record's offset is committed only after every handler acked it or it
/// was moved to the dead-letter topic. If the process stops in between, the
/// record is delivered again.
pub struct ConsumerGroup {
    broker: Arc<dyn Broker>,
    config: ConsumerConfig,
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl ConsumerGroup {
    pub fn new(broker: Arc<dyn Broker>, config: ConsumerConfig) -> Self {
        Self {
            broker,
            config,
            handlers: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn group(&self) -> &str {
        &self.config.group
    }

    /// Processes one batch from every subscribed topic. Returns the number
    /// of records committed.
    pub async fn poll_once(&self) -> Result<usize> {
        let mut committed = 0;
        for topic in &self.config.topics {
            let records = self
                .broker
                .fetch(&self.config.group, topic, self.config.batch_size)
                .await?;

            for record in records {
                self.process_record(&record).await?;
                self.broker
                    .commit(&self.config.group, topic, record.offset + 1)
                    .await?;
                committed += 1;
            }
        }
        Ok(committed)
    }

    /// Polls until `shutdown` is cancelled. Errors are logged and the loop
    /// carries on from the last committed offset.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(group = %self.config.group, topics = ?self.config.topics, "Consumer group started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let processed = match self.poll_once().await {
                Ok(n) => n,
                Err(e) => {
                    error!(group = %self.config.group, error = %e, "Consumer poll failed");
                    0
                }
            };

            if processed == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = self.broker.wait_for_records(self.config.idle_wait) => {}
                }
            }
        }

        info!(group = %self.config.group, "Consumer group stopped");
    }

    async fn process_record(&self, record: &Record) -> Result<()> {
        let message = match Message::from_bytes(&record.payload) {
            Ok(message) => message,
            Err(e) => {
                let reason = format!("undecodable record: {e}");
                warn!(
                    group = %self.config.group,
                    topic = %record.topic,
                    offset = record.offset,
                    %reason,
                    "Dead-lettering record"
                );
                self.count("dead_letter");
                return self.dead_letter(record, &reason).await;
            }
        };

        for handler in &self.handlers {
            match self.deliver(handler.as_ref(), &message).await {
                HandlerOutcome::Ack => self.count("ack"),
                HandlerOutcome::Retry(reason) | HandlerOutcome::DeadLetter(reason) => {
                    let reason = format!("{}: {reason}", handler.name());
                    warn!(
                        group = %self.config.group,
                        message_id = %message.id,
                        message_type = %message.message_type,
                        %reason,
                        "Dead-lettering message"
                    );
                    self.count("dead_letter");
                    self.dead_letter(record, &reason).await?;
                }
            }
        }
        Ok(())
    }

    /// Runs one handler, retrying while it asks for it and attempts remain.
    async fn deliver(&self, handler: &dyn MessageHandler, message: &Message) -> HandlerOutcome {
        let mut attempt = 1;
        loop {
            let outcome = handler.handle(message).await;
            match &outcome {
                HandlerOutcome::Retry(reason) if attempt < self.config.max_attempts => {
                    self.count(outcome.label());
                    debug!(
                        handler = handler.name(),
                        message_id = %message.id,
                        attempt,
                        %reason,
                        "Handler asked for a retry"
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    attempt += 1;
                }
                _ => return outcome,
            }
        }
    }

    async fn dead_letter(&self, record: &Record, reason: &str) -> Result<()> {
        let mut headers = record.headers.clone();
        headers.insert(HEADER_DEAD_LETTER_REASON.to_string(), reason.to_string());
        self.broker
            .send(
                &dead_letter_topic(&record.topic),
                &record.key,
                record.payload.clone(),
                headers,
            )
            .await?;
        Ok(())
    }

    fn count(&self, outcome: &'static str) {
        metrics::counter!(
            "consumer_messages_total",
            "group" => self.config.group.clone(),
            "outcome" => outcome
        )
        .increment(1);
    }
}
