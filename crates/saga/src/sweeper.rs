//! Fires due delayed messages.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use messaging::MessageProducer;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::delay::{DelayScheduler, due_after};

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// Entries fired per sweep.
    pub batch_size: usize,
    /// How far a failed publish is pushed back.
    pub retry_delay: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            batch_size: 100,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl SweeperConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub fired: usize,
    pub rescheduled: usize,
    /// Entries the queue could not complete or reschedule. They stay
    /// leased and fire again once the lease runs out.
    pub unsettled: usize,
}

/// Periodically publishes due entries of a [`DelayScheduler`].
pub struct DelaySweeper {
    scheduler: Arc<dyn DelayScheduler>,
    producer: Arc<dyn MessageProducer>,
    config: SweeperConfig,
}

impl DelaySweeper {
    pub fn new(
        scheduler: Arc<dyn DelayScheduler>,
        producer: Arc<dyn MessageProducer>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            scheduler,
            producer,
            config,
        }
    }

    /// Fires everything due now. A fired entry is completed; an entry whose
    /// publish fails goes back into the queue `retry_delay` later. Queue
    /// errors on either path are logged and the rest of the batch still
    /// runs.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let due = self.scheduler.take_due(now, self.config.batch_size).await?;
        let mut report = SweepReport::default();

        for entry in due {
            let message_id = entry.message.id;
            match self
                .producer
                .publish(&entry.topic, &entry.key, &entry.message)
                .await
            {
                Ok(()) => {
                    debug!(%message_id, topic = %entry.topic, "Fired delayed message");
                    report.fired += 1;
                    if let Err(e) = self.scheduler.complete(message_id).await {
                        error!(%message_id, error = %e, "Failed to complete fired delayed message");
                        report.unsettled += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        %message_id,
                        topic = %entry.topic,
                        error = %e,
                        "Delayed publish failed, rescheduling"
                    );
                    let requeued = match due_after(now, self.config.retry_delay) {
                        Ok(at) => self.scheduler.retry_at(message_id, at).await,
                        Err(e) => Err(e),
                    };
                    match requeued {
                        Ok(()) => report.rescheduled += 1,
                        Err(e) => {
                            error!(%message_id, error = %e, "Failed to reschedule delayed message");
                            report.unsettled += 1;
                        }
                    }
                }
            }
        }

        if report.fired > 0 {
            metrics::counter!("delayed_messages_fired_total").increment(report.fired as u64);
        }
        if report.unsettled > 0 {
            metrics::counter!("delayed_messages_unsettled_total")
                .increment(report.unsettled as u64);
        }
        Ok(report)
    }

    /// Sweeps every interval until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Delay sweeper started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Delay sweep failed");
                    }
                }
            }
        }

        info!("Delay sweeper stopped");
    }
}
