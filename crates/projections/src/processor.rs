//! Projection processor for rebuilding read models from the event log.

use std::sync::Arc;

use event_store::{EventStore, EventStoreError};
use futures_util::StreamExt;

use crate::projection::{ProjectedEvent, Projection};
use crate::{ProjectionError, Result};

/// Replays stored events into projections.
///
/// Live updates arrive through consumer groups; the processor covers the
/// other direction:
/// - Rebuild: resets every projection and replays the whole log
/// - Single event delivery: applies one event to every projection
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Arc<dyn Projection>>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    /// Creates a new processor with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
        }
    }

    /// Registers a projection with this processor.
    pub fn register(&mut self, projection: Arc<dyn Projection>) {
        self.projections.push(projection);
    }

    /// Returns the number of registered projections.
    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Applies a single event to all registered projections.
    #[tracing::instrument(skip(self, event), fields(event_id = %event.event_id))]
    pub async fn process_event(&self, event: &ProjectedEvent) -> Result<()> {
        for projection in &self.projections {
            projection.apply(event).await?;
            metrics::counter!("projections_events_processed", "projection" => projection.name())
                .increment(1);
        }
        Ok(())
    }

    /// Clears every view and replays the whole log in commit order.
    /// Returns the number of events replayed.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<u64> {
        for projection in &self.projections {
            projection.reset().await?;
        }

        let mut stream = self.store.stream_all_events().await?;
        let mut replayed: u64 = 0;

        while let Some(result) = stream.next().await {
            let envelope = result?;
            let event = match ProjectedEvent::from_envelope(&envelope) {
                Ok(event) => event,
                Err(ProjectionError::EventStore(EventStoreError::UnknownEventType(event_type))) => {
                    tracing::warn!(%event_type, event_id = %envelope.event_id, "skipping unknown event");
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.process_event(&event).await?;
            replayed += 1;
        }

        tracing::info!(events_replayed = replayed, "rebuild complete");

        Ok(replayed)
    }
}
