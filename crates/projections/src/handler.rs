//! Consumer-group adapter for projections.

use std::sync::Arc;

use async_trait::async_trait;
use event_store::{EventStoreError, IdempotencyStore};
use messaging::{HandlerOutcome, Message, MessageHandler};
use tracing::debug;

use crate::{ProjectedEvent, Projection, ProjectionError};

/// Delivers broker messages to a [`Projection`], each event id at most
/// once per projection.
///
/// The event is applied before it is marked processed, so a crash in
/// between re-applies it on redelivery; projections skip events at or
/// below the view's version, which makes that harmless. An event that
/// skips past the view's next version is retried and stays unmarked.
pub struct ProjectionHandler {
    projection: Arc<dyn Projection>,
    idempotency: Arc<dyn IdempotencyStore>,
}

impl ProjectionHandler {
    pub fn new(projection: Arc<dyn Projection>, idempotency: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            projection,
            idempotency,
        }
    }
}

#[async_trait]
impl MessageHandler for ProjectionHandler {
    fn name(&self) -> &str {
        self.projection.name()
    }

    async fn handle(&self, message: &Message) -> HandlerOutcome {
        let event = match ProjectedEvent::from_message(message) {
            Ok(event) => event,
            Err(ProjectionError::EventStore(EventStoreError::UnknownEventType(event_type))) => {
                debug!(projection = self.name(), %event_type, "Ignoring unknown event type");
                return HandlerOutcome::Ack;
            }
            Err(e) => return HandlerOutcome::DeadLetter(e.to_string()),
        };

        let consumer = self.projection.name();
        match self.idempotency.is_processed(consumer, event.event_id).await {
            Ok(true) => {
                debug!(projection = consumer, event_id = %event.event_id, "Already projected");
                return HandlerOutcome::Ack;
            }
            Ok(false) => {}
            Err(e) => return HandlerOutcome::from_error(e.kind(), e.to_string()),
        }

        if let Err(e) = self.projection.apply(&event).await {
            return HandlerOutcome::from_error(e.kind(), e.to_string());
        }
        if let Err(e) = self.idempotency.mark_processed(consumer, event.event_id).await {
            return HandlerOutcome::from_error(e.kind(), e.to_string());
        }

        metrics::counter!("projections_events_processed", "projection" => consumer).increment(1);
        HandlerOutcome::Ack
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use common::AggregateId;
    use event_store::{InMemoryIdempotencyStore, Version};
    use serde_json::json;

    use super::*;
    use crate::Result;

    #[derive(Default)]
    struct Counting {
        applied: AtomicUsize,
    }

    #[async_trait]
    impl Projection for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn apply(&self, _event: &ProjectedEvent) -> Result<()> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn reset(&self) -> Result<()> {
            Ok(())
        }
    }

    fn submitted() -> Message {
        Message::new(
            "CartSubmittedEvent",
            json!({
                "total_amount": 10,
                "item_count": 1,
                "submitted_at": "2026-01-01T00:00:00Z"
            }),
            AggregateId::new(),
            Version::new(3),
        )
    }

    #[tokio::test]
    async fn duplicate_messages_apply_once() {
        let projection = Arc::new(Counting::default());
        let handler = ProjectionHandler::new(
            projection.clone(),
            Arc::new(InMemoryIdempotencyStore::new()),
        );
        let message = submitted();

        assert_eq!(handler.handle(&message).await, HandlerOutcome::Ack);
        assert_eq!(handler.handle(&message).await, HandlerOutcome::Ack);
        assert_eq!(projection.applied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_types_are_acked_without_applying() {
        let projection = Arc::new(Counting::default());
        let handler = ProjectionHandler::new(
            projection.clone(),
            Arc::new(InMemoryIdempotencyStore::new()),
        );
        let message = Message::new("SomethingElse", json!({}), AggregateId::new(), Version::first());

        assert_eq!(handler.handle(&message).await, HandlerOutcome::Ack);
        assert_eq!(projection.applied.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn version_gaps_are_retried_and_not_marked() {
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());
        let handler = ProjectionHandler::new(
            Arc::new(crate::CartProjector::new(Arc::new(
                crate::InMemoryCartViewStore::new(),
            ))),
            idempotency.clone(),
        );
        let cart_id = AggregateId::new();
        let created = Message::new(
            "CartCreatedEvent",
            json!({
                "cart_id": cart_id,
                "user_id": uuid::Uuid::new_v4(),
                "tenant_id": AggregateId::new(),
                "created_at": "2026-01-01T00:00:00Z"
            }),
            cart_id,
            Version::first(),
        );
        assert_eq!(handler.handle(&created).await, HandlerOutcome::Ack);

        let mut message = submitted();
        message.aggregate_id = cart_id;

        assert!(matches!(
            handler.handle(&message).await,
            HandlerOutcome::Retry(reason) if reason.contains("expected version 2, got 3")
        ));
        assert!(!idempotency
            .is_processed("cart-projector", message.event_id())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn malformed_payloads_are_dead_lettered() {
        let handler = ProjectionHandler::new(
            Arc::new(Counting::default()),
            Arc::new(InMemoryIdempotencyStore::new()),
        );
        let message = Message::new(
            "CartSubmittedEvent",
            json!({"total_amount": "lots"}),
            AggregateId::new(),
            Version::first(),
        );

        assert!(matches!(
            handler.handle(&message).await,
            HandlerOutcome::DeadLetter(_)
        ));
    }
}
