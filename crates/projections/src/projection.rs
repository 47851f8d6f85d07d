//! Core projection trait.

use async_trait::async_trait;
use common::AggregateId;
use domain::{DomainEvent, StreamEvent};
use event_store::{EventEnvelope, EventId, Version};
use messaging::Message;

use crate::{ProjectionError, Result};

/// A decoded domain event with the identity a projection needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedEvent {
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    pub version: Version,
    pub event: StreamEvent,
}

impl ProjectedEvent {
    /// Decodes a stored event, as read during a rebuild.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self> {
        Ok(Self {
            event_id: envelope.event_id,
            aggregate_id: envelope.aggregate_id,
            version: envelope.version,
            event: StreamEvent::registry().decode_envelope(envelope)?,
        })
    }

    /// Decodes a published event, as delivered by a consumer group.
    pub fn from_message(message: &Message) -> Result<Self> {
        Ok(Self {
            event_id: message.event_id(),
            aggregate_id: message.aggregate_id,
            version: message.version(),
            event: StreamEvent::registry().decode(&message.message_type, message.data.clone())?,
        })
    }
}

/// Decides whether an event is the next one for a view at `applied`.
/// Without a view (`None`) every event passes and the projection decides.
///
/// Returns `Ok(false)` for an event at or below `applied`, which is a
/// redelivery, and an [`ProjectionError::OutOfOrder`] error when versions
/// were skipped, so the delivery is retried instead of losing the gap.
pub(crate) fn next_in_line(
    aggregate_id: AggregateId,
    applied: Option<i64>,
    version: i64,
) -> Result<bool> {
    let Some(applied) = applied else {
        return Ok(true);
    };
    let expected = applied + 1;
    if version < expected {
        return Ok(false);
    }
    if version > expected {
        return Err(ProjectionError::OutOfOrder {
            aggregate_id,
            expected,
            got: version,
        });
    }
    Ok(true)
}

/// A projection folds events into a read model.
///
/// Events of one aggregate arrive in version order but may arrive more
/// than once; an event at or below the version already in the view must
/// leave the view unchanged, and an event past the next version fails.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Returns the name of this projection.
    fn name(&self) -> &'static str;

    /// Applies one event. Events for other aggregates are ignored.
    async fn apply(&self, event: &ProjectedEvent) -> Result<()>;

    /// Drops everything the projection has built.
    async fn reset(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_in_line_accepts_only_the_next_version() {
        let id = AggregateId::new();

        assert!(next_in_line(id, None, 1).unwrap());
        assert!(next_in_line(id, Some(2), 3).unwrap());
        assert!(!next_in_line(id, Some(2), 2).unwrap());
        assert!(!next_in_line(id, Some(2), 1).unwrap());

        match next_in_line(id, Some(1), 3) {
            Err(ProjectionError::OutOfOrder { expected, got, .. }) => {
                assert_eq!((expected, got), (2, 3));
            }
            other => panic!("expected a gap, got {other:?}"),
        }
        assert!(next_in_line(id, None, 2).unwrap());
    }
}
