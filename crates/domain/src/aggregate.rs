//! Core aggregate and domain event traits.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{EventEnvelope, EventId, EventRegistry, EventStoreError, Version};
use serde::Serialize;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
///
/// Serializing an event yields its payload only; the type tag travels
/// separately and selects the decoder in [`DomainEvent::registry`].
pub trait DomainEvent: Serialize + Clone + std::fmt::Debug + Send + Sync + Sized + 'static {
    /// Returns the event type name.
    ///
    /// This is the wire tag stored with the event and sent to the broker.
    fn event_type(&self) -> &'static str;

    /// Registry able to decode every variant of this event type.
    fn registry() -> &'static EventRegistry<Self>;
}

/// A domain event together with the metadata it was stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent<E> {
    pub event_id: EventId,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
    pub event: E,
}

impl<E: DomainEvent> RecordedEvent<E> {
    /// Records a freshly raised event at `version`.
    pub fn new(version: Version, event: E) -> Self {
        Self {
            event_id: EventId::new(),
            version,
            timestamp: Utc::now(),
            event,
        }
    }

    /// Decodes a stored envelope through the event's registry.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, EventStoreError> {
        Ok(Self {
            event_id: envelope.event_id,
            version: envelope.version,
            timestamp: envelope.timestamp,
            event: E::registry().decode_envelope(envelope)?,
        })
    }

    /// Builds the envelope this event is persisted as.
    pub fn to_envelope(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<EventEnvelope, EventStoreError> {
        EventEnvelope::builder()
            .event_id(self.event_id)
            .event_type(self.event.event_type())
            .aggregate_id(aggregate_id)
            .aggregate_type(aggregate_type)
            .version(self.version)
            .timestamp(self.timestamp)
            .payload(&self.event)?
            .build()
    }
}

/// Trait for aggregates in an event-sourced system.
///
/// An aggregate is an in-memory state machine derived from its own event
/// history. It is never persisted itself:
/// - it starts empty at [`Version::NEW`]
/// - it is hydrated by replaying stored events
/// - commands validate against current state and raise new events, which are
///   applied immediately and kept as uncommitted until stored
pub trait Aggregate: Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The commands this aggregate accepts.
    type Command: Clone + Send + Sync;

    /// The type of errors this aggregate can produce.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the aggregate type name.
    ///
    /// Used for event store organization and routing.
    fn aggregate_type() -> &'static str;

    /// Creates an empty aggregate at [`Version::NEW`].
    fn new(id: AggregateId) -> Self;

    fn id(&self) -> AggregateId;

    /// Returns the current version of the aggregate.
    fn version(&self) -> Version;

    /// Validates a command and raises its events.
    ///
    /// On error the aggregate is left untouched and no event is raised.
    fn execute(&mut self, command: Self::Command) -> Result<(), Self::Error>;

    /// Applies an event to the aggregate, updating its state and version.
    ///
    /// This method must be pure and deterministic and must not fail:
    /// events represent facts that have already happened.
    fn apply(&mut self, event: &Self::Event, version: Version);

    /// Events raised since the last [`Aggregate::mark_committed`].
    fn uncommitted_events(&self) -> &[RecordedEvent<Self::Event>];

    fn uncommitted_events_mut(&mut self) -> &mut Vec<RecordedEvent<Self::Event>>;

    /// Clears the uncommitted list once the events are durably stored.
    fn mark_committed(&mut self) {
        self.uncommitted_events_mut().clear();
    }

    /// Returns true until the first event is applied.
    fn is_new(&self) -> bool {
        self.version().is_new()
    }

    /// Applies `event` at the next version and records it as uncommitted.
    fn raise(&mut self, event: Self::Event) {
        let version = self.version().next();
        self.apply(&event, version);
        self.uncommitted_events_mut()
            .push(RecordedEvent::new(version, event));
    }

    /// Replays stored history in order. Never touches the uncommitted list,
    /// so it may be called repeatedly.
    fn hydrate(&mut self, events: impl IntoIterator<Item = RecordedEvent<Self::Event>>) {
        for recorded in events {
            self.apply(&recorded.event, recorded.version);
        }
    }
}
