//! Event store, transactional outbox and consumer idempotency storage.
//!
//! - [`EventStore`]: append-only, optimistically locked event log
//! - [`OutboxStore`]: publish intents written atomically with the events
//! - [`IdempotencyStore`]: per-consumer processed-event bookkeeping
//! - [`EventRegistry`]: type tag to decoder mapping
//!
//! Each contract has an in-memory and a PostgreSQL implementation.

pub mod error;
pub mod event;
pub mod idempotency;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod registry;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
pub use memory::InMemoryEventStore;
pub use outbox::{MAX_RETRIES_EXCEEDED, OutboxRecord, OutboxStatus, OutboxStore};
pub use postgres::{PostgresEventStore, PostgresIdempotencyStore};
pub use registry::EventRegistry;
pub use store::{AppendOptions, EventStore, EventStream};
