//! Broker-facing side of the system.
//!
//! - [`Message`]: the JSON envelope every published event travels in
//! - [`TopicRouter`]: aggregate type to topic mapping
//! - [`Broker`] and [`InMemoryBroker`]: append-only topic logs with
//!   per-group committed offsets
//! - [`MessageProducer`] and [`BrokerProducer`]: acknowledged, retried sends
//! - [`ConsumerGroup`]: at-least-once delivery to [`MessageHandler`]s
//! - [`OutboxPublisher`]: drains the transactional outbox into the broker

pub mod broker;
pub mod consumer;
pub mod error;
pub mod message;
pub mod producer;
pub mod publisher;
pub mod router;

pub use broker::{Broker, InMemoryBroker, Record};
pub use consumer::{ConsumerConfig, ConsumerGroup, HandlerOutcome, MessageHandler};
pub use error::{MessagingError, Result};
pub use message::{Headers, Message};
pub use producer::{BrokerProducer, MessageProducer, ProducerConfig};
pub use publisher::{OutboxPublisher, PublishReport, PublisherConfig};
pub use router::{CART_EVENTS_TOPIC, MISC_EVENTS_TOPIC, TopicRouter, dead_letter_topic};
