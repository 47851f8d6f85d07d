//! Type-tag to decoder registry.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::{EventEnvelope, EventStoreError, Result};

type Decoder<E> = Box<dyn Fn(serde_json::Value) -> serde_json::Result<E> + Send + Sync>;

/// Maps an event type tag to a function that decodes its payload into the
/// closed event enum `E`.
///
/// The event store, the outbox consumers and the subscribers all decode
/// through a registry, so an unregistered tag fails the same way everywhere.
pub struct EventRegistry<E> {
    decoders: HashMap<&'static str, Decoder<E>>,
}

impl<E: 'static> EventRegistry<E> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registers `event_type`, decoding its payload as `T` and wrapping it
    /// with `wrap` (typically an enum variant constructor).
    pub fn register<T>(&mut self, event_type: &'static str, wrap: fn(T) -> E) -> &mut Self
    where
        T: DeserializeOwned + 'static,
    {
        self.decoders.insert(
            event_type,
            Box::new(move |value| serde_json::from_value::<T>(value).map(wrap)),
        );
        self
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decoders.keys().copied()
    }

    /// Decodes a JSON payload.
    pub fn decode(&self, event_type: &str, payload: serde_json::Value) -> Result<E> {
        let decoder = self
            .decoders
            .get(event_type)
            .ok_or_else(|| EventStoreError::UnknownEventType(event_type.to_string()))?;
        Ok(decoder(payload)?)
    }

    /// Decodes raw payload bytes.
    pub fn deserialize(&self, event_type: &str, payload: &[u8]) -> Result<E> {
        if !self.is_registered(event_type) {
            return Err(EventStoreError::UnknownEventType(event_type.to_string()));
        }
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        self.decode(event_type, value)
    }

    pub fn decode_envelope(&self, envelope: &EventEnvelope) -> Result<E> {
        self.decode(&envelope.event_type, envelope.payload.clone())
    }
}

impl<E: 'static> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
