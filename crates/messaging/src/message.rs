//! Transport envelope.

use std::collections::BTreeMap;

use common::AggregateId;
use event_store::{EventId, OutboxRecord, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Header naming the message type.
pub const HEADER_MESSAGE_TYPE: &str = "message-type";
/// Header carrying the aggregate version.
pub const HEADER_VERSION: &str = "version";
/// Header set on records moved to a dead-letter topic.
pub const HEADER_DEAD_LETTER_REASON: &str = "dead-letter-reason";

/// Broker record headers.
pub type Headers = BTreeMap<String, String>;

/// The JSON envelope every message travels in:
/// `{id, type, data, aggregate_id, version}`.
///
/// For published events `id` is the event id, so consumers can deduplicate
/// redeliveries by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: serde_json::Value,
    pub aggregate_id: AggregateId,
    pub version: i64,
}

impl Message {
    pub fn new(
        message_type: impl Into<String>,
        data: serde_json::Value,
        aggregate_id: AggregateId,
        version: Version,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type: message_type.into(),
            data,
            aggregate_id,
            version: version.as_i64(),
        }
    }

    /// Envelope for a claimed outbox record.
    pub fn from_outbox(record: &OutboxRecord) -> Result<Self> {
        Ok(Self {
            id: record.event_id.as_uuid(),
            message_type: record.event_type.clone(),
            data: serde_json::from_slice(&record.event_data)?,
            aggregate_id: record.aggregate_id,
            version: record.version.as_i64(),
        })
    }

    pub fn event_id(&self) -> EventId {
        EventId::from_uuid(self.id)
    }

    pub fn version(&self) -> Version {
        Version::new(self.version)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Headers sent alongside the payload.
    pub fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert(HEADER_MESSAGE_TYPE.to_string(), self.message_type.clone());
        headers.insert(HEADER_VERSION.to_string(), self.version.to_string());
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::EventEnvelope;
    use serde_json::json;

    #[test]
    fn wire_shape() {
        let aggregate_id = AggregateId::new();
        let message = Message::new(
            "CartCreatedEvent",
            json!({"user_id": "u"}),
            aggregate_id,
            Version::first(),
        );

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "CartCreatedEvent");
        assert_eq!(value["data"]["user_id"], "u");
        assert_eq!(value["aggregate_id"], aggregate_id.to_string());
        assert_eq!(value["version"], 1);
        assert_eq!(value["id"], message.id.to_string());
    }

    #[test]
    fn from_outbox_keeps_event_identity() {
        let envelope = EventEnvelope::builder()
            .event_type("CartSubmittedEvent")
            .aggregate_id(AggregateId::new())
            .aggregate_type("Cart")
            .version(Version::new(4))
            .payload_raw(json!({"total_amount": 150}))
            .build()
            .unwrap();
        let record = OutboxRecord::pending(&envelope).unwrap();

        let message = Message::from_outbox(&record).unwrap();
        assert_eq!(message.event_id(), envelope.event_id);
        assert_eq!(message.aggregate_id, envelope.aggregate_id);
        assert_eq!(message.version(), Version::new(4));
        assert_eq!(message.data, json!({"total_amount": 150}));

        let headers = message.headers();
        assert_eq!(headers[HEADER_MESSAGE_TYPE], "CartSubmittedEvent");
        assert_eq!(headers[HEADER_VERSION], "4");
    }

    #[test]
    fn corrupt_outbox_payload_is_an_error() {
        let envelope = EventEnvelope::builder()
            .event_type("CartCreatedEvent")
            .aggregate_id(AggregateId::new())
            .aggregate_type("Cart")
            .version(Version::first())
            .payload_raw(json!({}))
            .build()
            .unwrap();
        let mut record = OutboxRecord::pending(&envelope).unwrap();
        record.event_data = b"not json".to_vec();

        assert!(Message::from_outbox(&record).is_err());
    }
}
