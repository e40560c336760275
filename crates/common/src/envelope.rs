//! Versioned JSON event envelope exchanged over the broker.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trait for events carried on the wire.
///
/// Events are immutable facts named in past tense. The aggregate key is the
/// broker partition key: ordering is guaranteed only among events sharing it.
pub trait WireEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name used for routing and filtering.
    fn event_type(&self) -> &'static str;

    /// Returns the aggregate key this event belongs to.
    fn aggregate_key(&self) -> String;
}

/// An event envelope carrying a serialized event plus transport metadata.
///
/// The payload is schema-versioned JSON so consumers can evolve
/// independently of producers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The type of the event (e.g., "OrderCreated", "StockReserved").
    pub event_type: String,

    /// Partition key: the aggregate this event concerns.
    pub aggregate_id: String,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,

    /// Payload schema version.
    pub schema_version: u16,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Transport headers (delivery attempts, dead-letter diagnostics).
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl EventEnvelope {
    /// Current payload schema version written by this crate.
    pub const SCHEMA_VERSION: u16 = 1;

    /// Wraps a wire event into an envelope.
    pub fn wrap<E: WireEvent>(event: &E) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: EventId::new(),
            event_type: event.event_type().to_string(),
            aggregate_id: event.aggregate_key(),
            timestamp: Utc::now(),
            schema_version: Self::SCHEMA_VERSION,
            payload: serde_json::to_value(event)?,
            headers: HashMap::new(),
        })
    }

    /// Deserializes the payload into a concrete event type.
    pub fn decode<E: WireEvent>(&self) -> Result<E, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Creates a new envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }
}

/// Builder for constructing envelopes by hand (tests, dead-letter copies).
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    schema_version: Option<u16>,
    payload: Option<serde_json::Value>,
    headers: HashMap<String, String>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID is generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the aggregate (partition) key.
    pub fn aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    /// Sets the timestamp. If not set, `Utc::now()` is used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload schema version.
    pub fn schema_version(mut self, version: u16) -> Self {
        self.schema_version = Some(version);
        self
    }

    /// Sets the JSON payload.
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a transport header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Builds the envelope. Missing fields fall back to defaults.
    pub fn build(self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.unwrap_or_default(),
            aggregate_id: self.aggregate_id.unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            schema_version: self.schema_version.unwrap_or(EventEnvelope::SCHEMA_VERSION),
            payload: self.payload.unwrap_or(serde_json::Value::Null),
            headers: self.headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct PingEvent {
        key: String,
        count: u32,
    }

    impl WireEvent for PingEvent {
        fn event_type(&self) -> &'static str {
            "Ping"
        }

        fn aggregate_key(&self) -> String {
            self.key.clone()
        }
    }

    #[test]
    fn test_wrap_and_decode_roundtrip() {
        let event = PingEvent {
            key: "agg-1".to_string(),
            count: 7,
        };
        let envelope = EventEnvelope::wrap(&event).unwrap();

        assert_eq!(envelope.event_type, "Ping");
        assert_eq!(envelope.aggregate_id, "agg-1");
        assert_eq!(envelope.schema_version, EventEnvelope::SCHEMA_VERSION);

        let decoded: PingEvent = envelope.decode().unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_decode_malformed_payload_fails() {
        let envelope = EventEnvelope::builder()
            .event_type("Ping")
            .aggregate_id("agg-1")
            .payload(serde_json::json!({"unexpected": true}))
            .build();

        let result: Result<PingEvent, _> = envelope.decode();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_headers() {
        let envelope = EventEnvelope::builder()
            .event_type("Ping")
            .header("dlq.error.class", "Timeout")
            .build();
        assert_eq!(
            envelope.headers.get("dlq.error.class").map(String::as_str),
            Some("Timeout")
        );
    }

    #[test]
    fn test_envelope_serialization_roundtrip() {
        let event = PingEvent {
            key: "agg-2".to_string(),
            count: 1,
        };
        let envelope = EventEnvelope::wrap(&event).unwrap();
        let json = serde_json::to_string(&envelope).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_id, envelope.event_id);
        assert_eq!(back.aggregate_id, "agg-2");
    }
}
