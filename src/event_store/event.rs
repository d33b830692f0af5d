//! Bus event envelope

use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// A domain event as stored and dispatched by the bus.
///
/// The event ID is the deduplication key; everything else is carried as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub version: i64,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Create an event with a fresh ID at version 1.
    ///
    /// `occurred_at` is truncated to microseconds so the event reads back
    /// from `TIMESTAMPTZ` storage unchanged.
    pub fn new<P: Serialize>(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            version: 1,
            occurred_at: Utc::now().trunc_subsecs(6),
            payload: serde_json::to_value(payload)?,
            metadata: HashMap::new(),
        })
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Deserialize the payload into a typed event
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_new_defaults() {
        let event = Event::new("deposit.completed", "w-1", "wallet", &json!({"amount": 10})).unwrap();

        assert!(!event.event_id.is_nil());
        assert_eq!(event.version, 1);
        assert_eq!(chrono::Timelike::nanosecond(&event.occurred_at) % 1_000, 0);
        assert_eq!(event.payload["amount"], 10);
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn test_event_builders() {
        let event = Event::new("x", "agg", "wallet", &json!({}))
            .unwrap()
            .with_version(4)
            .with_metadata_entry("source", "test");

        assert_eq!(event.version, 4);
        assert_eq!(event.metadata.get("source").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_payload_as() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Payload {
            amount: i64,
        }

        let event = Event::new("x", "agg", "wallet", &json!({"amount": 7})).unwrap();
        assert_eq!(event.payload_as::<Payload>().unwrap(), Payload { amount: 7 });
    }
}
