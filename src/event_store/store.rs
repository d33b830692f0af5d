//! Event Store port

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Event, EventStoreError};

/// Durable event log
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomic insert-if-absent keyed by event ID.
    ///
    /// Fails with `EventStoreError::DuplicateEvent` if the ID already exists.
    async fn save_event(&self, event: &Event) -> Result<(), EventStoreError>;

    /// Events of one aggregate with `version >= from_version`, ascending by version
    async fn get_events(
        &self,
        aggregate_id: &str,
        from_version: i64,
    ) -> Result<Vec<Event>, EventStoreError>;

    /// Events that occurred at or after `since`, ascending by occurrence
    async fn get_events_since(&self, since: DateTime<Utc>) -> Result<Vec<Event>, EventStoreError>;

    /// Point lookup; `EventStoreError::EventNotFound` if absent
    async fn get_event_by_id(&self, event_id: Uuid) -> Result<Event, EventStoreError>;
}
