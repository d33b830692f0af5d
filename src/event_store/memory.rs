//! In-memory event store for development and tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Event, EventStore, EventStoreError};

#[derive(Debug, Default)]
struct EventLog {
    by_id: HashMap<Uuid, Event>,
    /// Aggregate ID -> event IDs in save order
    by_aggregate: HashMap<String, Vec<Uuid>>,
    /// All event IDs in save order
    order: Vec<Uuid>,
}

/// In-memory `EventStore`
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<EventLog>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save_event(&self, event: &Event) -> Result<(), EventStoreError> {
        let mut log = self.log.write().await;

        if log.by_id.contains_key(&event.event_id) {
            return Err(EventStoreError::DuplicateEvent(event.event_id));
        }

        log.by_id.insert(event.event_id, event.clone());
        log.by_aggregate
            .entry(event.aggregate_id.clone())
            .or_default()
            .push(event.event_id);
        log.order.push(event.event_id);
        Ok(())
    }

    async fn get_events(
        &self,
        aggregate_id: &str,
        from_version: i64,
    ) -> Result<Vec<Event>, EventStoreError> {
        let log = self.log.read().await;

        let mut events: Vec<Event> = log
            .by_aggregate
            .get(aggregate_id)
            .into_iter()
            .flatten()
            .filter_map(|id| log.by_id.get(id))
            .filter(|e| e.version >= from_version)
            .cloned()
            .collect();
        // Stable: equal versions keep save order
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn get_events_since(&self, since: DateTime<Utc>) -> Result<Vec<Event>, EventStoreError> {
        let log = self.log.read().await;

        let mut events: Vec<Event> = log
            .order
            .iter()
            .filter_map(|id| log.by_id.get(id))
            .filter(|e| e.occurred_at >= since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }

    async fn get_event_by_id(&self, event_id: Uuid) -> Result<Event, EventStoreError> {
        self.log
            .read()
            .await
            .by_id
            .get(&event_id)
            .cloned()
            .ok_or(EventStoreError::EventNotFound(event_id))
    }
}
