//! PostgreSQL event store

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Event, EventStore, EventStoreError};

type EventRow = (
    Uuid,
    String,
    String,
    String,
    i64,
    DateTime<Utc>,
    serde_json::Value,
    serde_json::Value,
);

fn event_from_row(row: EventRow) -> Result<Event, EventStoreError> {
    let (event_id, event_type, aggregate_id, aggregate_type, version, occurred_at, payload, metadata) =
        row;
    let metadata: HashMap<String, String> = serde_json::from_value(metadata)?;

    Ok(Event {
        event_id,
        event_type,
        aggregate_id,
        aggregate_type,
        version,
        occurred_at,
        payload,
        metadata,
    })
}

/// Event store backed by the `event_store` table
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Create a new PostgresEventStore with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn save_event(&self, event: &Event) -> Result<(), EventStoreError> {
        let metadata = serde_json::to_value(&event.metadata)?;

        let result = sqlx::query(
            r#"
            INSERT INTO event_store (
                event_id, event_type, aggregate_id, aggregate_type,
                version, occurred_at, payload, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id)
        .bind(&event.event_type)
        .bind(&event.aggregate_id)
        .bind(&event.aggregate_type)
        .bind(event.version)
        .bind(event.occurred_at)
        .bind(&event.payload)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EventStoreError::DuplicateEvent(event.event_id));
        }

        Ok(())
    }

    async fn get_events(
        &self,
        aggregate_id: &str,
        from_version: i64,
    ) -> Result<Vec<Event>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, aggregate_id, aggregate_type,
                   version, occurred_at, payload, metadata
            FROM event_store
            WHERE aggregate_id = $1 AND version >= $2
            ORDER BY version ASC, stored_at ASC
            "#,
        )
        .bind(aggregate_id)
        .bind(from_version)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }

    async fn get_events_since(&self, since: DateTime<Utc>) -> Result<Vec<Event>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, aggregate_id, aggregate_type,
                   version, occurred_at, payload, metadata
            FROM event_store
            WHERE occurred_at >= $1
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }

    async fn get_event_by_id(&self, event_id: Uuid) -> Result<Event, EventStoreError> {
        let row: Option<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, aggregate_id, aggregate_type,
                   version, occurred_at, payload, metadata
            FROM event_store
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => event_from_row(row),
            None => Err(EventStoreError::EventNotFound(event_id)),
        }
    }
}
