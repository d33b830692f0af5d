//! Event Store Errors
//!
//! Error types for event store operations.

use uuid::Uuid;

/// Errors that can occur in the event store
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// An event with this ID was already stored
    #[error("Duplicate event: {0}")]
    DuplicateEvent(Uuid),

    /// No event with this ID
    #[error("Event not found: {0}")]
    EventNotFound(Uuid),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Check if this error is an event ID collision
    pub fn is_duplicate(&self) -> bool {
        matches!(self, EventStoreError::DuplicateEvent(_))
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, EventStoreError::Database(_))
    }
}
