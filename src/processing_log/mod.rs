//! Processing Log module
//!
//! Per (event, handler) idempotency tracker. The bus consults it before every
//! handler invocation, which turns at-least-once delivery into at-most-once
//! handler effect.

pub mod memory;
pub mod postgres;
mod record;

use async_trait::async_trait;
use uuid::Uuid;

pub use memory::InMemoryProcessingLog;
pub use postgres::PostgresProcessingLog;
pub use record::{ProcessingRecord, ProcessingStatus};

/// Processing Log Error
#[derive(Debug, thiserror::Error)]
pub enum ProcessingLogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Idempotency tracker keyed by (event_id, handler_name)
#[async_trait]
pub trait ProcessingLog: Send + Sync {
    /// Upsert the pair to `processing`, counting one more attempt
    async fn mark_processing(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<(), ProcessingLogError>;

    /// Atomically claim the pair for one dispatch.
    ///
    /// Moves the pair to `processing` (counting one more attempt) only if it
    /// has no record yet or its record is `failed`. Returns `false` when the
    /// pair is already completed or another dispatcher holds it, in which
    /// case the handler must not run.
    async fn try_claim(&self, event_id: Uuid, handler_name: &str)
        -> Result<bool, ProcessingLogError>;

    /// Upsert the pair to `completed`
    async fn mark_completed(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<(), ProcessingLogError>;

    /// Upsert the pair to `failed`, keeping the error text
    async fn mark_failed(
        &self,
        event_id: Uuid,
        handler_name: &str,
        error: &str,
    ) -> Result<(), ProcessingLogError>;

    /// True only if the pair is `completed`
    async fn is_processed(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<bool, ProcessingLogError>;

    /// Full record of one pair, if any attempt was made
    async fn get_record(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<Option<ProcessingRecord>, ProcessingLogError>;

    /// Distinct IDs of events with at least one failed handler, oldest failure first
    async fn failed_event_ids(&self, limit: usize) -> Result<Vec<Uuid>, ProcessingLogError>;

    /// Flip `processing` records untouched for longer than `older_than` to
    /// `failed`, so dispatches lost to a crash become eligible for redelivery.
    /// Returns how many records were reset.
    async fn reset_stale_processing(
        &self,
        older_than: chrono::Duration,
    ) -> Result<u64, ProcessingLogError>;
}

/// Error text stored by `reset_stale_processing`
pub const STALE_PROCESSING_ERROR: &str = "processing timed out";
