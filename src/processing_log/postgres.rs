//! PostgreSQL processing log
//!
//! Every mark is a single `INSERT ... ON CONFLICT DO UPDATE`, so concurrent
//! dispatchers never race on a read-then-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    ProcessingLog, ProcessingLogError, ProcessingRecord, ProcessingStatus, STALE_PROCESSING_ERROR,
};

/// Processing log backed by the `event_processing_log` table
#[derive(Debug, Clone)]
pub struct PostgresProcessingLog {
    pool: PgPool,
}

impl PostgresProcessingLog {
    /// Create a new PostgresProcessingLog
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessingLog for PostgresProcessingLog {
    async fn mark_processing(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<(), ProcessingLogError> {
        sqlx::query(
            r#"
            INSERT INTO event_processing_log (event_id, handler_name, status, attempts)
            VALUES ($1, $2, 'processing', 1)
            ON CONFLICT (event_id, handler_name)
            DO UPDATE SET
                status = 'processing',
                attempts = event_processing_log.attempts + 1,
                updated_at = NOW()
            "#,
        )
        .bind(event_id)
        .bind(handler_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn try_claim(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<bool, ProcessingLogError> {
        // The conflict branch only fires for failed rows; otherwise nothing
        // is returned and the claim is lost.
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO event_processing_log (event_id, handler_name, status, attempts)
            VALUES ($1, $2, 'processing', 1)
            ON CONFLICT (event_id, handler_name)
            DO UPDATE SET
                status = 'processing',
                attempts = event_processing_log.attempts + 1,
                updated_at = NOW()
            WHERE event_processing_log.status = 'failed'
            RETURNING event_id
            "#,
        )
        .bind(event_id)
        .bind(handler_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn mark_completed(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<(), ProcessingLogError> {
        sqlx::query(
            r#"
            INSERT INTO event_processing_log (event_id, handler_name, status, completed_at)
            VALUES ($1, $2, 'completed', NOW())
            ON CONFLICT (event_id, handler_name)
            DO UPDATE SET
                status = 'completed',
                completed_at = NOW(),
                updated_at = NOW()
            "#,
        )
        .bind(event_id)
        .bind(handler_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        event_id: Uuid,
        handler_name: &str,
        error: &str,
    ) -> Result<(), ProcessingLogError> {
        sqlx::query(
            r#"
            INSERT INTO event_processing_log (event_id, handler_name, status, last_error)
            VALUES ($1, $2, 'failed', $3)
            ON CONFLICT (event_id, handler_name)
            DO UPDATE SET
                status = 'failed',
                last_error = $3,
                updated_at = NOW()
            "#,
        )
        .bind(event_id)
        .bind(handler_name)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_processed(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<bool, ProcessingLogError> {
        let processed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM event_processing_log
                WHERE event_id = $1 AND handler_name = $2 AND status = 'completed'
            )
            "#,
        )
        .bind(event_id)
        .bind(handler_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(processed)
    }

    async fn get_record(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<Option<ProcessingRecord>, ProcessingLogError> {
        let result: Option<(
            Uuid,
            String,
            String,
            i32,
            Option<String>,
            DateTime<Utc>,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
        )> = sqlx::query_as(
            r#"
            SELECT
                event_id, handler_name, status, attempts, last_error,
                started_at, updated_at, completed_at
            FROM event_processing_log
            WHERE event_id = $1 AND handler_name = $2
            "#,
        )
        .bind(event_id)
        .bind(handler_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result.map(
            |(event_id, handler_name, status, attempts, last_error, started_at, updated_at, completed_at)| {
                ProcessingRecord {
                    event_id,
                    handler_name,
                    status: ProcessingStatus::from(status),
                    attempts,
                    last_error,
                    started_at,
                    updated_at,
                    completed_at,
                }
            },
        ))
    }

    async fn failed_event_ids(&self, limit: usize) -> Result<Vec<Uuid>, ProcessingLogError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT event_id
            FROM event_processing_log
            WHERE status = 'failed'
            GROUP BY event_id
            ORDER BY MIN(updated_at) ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn reset_stale_processing(
        &self,
        older_than: chrono::Duration,
    ) -> Result<u64, ProcessingLogError> {
        let cutoff = Utc::now() - older_than;

        let rows = sqlx::query(
            r#"
            UPDATE event_processing_log
            SET status = 'failed', last_error = $2, updated_at = NOW()
            WHERE status = 'processing' AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .bind(STALE_PROCESSING_ERROR)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            tracing::warn!("Reset {} stale processing records to failed", rows);
        }

        Ok(rows)
    }
}
