//! In-memory processing log for development and tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ProcessingLog, ProcessingLogError, ProcessingRecord, ProcessingStatus, STALE_PROCESSING_ERROR,
};

type Key = (Uuid, String);

/// In-memory `ProcessingLog`
#[derive(Debug, Clone, Default)]
pub struct InMemoryProcessingLog {
    records: Arc<RwLock<HashMap<Key, ProcessingRecord>>>,
}

impl InMemoryProcessingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `update` to the pair's record, creating it first if needed
    async fn upsert(&self, event_id: Uuid, handler_name: &str, update: impl FnOnce(&mut ProcessingRecord)) {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let record = records
            .entry((event_id, handler_name.to_string()))
            .or_insert_with(|| ProcessingRecord::new(event_id, handler_name, now));
        update(record);
        record.updated_at = now;
    }
}

#[async_trait]
impl ProcessingLog for InMemoryProcessingLog {
    async fn mark_processing(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<(), ProcessingLogError> {
        self.upsert(event_id, handler_name, |record| {
            record.status = ProcessingStatus::Processing;
            record.attempts += 1;
        })
        .await;
        Ok(())
    }

    async fn try_claim(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<bool, ProcessingLogError> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let key = (event_id, handler_name.to_string());

        match records.get_mut(&key) {
            Some(record) if record.status == ProcessingStatus::Failed => {
                record.status = ProcessingStatus::Processing;
                record.attempts += 1;
                record.updated_at = now;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                let mut record = ProcessingRecord::new(event_id, handler_name, now);
                record.attempts = 1;
                records.insert(key, record);
                Ok(true)
            }
        }
    }

    async fn mark_completed(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<(), ProcessingLogError> {
        self.upsert(event_id, handler_name, |record| {
            record.status = ProcessingStatus::Completed;
            record.completed_at = Some(Utc::now());
        })
        .await;
        Ok(())
    }

    async fn mark_failed(
        &self,
        event_id: Uuid,
        handler_name: &str,
        error: &str,
    ) -> Result<(), ProcessingLogError> {
        self.upsert(event_id, handler_name, |record| {
            record.status = ProcessingStatus::Failed;
            record.last_error = Some(error.to_string());
        })
        .await;
        Ok(())
    }

    async fn is_processed(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<bool, ProcessingLogError> {
        let records = self.records.read().await;
        Ok(records
            .get(&(event_id, handler_name.to_string()))
            .map(ProcessingRecord::is_completed)
            .unwrap_or(false))
    }

    async fn get_record(
        &self,
        event_id: Uuid,
        handler_name: &str,
    ) -> Result<Option<ProcessingRecord>, ProcessingLogError> {
        let records = self.records.read().await;
        Ok(records.get(&(event_id, handler_name.to_string())).cloned())
    }

    async fn failed_event_ids(&self, limit: usize) -> Result<Vec<Uuid>, ProcessingLogError> {
        let records = self.records.read().await;

        let mut failed: Vec<&ProcessingRecord> = records
            .values()
            .filter(|r| r.status == ProcessingStatus::Failed)
            .collect();
        failed.sort_by_key(|r| r.updated_at);

        let mut ids: Vec<Uuid> = Vec::new();
        for record in failed {
            if ids.len() >= limit {
                break;
            }
            if !ids.contains(&record.event_id) {
                ids.push(record.event_id);
            }
        }
        Ok(ids)
    }

    async fn reset_stale_processing(
        &self,
        older_than: chrono::Duration,
    ) -> Result<u64, ProcessingLogError> {
        let now = Utc::now();
        let cutoff = now - older_than;
        let mut records = self.records.write().await;

        let mut reset = 0;
        for record in records.values_mut() {
            if record.status == ProcessingStatus::Processing && record.updated_at < cutoff {
                record.status = ProcessingStatus::Failed;
                record.last_error = Some(STALE_PROCESSING_ERROR.to_string());
                record.updated_at = now;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_is_processed_only_when_completed() {
        let log = InMemoryProcessingLog::new();
        let id = Uuid::new_v4();

        assert!(!log.is_processed(id, "h").await.unwrap());

        log.mark_processing(id, "h").await.unwrap();
        assert!(!log.is_processed(id, "h").await.unwrap());

        log.mark_failed(id, "h", "boom").await.unwrap();
        assert!(!log.is_processed(id, "h").await.unwrap());

        log.mark_processing(id, "h").await.unwrap();
        log.mark_completed(id, "h").await.unwrap();
        assert!(log.is_processed(id, "h").await.unwrap());

        // Other handlers are tracked independently
        assert!(!log.is_processed(id, "other").await.unwrap());
    }

    #[tokio::test]
    async fn test_try_claim_only_from_absent_or_failed() {
        let log = InMemoryProcessingLog::new();
        let id = Uuid::new_v4();

        assert!(log.try_claim(id, "h").await.unwrap());
        // Held by the first claimant
        assert!(!log.try_claim(id, "h").await.unwrap());

        log.mark_failed(id, "h", "boom").await.unwrap();
        assert!(log.try_claim(id, "h").await.unwrap());

        log.mark_completed(id, "h").await.unwrap();
        assert!(!log.try_claim(id, "h").await.unwrap());

        let record = log.get_record(id, "h").await.unwrap().unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.status, ProcessingStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_have_one_winner() {
        let log = InMemoryProcessingLog::new();
        let id = Uuid::new_v4();
        log.mark_failed(id, "h", "boom").await.unwrap();

        let claims: Vec<_> = (0..8)
            .map(|_| {
                let log = log.clone();
                tokio::spawn(async move { log.try_claim(id, "h").await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for claim in claims {
            if claim.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_marks_are_idempotent_upserts() {
        let log = InMemoryProcessingLog::new();
        let id = Uuid::new_v4();

        log.mark_completed(id, "h").await.unwrap();
        log.mark_completed(id, "h").await.unwrap();

        let record = log.get_record(id, "h").await.unwrap().unwrap();
        assert_eq!(record.status, ProcessingStatus::Completed);
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_attempts_and_last_error() {
        let log = InMemoryProcessingLog::new();
        let id = Uuid::new_v4();

        log.mark_processing(id, "h").await.unwrap();
        log.mark_failed(id, "h", "timeout").await.unwrap();
        log.mark_processing(id, "h").await.unwrap();

        let record = log.get_record(id, "h").await.unwrap().unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.status, ProcessingStatus::Processing);
        assert_eq!(record.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_failed_event_ids_distinct_and_limited() {
        let log = InMemoryProcessingLog::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        log.mark_failed(first, "a", "x").await.unwrap();
        log.mark_failed(first, "b", "x").await.unwrap();
        log.mark_failed(second, "a", "x").await.unwrap();
        log.mark_completed(Uuid::new_v4(), "a").await.unwrap();

        let ids = log.failed_event_ids(10).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first) && ids.contains(&second));

        assert_eq!(log.failed_event_ids(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_stale_processing() {
        let log = InMemoryProcessingLog::new();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();

        log.mark_processing(stale, "h").await.unwrap();
        log.mark_processing(fresh, "h").await.unwrap();
        {
            let mut records = log.records.write().await;
            let record = records.get_mut(&(stale, "h".to_string())).unwrap();
            record.updated_at = Utc::now() - chrono::Duration::minutes(10);
        }

        let reset = log
            .reset_stale_processing(chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(reset, 1);

        let record = log.get_record(stale, "h").await.unwrap().unwrap();
        assert_eq!(record.status, ProcessingStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some(STALE_PROCESSING_ERROR));

        let untouched = log.get_record(fresh, "h").await.unwrap().unwrap();
        assert_eq!(untouched.status, ProcessingStatus::Processing);
    }
}
