//! Processing records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing status of one (event, handler) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl From<String> for ProcessingStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "completed" => ProcessingStatus::Completed,
            "failed" => ProcessingStatus::Failed,
            // Unknown states are treated as in flight so they are never skipped
            _ => ProcessingStatus::Processing,
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored processing information
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingRecord {
    pub event_id: Uuid,
    pub handler_name: String,
    pub status: ProcessingStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingRecord {
    pub(crate) fn new(event_id: Uuid, handler_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            event_id,
            handler_name: handler_name.to_string(),
            status: ProcessingStatus::Processing,
            attempts: 0,
            last_error: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProcessingStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [
            ProcessingStatus::Processing,
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(ProcessingStatus::from(status.to_string()), status);
        }
        assert_eq!(
            ProcessingStatus::from("bogus".to_string()),
            ProcessingStatus::Processing
        );
    }
}
