//! Outbox records
//!
//! An outbox row is written in the same transaction as the ledger mutation
//! it announces, so a committed movement always leaves its event behind even
//! if the process dies before the bus stores it.

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::event_store::Event;

/// One staged event awaiting publication
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    /// The event exactly as it will be published; its ID keys the row
    pub event: Event,
    /// Failed relay attempts
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            attempts: 0,
            last_error: None,
            created_at: Utc::now().trunc_subsecs(6),
            published_at: None,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event.event_id
    }

    pub fn is_pending(&self) -> bool {
        self.published_at.is_none()
    }

    pub(crate) fn publish(&mut self) {
        if self.published_at.is_none() {
            self.published_at = Some(Utc::now().trunc_subsecs(6));
        }
    }

    pub(crate) fn fail(&mut self, error: &str) {
        self.attempts += 1;
        self.last_error = Some(error.to_string());
    }
}
