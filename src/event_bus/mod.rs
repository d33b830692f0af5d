//! Resilient Event Bus
//!
//! Persistent, idempotent, replayable publish/subscribe built on an
//! `EventStore` and a `ProcessingLog`:
//! - every event is durably stored before any handler sees it
//! - each (event, handler) pair takes effect at most once
//! - failed pairs are retried by `replay`, `redeliver` or `redeliver_failed`
//!
//! `publish_async` is a best-effort tier: a bounded queue served by a fixed
//! worker pool, dropping work when the queue is full or the bus is closed.

mod bus;
mod error;
mod handler;

use async_trait::async_trait;

pub use bus::{BusConfig, RedeliveryReport, ReplayReport, ResilientBus};
pub use error::{BusError, HandlerError};
pub use handler::EventHandler;

use crate::event_store::Event;
use std::sync::Arc;

/// Bus contract used by the use cases
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Store the event, then dispatch it to every subscribed handler.
    /// Returns only after every handler was attempted.
    async fn publish(&self, event: Event) -> Result<(), BusError>;

    /// Enqueue the event for a worker without waiting. Returns false if it
    /// was dropped (queue full or bus closed).
    fn publish_async(&self, event: Event) -> bool;

    /// Register a handler under an event type
    fn subscribe(
        &self,
        event_type: &str,
        handler_name: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError>;

    /// Re-dispatch stored events of one aggregate from `from_version` on
    async fn replay(&self, aggregate_id: &str, from_version: i64)
        -> Result<ReplayReport, BusError>;

    /// Stop accepting work and wait for the workers
    async fn close(&self) -> Result<(), BusError>;
}
