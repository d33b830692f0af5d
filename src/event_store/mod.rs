//! Event Store module
//!
//! Durable, append-only log of bus events deduplicated by event ID.
//! `save_event` is the single deduplication point of the whole system.

mod error;
mod event;
pub mod memory;
pub mod postgres;
mod store;

pub use error::EventStoreError;
pub use event::Event;
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::EventStore;
