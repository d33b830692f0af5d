//! finance_ledger Library
//!
//! Wallet ledger with optimistic concurrency, plus a persistent, idempotent
//! event bus that tells downstream collaborators about committed movements.

pub mod aggregate;
pub mod domain;
pub mod event_bus;
pub mod event_store;
pub mod handlers;
pub mod jobs;
pub mod ledger;
pub mod metrics;
pub mod processing_log;
pub mod repository;

pub mod config;
pub mod db;
pub mod error;

pub use config::Config;
pub use domain::{Amount, DomainError, OperationContext};
pub use error::{AppError, AppResult};
pub use event_bus::{EventBus, ResilientBus};
