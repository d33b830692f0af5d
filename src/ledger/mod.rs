//! Ledger module
//!
//! Balance mutations paired with their append-only audit entries.

pub mod service;

pub use service::{LedgerService, Posting, TxLedger};
