//! Domain module
//!
//! Core domain types and business logic.

pub mod amount;
pub mod context;
pub mod error;
pub mod events;
pub mod ledger_entry;

pub use amount::{validate_currency, Amount};
pub use context::OperationContext;
pub use error::DomainError;
pub use events::{
    LedgerEvent, DEPOSIT_COMPLETED, TRANSFER_COMPLETED, WALLET_AGGREGATE, WITHDRAWAL_INITIATED,
};
pub use ledger_entry::{EntryType, LedgerEntry};
