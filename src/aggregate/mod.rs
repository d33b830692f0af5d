//! Aggregate module
//!
//! Consistency boundaries of the ledger: accounts and their wallets.

pub mod account;
pub mod wallet;

pub use account::{Account, AccountStatus};
pub use wallet::Wallet;
