//! Repository ports
//!
//! Storage contracts consumed by the ledger, the event outbox, plus the
//! `Transactional` unit of work. A transaction hands its work an explicit set of transaction-bound
//! repositories (`TxRepositories`); nothing is looked up from ambient state.
//!
//! Two adapters implement every port:
//! - `memory`: in-process maps, used by tests and the `memory` backend
//! - `postgres`: sqlx over a `PgPool`, serializable transactions

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use uuid::Uuid;

use crate::aggregate::{Account, Wallet};
use crate::domain::LedgerEntry;
use crate::error::AppResult;
use crate::event_store::Event;

pub mod memory;
mod outbox;
pub mod postgres;

pub use memory::InMemoryLedgerStore;
pub use outbox::OutboxRecord;
pub use postgres::PostgresLedgerStore;

/// Account storage
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Load an account; `AppError::NotFound` if absent
    async fn get(&self, id: &str) -> AppResult<Account>;

    /// Insert or update an account
    async fn save(&self, account: &Account) -> AppResult<()>;
}

/// Wallet storage with optimistic concurrency
#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Load a wallet at its current version; `AppError::NotFound` if absent
    async fn get(&self, id: &str) -> AppResult<Wallet>;

    /// Conditionally write the wallet.
    ///
    /// The write only happens if the stored version still equals
    /// `wallet.version()` (version 0 means "must not exist yet"). On success
    /// the wallet is stamped with its new version; otherwise
    /// `AppError::ConcurrencyConflict` is returned and storage is untouched.
    async fn save(&self, wallet: &mut Wallet) -> AppResult<()>;

    /// All wallets owned by an account, ordered by wallet ID
    async fn list_by_account(&self, account_id: &str) -> AppResult<Vec<Wallet>>;
}

/// Append-only ledger storage
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Append an entry. Entries are never updated or deleted.
    async fn append(&self, entry: &LedgerEntry) -> AppResult<()>;

    /// All entries of a wallet in append order
    async fn list_by_wallet(&self, wallet_id: &str) -> AppResult<Vec<LedgerEntry>>;

    /// Entries of a wallet appended after `since_entry_id` (exclusive), in
    /// append order. `AppError::NotFound` if the wallet has no such entry.
    async fn list_since(&self, wallet_id: &str, since_entry_id: Uuid)
        -> AppResult<Vec<LedgerEntry>>;
}

/// Transactional outbox of events announcing committed ledger changes
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Stage an event for publication; fails if its ID is already staged
    async fn enqueue(&self, event: &Event) -> AppResult<()>;

    /// Unpublished records, oldest first
    async fn fetch_pending(&self, limit: usize) -> AppResult<Vec<OutboxRecord>>;

    /// Record that the event reached the event store. Idempotent.
    async fn mark_published(&self, event_id: Uuid) -> AppResult<()>;

    /// Count a failed relay attempt; the record stays pending
    async fn mark_failed(&self, event_id: Uuid, error: &str) -> AppResult<()>;
}

/// Repositories bound to one open transaction
pub trait TxRepositories: Send + Sync {
    fn accounts(&self) -> &dyn AccountRepository;
    fn wallets(&self) -> &dyn WalletRepository;
    fn ledger(&self) -> &dyn LedgerRepository;
    fn outbox(&self) -> &dyn OutboxRepository;
}

/// Future returned by transactional work
pub type TxFuture<'t, T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send + 't>>;

/// Unit of work.
///
/// ```ignore
/// let entry = store
///     .within_tx(move |repos| {
///         Box::pin(async move { TxLedger::new(repos).credit(&wallet_id, &amount, &desc).await })
///     })
///     .await?;
/// ```
#[async_trait]
pub trait Transactional: Send + Sync {
    /// Run `work` in one transaction: every write it makes through `repos`
    /// is committed if it returns `Ok`, and none is if it returns `Err`.
    async fn within_tx<T, F>(&self, work: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t dyn TxRepositories) -> TxFuture<'t, T> + Send + 'static;
}
