//! Ledger Service
//!
//! Applies a credit or debit to a wallet and appends the matching ledger
//! entry. The wallet save and the entry append always run in the same
//! transaction: an entry never exists without its balance change, and a
//! balance never changes without its entry.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::aggregate::Wallet;
use crate::domain::{Amount, EntryType, LedgerEntry};
use crate::error::{AppError, AppResult};
use crate::repository::{Transactional, TxRepositories};

/// Maximum attempts for the `*_with_retry` variants
const MAX_ATTEMPTS: u32 = 3;

/// Result of one applied posting
#[derive(Debug, Clone)]
pub struct Posting {
    /// Wallet state after the save, stamped with its new version
    pub wallet: Wallet,
    /// Entry appended for the mutation
    pub entry: LedgerEntry,
}

/// Ledger operations bound to an open transaction.
///
/// Use cases that move money across several wallets in one transaction
/// (transfers) drive this directly from inside `within_tx`.
pub struct TxLedger<'t> {
    repos: &'t dyn TxRepositories,
}

impl<'t> TxLedger<'t> {
    pub fn new(repos: &'t dyn TxRepositories) -> Self {
        Self { repos }
    }

    /// Load the wallet and credit it
    pub async fn credit(
        &self,
        wallet_id: &str,
        amount: &Amount,
        description: &str,
    ) -> AppResult<Posting> {
        let mut wallet = self.repos.wallets().get(wallet_id).await?;
        self.post(&mut wallet, EntryType::Credit, amount, description)
            .await
    }

    /// Load the wallet and debit it
    pub async fn debit(
        &self,
        wallet_id: &str,
        amount: &Amount,
        description: &str,
    ) -> AppResult<Posting> {
        let mut wallet = self.repos.wallets().get(wallet_id).await?;
        self.post(&mut wallet, EntryType::Debit, amount, description)
            .await
    }

    /// Apply a mutation to an already loaded wallet, save it, append the entry
    pub async fn post(
        &self,
        wallet: &mut Wallet,
        entry_type: EntryType,
        amount: &Amount,
        description: &str,
    ) -> AppResult<Posting> {
        match entry_type {
            EntryType::Credit => wallet.credit(amount)?,
            EntryType::Debit => wallet.debit(amount)?,
        }

        let entry = LedgerEntry::new(
            Uuid::new_v4(),
            wallet.id(),
            entry_type,
            amount.clone(),
            wallet.balance().value(),
            description,
        )?;

        self.repos.wallets().save(wallet).await?;
        self.repos.ledger().append(&entry).await?;

        tracing::debug!(
            wallet_id = %wallet.id(),
            entry_id = %entry.id(),
            entry_type = %entry_type,
            amount = amount.value(),
            balance_after = entry.balance_after(),
            "Ledger posting staged"
        );

        Ok(Posting {
            wallet: wallet.clone(),
            entry,
        })
    }
}

/// Ledger Service
///
/// Each call opens its own transaction through the injected unit of work.
pub struct LedgerService<U> {
    uow: Arc<U>,
}

impl<U> Clone for LedgerService<U> {
    fn clone(&self) -> Self {
        Self {
            uow: Arc::clone(&self.uow),
        }
    }
}

impl<U: Transactional> LedgerService<U> {
    pub fn new(uow: Arc<U>) -> Self {
        Self { uow }
    }

    /// Credit a wallet and append its entry atomically
    pub async fn credit(
        &self,
        wallet_id: &str,
        amount: &Amount,
        description: &str,
    ) -> AppResult<Posting> {
        self.apply(EntryType::Credit, wallet_id, amount, description)
            .await
    }

    /// Debit a wallet and append its entry atomically
    pub async fn debit(
        &self,
        wallet_id: &str,
        amount: &Amount,
        description: &str,
    ) -> AppResult<Posting> {
        self.apply(EntryType::Debit, wallet_id, amount, description)
            .await
    }

    /// `credit`, retried on optimistic lock loss
    pub async fn credit_with_retry(
        &self,
        wallet_id: &str,
        amount: &Amount,
        description: &str,
    ) -> AppResult<Posting> {
        self.apply_with_retry(EntryType::Credit, wallet_id, amount, description)
            .await
    }

    /// `debit`, retried on optimistic lock loss
    pub async fn debit_with_retry(
        &self,
        wallet_id: &str,
        amount: &Amount,
        description: &str,
    ) -> AppResult<Posting> {
        self.apply_with_retry(EntryType::Debit, wallet_id, amount, description)
            .await
    }

    async fn apply(
        &self,
        entry_type: EntryType,
        wallet_id: &str,
        amount: &Amount,
        description: &str,
    ) -> AppResult<Posting> {
        let wallet_id = wallet_id.to_string();
        let amount = amount.clone();
        let description = description.to_string();

        self.uow
            .within_tx(move |repos| {
                Box::pin(async move {
                    let ledger = TxLedger::new(repos);
                    match entry_type {
                        EntryType::Credit => ledger.credit(&wallet_id, &amount, &description).await,
                        EntryType::Debit => ledger.debit(&wallet_id, &amount, &description).await,
                    }
                })
            })
            .await
    }

    /// Reload and reapply on conflict, with linear backoff
    async fn apply_with_retry(
        &self,
        entry_type: EntryType,
        wallet_id: &str,
        amount: &Amount,
        description: &str,
    ) -> AppResult<Posting> {
        for attempt in 0..MAX_ATTEMPTS {
            match self.apply(entry_type, wallet_id, amount, description).await {
                Ok(posting) => return Ok(posting),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS - 1 => {
                    let delay = Duration::from_millis(50 * (attempt as u64 + 1));
                    tracing::warn!(
                        "Conflict on wallet {}, retrying (attempt {}/{}): {}",
                        wallet_id,
                        attempt + 1,
                        MAX_ATTEMPTS,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Internal(format!(
            "ledger posting on wallet {} exhausted {} attempts",
            wallet_id, MAX_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;
    use crate::repository::{InMemoryLedgerStore, LedgerRepository, WalletRepository};

    fn usd(value: i64) -> Amount {
        Amount::new(value, "USD").unwrap()
    }

    async fn setup(balance: i64) -> (Arc<InMemoryLedgerStore>, LedgerService<InMemoryLedgerStore>) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let mut wallet = Wallet::new("w-1", "acc-1", usd(balance)).unwrap();
        WalletRepository::save(store.as_ref(), &mut wallet)
            .await
            .unwrap();
        let service = LedgerService::new(Arc::clone(&store));
        (store, service)
    }

    #[tokio::test]
    async fn test_credit_then_debit_entries_in_order() {
        let (store, service) = setup(100).await;

        let credit = service.credit("w-1", &usd(40), "top up").await.unwrap();
        let debit = service.debit("w-1", &usd(40), "pay out").await.unwrap();

        assert_eq!(credit.entry.balance_after(), 140);
        assert_eq!(debit.entry.balance_after(), 100);

        let entries = store.list_by_wallet("w-1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_type(), EntryType::Credit);
        assert_eq!(entries[0].balance_after(), 140);
        assert_eq!(entries[1].entry_type(), EntryType::Debit);
        assert_eq!(entries[1].balance_after(), 100);

        let wallet = WalletRepository::get(store.as_ref(), "w-1").await.unwrap();
        assert_eq!(wallet.balance().value(), 100);
        assert_eq!(wallet.version(), 3);
    }

    #[tokio::test]
    async fn test_debit_insufficient_writes_nothing() {
        let (store, service) = setup(10).await;

        let result = service.debit("w-1", &usd(11), "too much").await;
        assert!(matches!(
            result,
            Err(AppError::Domain(DomainError::InsufficientAmount {
                required: 11,
                available: 10
            }))
        ));

        assert!(store.list_by_wallet("w-1").await.unwrap().is_empty());
        let wallet = WalletRepository::get(store.as_ref(), "w-1").await.unwrap();
        assert_eq!(wallet.version(), 1);
    }

    #[tokio::test]
    async fn test_credit_unknown_wallet() {
        let (_, service) = setup(10).await;
        let result = service.credit("missing", &usd(1), "").await;
        assert!(matches!(result, Err(AppError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_credits_with_retry_all_land() {
        let (store, service) = setup(0).await;

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                service.credit_with_retry("w-1", &usd(10), "bulk").await
            }));
        }

        let mut landed = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                landed += 1;
            }
        }

        assert!(landed >= 1);
        let wallet = WalletRepository::get(store.as_ref(), "w-1").await.unwrap();
        assert_eq!(wallet.balance().value(), 10 * landed);
        assert_eq!(store.list_by_wallet("w-1").await.unwrap().len() as i64, landed);
    }
}
