//! In-memory repositories
//!
//! All repositories, the outbox included, share one `LedgerState` behind a
//! `tokio::sync::RwLock`.
//! Calls made directly on `InMemoryLedgerStore` auto-commit. Inside
//! `within_tx`, writes are buffered in a per-transaction write set that reads
//! see first; commit re-checks every touched wallet version under the write
//! lock and applies the whole write set, or nothing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    AccountRepository, LedgerRepository, OutboxRecord, OutboxRepository, Transactional,
    TxFuture, TxRepositories, WalletRepository,
};
use crate::aggregate::{Account, Wallet};
use crate::domain::LedgerEntry;
use crate::error::{AppError, AppResult};
use crate::event_store::Event;

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<String, Account>,
    wallets: HashMap<String, Wallet>,
    /// Global append order
    entries: Vec<LedgerEntry>,
    /// Enqueue order
    outbox: Vec<OutboxRecord>,
}

/// In-memory implementation of every ledger port
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger entries across all wallets
    pub async fn entry_count(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Every outbox record, published or not, in enqueue order
    pub async fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.state.read().await.outbox.clone()
    }

    async fn commit(&self, pending: PendingWrites) -> AppResult<()> {
        let mut state = self.state.write().await;

        for staged in pending.wallets.values() {
            let current = state.wallets.get(staged.wallet.id()).map(Wallet::version);
            if !version_matches(current, staged.read_version) {
                tracing::warn!(
                    wallet_id = %staged.wallet.id(),
                    read_version = staged.read_version,
                    current_version = ?current,
                    "Transaction lost a wallet race at commit"
                );
                return Err(AppError::conflict(staged.wallet.id(), staged.read_version));
            }
        }
        for entry in &pending.entries {
            if state.entries.iter().any(|e| e.id() == entry.id()) {
                return Err(duplicate_entry(entry.id()));
            }
        }
        for record in &pending.outbox {
            if state.outbox.iter().any(|r| r.event_id() == record.event_id()) {
                return Err(duplicate_outbox(record.event_id()));
            }
        }

        state.accounts.extend(pending.accounts);
        for (id, staged) in pending.wallets {
            state.wallets.insert(id, staged.wallet);
        }
        state.entries.extend(pending.entries);
        for (event_id, updated) in pending.outbox_updates {
            if let Some(record) = state.outbox.iter_mut().find(|r| r.event_id() == event_id) {
                *record = updated;
            }
        }
        state.outbox.extend(pending.outbox);

        Ok(())
    }
}

fn version_matches(current: Option<i64>, expected: i64) -> bool {
    match current {
        None => expected == 0,
        Some(version) => version == expected,
    }
}

fn duplicate_entry(id: Uuid) -> AppError {
    AppError::Internal(format!("ledger entry {} already appended", id))
}

fn duplicate_outbox(event_id: Uuid) -> AppError {
    AppError::Internal(format!("event {} already in the outbox", event_id))
}

fn outbox_not_found(event_id: Uuid) -> AppError {
    AppError::not_found("outbox record", event_id.to_string())
}

/// Entries of `wallet_id` after `since` (exclusive)
fn entries_since(entries: Vec<LedgerEntry>, since: Uuid) -> AppResult<Vec<LedgerEntry>> {
    let position = entries
        .iter()
        .position(|e| e.id() == since)
        .ok_or_else(|| AppError::not_found("ledger entry", since.to_string()))?;
    Ok(entries.into_iter().skip(position + 1).collect())
}

#[async_trait]
impl AccountRepository for InMemoryLedgerStore {
    async fn get(&self, id: &str) -> AppResult<Account> {
        self.state
            .read()
            .await
            .accounts
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found("account", id))
    }

    async fn save(&self, account: &Account) -> AppResult<()> {
        self.state
            .write()
            .await
            .accounts
            .insert(account.id().to_string(), account.clone());
        Ok(())
    }
}

#[async_trait]
impl WalletRepository for InMemoryLedgerStore {
    async fn get(&self, id: &str) -> AppResult<Wallet> {
        self.state
            .read()
            .await
            .wallets
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found("wallet", id))
    }

    async fn save(&self, wallet: &mut Wallet) -> AppResult<()> {
        let mut state = self.state.write().await;

        let current = state.wallets.get(wallet.id()).map(Wallet::version);
        if !version_matches(current, wallet.version()) {
            return Err(AppError::conflict(wallet.id(), wallet.version()));
        }

        wallet.mark_persisted(wallet.version() + 1);
        state.wallets.insert(wallet.id().to_string(), wallet.clone());
        Ok(())
    }

    async fn list_by_account(&self, account_id: &str) -> AppResult<Vec<Wallet>> {
        let state = self.state.read().await;
        let mut wallets: Vec<Wallet> = state
            .wallets
            .values()
            .filter(|w| w.account_id() == account_id)
            .cloned()
            .collect();
        wallets.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(wallets)
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerStore {
    async fn append(&self, entry: &LedgerEntry) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.entries.iter().any(|e| e.id() == entry.id()) {
            return Err(duplicate_entry(entry.id()));
        }
        state.entries.push(entry.clone());
        Ok(())
    }

    async fn list_by_wallet(&self, wallet_id: &str) -> AppResult<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.wallet_id() == wallet_id)
            .cloned()
            .collect())
    }

    async fn list_since(
        &self,
        wallet_id: &str,
        since_entry_id: Uuid,
    ) -> AppResult<Vec<LedgerEntry>> {
        let entries = LedgerRepository::list_by_wallet(self, wallet_id).await?;
        entries_since(entries, since_entry_id)
    }
}

#[async_trait]
impl OutboxRepository for InMemoryLedgerStore {
    async fn enqueue(&self, event: &Event) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.outbox.iter().any(|r| r.event_id() == event.event_id) {
            return Err(duplicate_outbox(event.event_id));
        }
        state.outbox.push(OutboxRecord::new(event.clone()));
        Ok(())
    }

    async fn fetch_pending(&self, limit: usize) -> AppResult<Vec<OutboxRecord>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|r| r.is_pending())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, event_id: Uuid) -> AppResult<()> {
        let mut state = self.state.write().await;
        let record = state
            .outbox
            .iter_mut()
            .find(|r| r.event_id() == event_id)
            .ok_or_else(|| outbox_not_found(event_id))?;
        record.publish();
        Ok(())
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> AppResult<()> {
        let mut state = self.state.write().await;
        let record = state
            .outbox
            .iter_mut()
            .find(|r| r.event_id() == event_id)
            .ok_or_else(|| outbox_not_found(event_id))?;
        record.fail(error);
        Ok(())
    }
}

#[async_trait]
impl Transactional for InMemoryLedgerStore {
    async fn within_tx<T, F>(&self, work: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t dyn TxRepositories) -> TxFuture<'t, T> + Send + 'static,
    {
        let tx = MemoryTx {
            store: self.clone(),
            pending: Mutex::new(PendingWrites::default()),
        };

        let value = {
            let repos: &dyn TxRepositories = &tx;
            work(repos).await?
        };

        self.commit(tx.pending.into_inner()).await?;
        Ok(value)
    }
}

// =============================================================================
// Transaction-bound view
// =============================================================================

#[derive(Debug)]
struct StagedWallet {
    wallet: Wallet,
    /// Committed version this transaction based its first write on
    read_version: i64,
}

#[derive(Debug, Default)]
struct PendingWrites {
    accounts: HashMap<String, Account>,
    wallets: HashMap<String, StagedWallet>,
    entries: Vec<LedgerEntry>,
    outbox: Vec<OutboxRecord>,
    /// Changes to records committed before this transaction began
    outbox_updates: HashMap<Uuid, OutboxRecord>,
}

impl PendingWrites {
    /// The staged copy of an outbox record, cloned from the store on first touch
    async fn outbox_record(
        &mut self,
        store: &InMemoryLedgerStore,
        event_id: Uuid,
    ) -> AppResult<&mut OutboxRecord> {
        if let Some(index) = self.outbox.iter().position(|r| r.event_id() == event_id) {
            return Ok(&mut self.outbox[index]);
        }
        if !self.outbox_updates.contains_key(&event_id) {
            let state = store.state.read().await;
            let committed = state
                .outbox
                .iter()
                .find(|r| r.event_id() == event_id)
                .cloned()
                .ok_or_else(|| outbox_not_found(event_id))?;
            self.outbox_updates.insert(event_id, committed);
        }
        self.outbox_updates
            .get_mut(&event_id)
            .ok_or_else(|| outbox_not_found(event_id))
    }
}

struct MemoryTx {
    store: InMemoryLedgerStore,
    pending: Mutex<PendingWrites>,
}

impl TxRepositories for MemoryTx {
    fn accounts(&self) -> &dyn AccountRepository {
        self
    }

    fn wallets(&self) -> &dyn WalletRepository {
        self
    }

    fn ledger(&self) -> &dyn LedgerRepository {
        self
    }

    fn outbox(&self) -> &dyn OutboxRepository {
        self
    }
}

#[async_trait]
impl AccountRepository for MemoryTx {
    async fn get(&self, id: &str) -> AppResult<Account> {
        if let Some(account) = self.pending.lock().await.accounts.get(id) {
            return Ok(account.clone());
        }
        AccountRepository::get(&self.store, id).await
    }

    async fn save(&self, account: &Account) -> AppResult<()> {
        self.pending
            .lock()
            .await
            .accounts
            .insert(account.id().to_string(), account.clone());
        Ok(())
    }
}

#[async_trait]
impl WalletRepository for MemoryTx {
    async fn get(&self, id: &str) -> AppResult<Wallet> {
        if let Some(staged) = self.pending.lock().await.wallets.get(id) {
            return Ok(staged.wallet.clone());
        }
        WalletRepository::get(&self.store, id).await
    }

    async fn save(&self, wallet: &mut Wallet) -> AppResult<()> {
        let mut pending = self.pending.lock().await;

        let (current, read_version) = match pending.wallets.get(wallet.id()) {
            Some(staged) => (Some(staged.wallet.version()), staged.read_version),
            None => {
                let state = self.store.state.read().await;
                (
                    state.wallets.get(wallet.id()).map(Wallet::version),
                    wallet.version(),
                )
            }
        };
        if !version_matches(current, wallet.version()) {
            return Err(AppError::conflict(wallet.id(), wallet.version()));
        }

        wallet.mark_persisted(wallet.version() + 1);
        pending.wallets.insert(
            wallet.id().to_string(),
            StagedWallet {
                wallet: wallet.clone(),
                read_version,
            },
        );
        Ok(())
    }

    async fn list_by_account(&self, account_id: &str) -> AppResult<Vec<Wallet>> {
        let mut wallets = WalletRepository::list_by_account(&self.store, account_id).await?;
        let pending = self.pending.lock().await;

        for wallet in wallets.iter_mut() {
            if let Some(staged) = pending.wallets.get(wallet.id()) {
                *wallet = staged.wallet.clone();
            }
        }
        for staged in pending.wallets.values() {
            let is_new = staged.read_version == 0 && staged.wallet.account_id() == account_id;
            if is_new && !wallets.iter().any(|w| w.id() == staged.wallet.id()) {
                wallets.push(staged.wallet.clone());
            }
        }
        wallets.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(wallets)
    }
}

#[async_trait]
impl LedgerRepository for MemoryTx {
    async fn append(&self, entry: &LedgerEntry) -> AppResult<()> {
        let mut pending = self.pending.lock().await;
        if pending.entries.iter().any(|e| e.id() == entry.id()) {
            return Err(duplicate_entry(entry.id()));
        }
        pending.entries.push(entry.clone());
        Ok(())
    }

    async fn list_by_wallet(&self, wallet_id: &str) -> AppResult<Vec<LedgerEntry>> {
        let mut entries = LedgerRepository::list_by_wallet(&self.store, wallet_id).await?;
        let pending = self.pending.lock().await;
        entries.extend(
            pending
                .entries
                .iter()
                .filter(|e| e.wallet_id() == wallet_id)
                .cloned(),
        );
        Ok(entries)
    }

    async fn list_since(
        &self,
        wallet_id: &str,
        since_entry_id: Uuid,
    ) -> AppResult<Vec<LedgerEntry>> {
        let entries = LedgerRepository::list_by_wallet(self, wallet_id).await?;
        entries_since(entries, since_entry_id)
    }
}

#[async_trait]
impl OutboxRepository for MemoryTx {
    async fn enqueue(&self, event: &Event) -> AppResult<()> {
        let mut pending = self.pending.lock().await;
        if pending.outbox.iter().any(|r| r.event_id() == event.event_id) {
            return Err(duplicate_outbox(event.event_id));
        }
        pending.outbox.push(OutboxRecord::new(event.clone()));
        Ok(())
    }

    async fn fetch_pending(&self, limit: usize) -> AppResult<Vec<OutboxRecord>> {
        let mut records = self.store.outbox_records().await;
        let pending = self.pending.lock().await;

        for record in records.iter_mut() {
            if let Some(updated) = pending.outbox_updates.get(&record.event_id()) {
                *record = updated.clone();
            }
        }
        records.extend(pending.outbox.iter().cloned());
        Ok(records
            .into_iter()
            .filter(OutboxRecord::is_pending)
            .take(limit)
            .collect())
    }

    async fn mark_published(&self, event_id: Uuid) -> AppResult<()> {
        let mut pending = self.pending.lock().await;
        pending.outbox_record(&self.store, event_id).await?.publish();
        Ok(())
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> AppResult<()> {
        let mut pending = self.pending.lock().await;
        pending.outbox_record(&self.store, event_id).await?.fail(error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Amount, EntryType};

    fn usd(value: i64) -> Amount {
        Amount::new(value, "USD").unwrap()
    }

    fn entry(wallet_id: &str, balance_after: i64) -> LedgerEntry {
        LedgerEntry::new(
            Uuid::new_v4(),
            wallet_id,
            EntryType::Credit,
            usd(10),
            balance_after,
            "test",
        )
        .unwrap()
    }

    async fn seeded_wallet(store: &InMemoryLedgerStore, balance: i64) -> Wallet {
        let mut wallet = Wallet::new("w-1", "acc-1", usd(balance)).unwrap();
        WalletRepository::save(store, &mut wallet).await.unwrap();
        wallet
    }

    #[tokio::test]
    async fn test_wallet_save_bumps_version() {
        let store = InMemoryLedgerStore::new();
        let wallet = seeded_wallet(&store, 100).await;
        assert_eq!(wallet.version(), 1);

        let loaded = WalletRepository::get(&store, "w-1").await.unwrap();
        assert_eq!(loaded, wallet);
    }

    #[tokio::test]
    async fn test_wallet_insert_twice_conflicts() {
        let store = InMemoryLedgerStore::new();
        seeded_wallet(&store, 100).await;

        let mut duplicate = Wallet::new("w-1", "acc-1", usd(5)).unwrap();
        let result = WalletRepository::save(&store, &mut duplicate).await;
        assert!(matches!(result, Err(AppError::ConcurrencyConflict { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_saves_from_same_snapshot() {
        let store = InMemoryLedgerStore::new();
        seeded_wallet(&store, 100).await;

        let mut first = WalletRepository::get(&store, "w-1").await.unwrap();
        let mut second = first.clone();
        first.credit(&usd(10)).unwrap();
        second.credit(&usd(20)).unwrap();

        let (a, b) = tokio::join!(
            WalletRepository::save(&store, &mut first),
            WalletRepository::save(&store, &mut second)
        );
        assert!(a.is_ok() ^ b.is_ok());

        let winner = if a.is_ok() { &first } else { &second };
        let stored = WalletRepository::get(&store, "w-1").await.unwrap();
        assert_eq!(&stored, winner);
        assert_eq!(stored.version(), 2);
    }

    #[tokio::test]
    async fn test_within_tx_rolls_back_on_error() {
        let store = InMemoryLedgerStore::new();
        seeded_wallet(&store, 100).await;

        let result: AppResult<()> = store
            .within_tx(|repos| {
                Box::pin(async move {
                    let mut wallet = repos.wallets().get("w-1").await?;
                    wallet.credit(&usd(50))?;
                    repos.wallets().save(&mut wallet).await?;
                    repos.ledger().append(&entry("w-1", 150)).await?;
                    Err(AppError::Internal("boom".to_string()))
                })
            })
            .await;
        assert!(result.is_err());

        let wallet = WalletRepository::get(&store, "w-1").await.unwrap();
        assert_eq!(wallet.balance().value(), 100);
        assert_eq!(store.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_within_tx_reads_own_writes_and_commits() {
        let store = InMemoryLedgerStore::new();
        seeded_wallet(&store, 100).await;

        let balance = store
            .within_tx(|repos| {
                Box::pin(async move {
                    let mut wallet = repos.wallets().get("w-1").await?;
                    wallet.debit(&usd(30))?;
                    repos.wallets().save(&mut wallet).await?;

                    let reread = repos.wallets().get("w-1").await?;
                    Ok(reread.balance().value())
                })
            })
            .await
            .unwrap();
        assert_eq!(balance, 70);

        let wallet = WalletRepository::get(&store, "w-1").await.unwrap();
        assert_eq!(wallet.balance().value(), 70);
        assert_eq!(wallet.version(), 2);
    }

    #[tokio::test]
    async fn test_within_tx_conflicts_with_concurrent_writer() {
        let store = InMemoryLedgerStore::new();
        seeded_wallet(&store, 100).await;

        let outside = store.clone();
        let result: AppResult<()> = store
            .within_tx(move |repos| {
                Box::pin(async move {
                    let mut wallet = repos.wallets().get("w-1").await?;
                    wallet.credit(&usd(1))?;
                    repos.wallets().save(&mut wallet).await?;

                    // Another writer commits first
                    let mut racing = WalletRepository::get(&outside, "w-1").await?;
                    racing.credit(&usd(5))?;
                    WalletRepository::save(&outside, &mut racing).await?;
                    Ok(())
                })
            })
            .await;

        assert!(matches!(result, Err(AppError::ConcurrencyConflict { .. })));
        let wallet = WalletRepository::get(&store, "w-1").await.unwrap();
        assert_eq!(wallet.balance().value(), 105);
    }

    fn staged_event(wallet_id: &str) -> Event {
        Event::new("deposit.completed", wallet_id, "wallet", &serde_json::json!({})).unwrap()
    }

    #[tokio::test]
    async fn test_outbox_row_commits_with_ledger_changes() {
        let store = InMemoryLedgerStore::new();
        seeded_wallet(&store, 100).await;

        let event = staged_event("w-1");
        let staged = event.clone();
        let seen_in_tx = store
            .within_tx(move |repos| {
                Box::pin(async move {
                    let mut wallet = repos.wallets().get("w-1").await?;
                    wallet.credit(&usd(10))?;
                    repos.wallets().save(&mut wallet).await?;
                    repos.outbox().enqueue(&staged).await?;
                    Ok(repos.outbox().fetch_pending(10).await?.len())
                })
            })
            .await
            .unwrap();
        assert_eq!(seen_in_tx, 1);

        let pending = store.fetch_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event, event);

        store.mark_published(event.event_id).await.unwrap();
        assert!(store.fetch_pending(10).await.unwrap().is_empty());
        assert_eq!(store.outbox_records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_outbox_row_dropped_on_rollback() {
        let store = InMemoryLedgerStore::new();
        seeded_wallet(&store, 100).await;

        let staged = staged_event("w-1");
        let result: AppResult<()> = store
            .within_tx(move |repos| {
                Box::pin(async move {
                    repos.outbox().enqueue(&staged).await?;
                    let mut wallet = repos.wallets().get("w-1").await?;
                    wallet.debit(&usd(500))?;
                    Ok(())
                })
            })
            .await;
        assert!(result.is_err());
        assert!(store.outbox_records().await.is_empty());
    }

    #[tokio::test]
    async fn test_outbox_mark_failed_keeps_record_pending() {
        let store = InMemoryLedgerStore::new();
        let event = staged_event("w-1");
        store.enqueue(&event).await.unwrap();

        let duplicate = store.enqueue(&event).await;
        assert!(matches!(duplicate, Err(AppError::Internal(_))));

        store.mark_failed(event.event_id, "store offline").await.unwrap();
        let pending = store.fetch_pending(10).await.unwrap();
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("store offline"));

        let missing = store.mark_published(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(AppError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_since_is_exclusive() {
        let store = InMemoryLedgerStore::new();
        let first = entry("w-1", 10);
        let second = entry("w-1", 20);
        let other = entry("w-2", 10);
        let third = entry("w-1", 30);
        for e in [&first, &second, &other, &third] {
            store.append(e).await.unwrap();
        }

        let since = store.list_since("w-1", first.id()).await.unwrap();
        let ids: Vec<Uuid> = since.iter().map(LedgerEntry::id).collect();
        assert_eq!(ids, vec![second.id(), third.id()]);

        let missing = store.list_since("w-1", other.id()).await;
        assert!(matches!(missing, Err(AppError::NotFound { .. })));
    }
}
