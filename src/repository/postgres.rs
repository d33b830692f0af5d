//! PostgreSQL repositories
//!
//! Queries are written once against `PgExecutor` and shared by the pool-backed
//! store (auto-commit) and the transaction-bound view handed out by
//! `within_tx`. Transactions run at SERIALIZABLE isolation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AccountRepository, LedgerRepository, OutboxRecord, OutboxRepository, Transactional,
    TxFuture, TxRepositories, WalletRepository,
};
use crate::aggregate::{Account, Wallet};
use crate::domain::{Amount, LedgerEntry};
use crate::error::{AppError, AppResult};
use crate::event_store::Event;

/// PostgreSQL implementation of every ledger port
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Create a new store with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =============================================================================
// Queries
// =============================================================================

type WalletRow = (String, String, i64, String, i64);
type EntryRow = (Uuid, String, String, i64, String, i64, String, DateTime<Utc>);

fn wallet_from_row((id, account_id, value, currency, version): WalletRow) -> AppResult<Wallet> {
    let balance = Amount::new(value, currency)?;
    Ok(Wallet::restore(id, account_id, balance, version)?)
}

fn entry_from_row(row: EntryRow) -> AppResult<LedgerEntry> {
    let (id, wallet_id, entry_type, value, currency, balance_after, description, created_at) = row;
    let amount = Amount::new(value, currency)?;
    Ok(LedgerEntry::restore(
        id,
        wallet_id,
        entry_type.parse()?,
        amount,
        balance_after,
        description,
        created_at,
    )?)
}

async fn fetch_account<'e, E: PgExecutor<'e>>(executor: E, id: &str) -> AppResult<Account> {
    let row: Option<(String, String, String)> = sqlx::query_as(
        r#"
        SELECT id, holder_id, status
        FROM ledger_accounts
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    let (id, holder_id, status) = row.ok_or_else(|| AppError::not_found("account", id))?;
    Ok(Account::restore(id, holder_id, status.parse()?)?)
}

async fn upsert_account<'e, E: PgExecutor<'e>>(executor: E, account: &Account) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO ledger_accounts (id, holder_id, status)
        VALUES ($1, $2, $3)
        ON CONFLICT (id)
        DO UPDATE SET holder_id = $2, status = $3, updated_at = NOW()
        "#,
    )
    .bind(account.id())
    .bind(account.holder_id())
    .bind(account.status().as_str())
    .execute(executor)
    .await?;

    Ok(())
}

async fn fetch_wallet<'e, E: PgExecutor<'e>>(executor: E, id: &str) -> AppResult<Wallet> {
    let row: Option<WalletRow> = sqlx::query_as(
        r#"
        SELECT id, account_id, balance_value, balance_currency, version
        FROM ledger_wallets
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    wallet_from_row(row.ok_or_else(|| AppError::not_found("wallet", id))?)
}

/// Conditional write guarded by the version the wallet was read at
async fn save_wallet<'e, E: PgExecutor<'e>>(executor: E, wallet: &mut Wallet) -> AppResult<()> {
    let expected = wallet.version();

    let result = if expected == 0 {
        sqlx::query(
            r#"
            INSERT INTO ledger_wallets (id, account_id, balance_value, balance_currency, version)
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(wallet.id())
        .bind(wallet.account_id())
        .bind(wallet.balance().value())
        .bind(wallet.currency())
        .execute(executor)
        .await?
    } else {
        sqlx::query(
            r#"
            UPDATE ledger_wallets
            SET balance_value = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(wallet.id())
        .bind(expected)
        .bind(wallet.balance().value())
        .execute(executor)
        .await?
    };

    if result.rows_affected() == 0 {
        tracing::warn!(
            wallet_id = %wallet.id(),
            expected_version = expected,
            "Optimistic lock conflict on wallet save"
        );
        return Err(AppError::conflict(wallet.id(), expected));
    }

    wallet.mark_persisted(expected + 1);
    Ok(())
}

async fn fetch_wallets_by_account<'e, E: PgExecutor<'e>>(
    executor: E,
    account_id: &str,
) -> AppResult<Vec<Wallet>> {
    let rows: Vec<WalletRow> = sqlx::query_as(
        r#"
        SELECT id, account_id, balance_value, balance_currency, version
        FROM ledger_wallets
        WHERE account_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(account_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(wallet_from_row).collect()
}

async fn insert_entry<'e, E: PgExecutor<'e>>(executor: E, entry: &LedgerEntry) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (
            id, wallet_id, entry_type, amount_value, amount_currency,
            balance_after, description, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id())
    .bind(entry.wallet_id())
    .bind(entry.entry_type().as_str())
    .bind(entry.amount().value())
    .bind(entry.amount().currency())
    .bind(entry.balance_after())
    .bind(entry.description())
    .bind(entry.created_at())
    .execute(executor)
    .await?;

    Ok(())
}

async fn fetch_entries<'e, E: PgExecutor<'e>>(
    executor: E,
    wallet_id: &str,
    after_seq: i64,
) -> AppResult<Vec<LedgerEntry>> {
    let rows: Vec<EntryRow> = sqlx::query_as(
        r#"
        SELECT id, wallet_id, entry_type, amount_value, amount_currency,
               balance_after, description, created_at
        FROM ledger_entries
        WHERE wallet_id = $1 AND seq > $2
        ORDER BY seq ASC
        "#,
    )
    .bind(wallet_id)
    .bind(after_seq)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(entry_from_row).collect()
}

async fn fetch_entry_seq<'e, E: PgExecutor<'e>>(
    executor: E,
    wallet_id: &str,
    entry_id: Uuid,
) -> AppResult<i64> {
    let seq: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT seq FROM ledger_entries WHERE id = $1 AND wallet_id = $2
        "#,
    )
    .bind(entry_id)
    .bind(wallet_id)
    .fetch_optional(executor)
    .await?;

    seq.ok_or_else(|| AppError::not_found("ledger entry", entry_id.to_string()))
}

type OutboxRow = (
    serde_json::Value,
    i32,
    Option<String>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

fn outbox_from_row(row: OutboxRow) -> AppResult<OutboxRecord> {
    let (event, attempts, last_error, created_at, published_at) = row;
    Ok(OutboxRecord {
        event: serde_json::from_value::<Event>(event)?,
        attempts,
        last_error,
        created_at,
        published_at,
    })
}

async fn insert_outbox<'e, E: PgExecutor<'e>>(executor: E, event: &Event) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO event_outbox (event_id, event_type, aggregate_id, event)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(event.event_id)
    .bind(&event.event_type)
    .bind(&event.aggregate_id)
    .bind(serde_json::to_value(event)?)
    .execute(executor)
    .await?;

    Ok(())
}

async fn fetch_pending_outbox<'e, E: PgExecutor<'e>>(
    executor: E,
    limit: usize,
) -> AppResult<Vec<OutboxRecord>> {
    let rows: Vec<OutboxRow> = sqlx::query_as(
        r#"
        SELECT event, attempts, last_error, created_at, published_at
        FROM event_outbox
        WHERE published_at IS NULL
        ORDER BY seq ASC
        LIMIT $1
        "#,
    )
    .bind(limit as i64)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(outbox_from_row).collect()
}

async fn publish_outbox<'e, E: PgExecutor<'e>>(executor: E, event_id: Uuid) -> AppResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE event_outbox
        SET published_at = COALESCE(published_at, NOW())
        WHERE event_id = $1
        "#,
    )
    .bind(event_id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("outbox record", event_id.to_string()));
    }
    Ok(())
}

async fn fail_outbox<'e, E: PgExecutor<'e>>(
    executor: E,
    event_id: Uuid,
    error: &str,
) -> AppResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE event_outbox
        SET attempts = attempts + 1, last_error = $2
        WHERE event_id = $1
        "#,
    )
    .bind(event_id)
    .bind(error)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("outbox record", event_id.to_string()));
    }
    Ok(())
}

// =============================================================================
// Pool-backed (auto-commit)
// =============================================================================

#[async_trait]
impl AccountRepository for PostgresLedgerStore {
    async fn get(&self, id: &str) -> AppResult<Account> {
        fetch_account(&self.pool, id).await
    }

    async fn save(&self, account: &Account) -> AppResult<()> {
        upsert_account(&self.pool, account).await
    }
}

#[async_trait]
impl WalletRepository for PostgresLedgerStore {
    async fn get(&self, id: &str) -> AppResult<Wallet> {
        fetch_wallet(&self.pool, id).await
    }

    async fn save(&self, wallet: &mut Wallet) -> AppResult<()> {
        save_wallet(&self.pool, wallet).await
    }

    async fn list_by_account(&self, account_id: &str) -> AppResult<Vec<Wallet>> {
        fetch_wallets_by_account(&self.pool, account_id).await
    }
}

#[async_trait]
impl LedgerRepository for PostgresLedgerStore {
    async fn append(&self, entry: &LedgerEntry) -> AppResult<()> {
        insert_entry(&self.pool, entry).await
    }

    async fn list_by_wallet(&self, wallet_id: &str) -> AppResult<Vec<LedgerEntry>> {
        fetch_entries(&self.pool, wallet_id, 0).await
    }

    async fn list_since(
        &self,
        wallet_id: &str,
        since_entry_id: Uuid,
    ) -> AppResult<Vec<LedgerEntry>> {
        let seq = fetch_entry_seq(&self.pool, wallet_id, since_entry_id).await?;
        fetch_entries(&self.pool, wallet_id, seq).await
    }
}

#[async_trait]
impl OutboxRepository for PostgresLedgerStore {
    async fn enqueue(&self, event: &Event) -> AppResult<()> {
        insert_outbox(&self.pool, event).await
    }

    async fn fetch_pending(&self, limit: usize) -> AppResult<Vec<OutboxRecord>> {
        fetch_pending_outbox(&self.pool, limit).await
    }

    async fn mark_published(&self, event_id: Uuid) -> AppResult<()> {
        publish_outbox(&self.pool, event_id).await
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> AppResult<()> {
        fail_outbox(&self.pool, event_id, error).await
    }
}

#[async_trait]
impl Transactional for PostgresLedgerStore {
    async fn within_tx<T, F>(&self, work: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t dyn TxRepositories) -> TxFuture<'t, T> + Send + 'static,
    {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let pg_tx = PgTx { tx: Mutex::new(tx) };
        let result = {
            let repos: &dyn TxRepositories = &pg_tx;
            work(repos).await
        };
        let tx = pg_tx.tx.into_inner();

        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!("Rollback failed after {}: {}", e, rollback_err);
                }
                Err(e)
            }
        }
    }
}

// =============================================================================
// Transaction-bound view
// =============================================================================

struct PgTx {
    tx: Mutex<Transaction<'static, Postgres>>,
}

impl TxRepositories for PgTx {
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
impl AccountRepository for PgTx {
    async fn get(&self, id: &str) -> AppResult<Account> {
        let mut tx = self.tx.lock().await;
        fetch_account(&mut **tx, id).await
    }

    async fn save(&self, account: &Account) -> AppResult<()> {
        let mut tx = self.tx.lock().await;
        upsert_account(&mut **tx, account).await
    }
}

#[async_trait]
impl WalletRepository for PgTx {
    async fn get(&self, id: &str) -> AppResult<Wallet> {
        let mut tx = self.tx.lock().await;
        fetch_wallet(&mut **tx, id).await
    }

    async fn save(&self, wallet: &mut Wallet) -> AppResult<()> {
        let mut tx = self.tx.lock().await;
        save_wallet(&mut **tx, wallet).await
    }

    async fn list_by_account(&self, account_id: &str) -> AppResult<Vec<Wallet>> {
        let mut tx = self.tx.lock().await;
        fetch_wallets_by_account(&mut **tx, account_id).await
    }
}

#[async_trait]
impl LedgerRepository for PgTx {
    async fn append(&self, entry: &LedgerEntry) -> AppResult<()> {
        let mut tx = self.tx.lock().await;
        insert_entry(&mut **tx, entry).await
    }

    async fn list_by_wallet(&self, wallet_id: &str) -> AppResult<Vec<LedgerEntry>> {
        let mut tx = self.tx.lock().await;
        fetch_entries(&mut **tx, wallet_id, 0).await
    }

    async fn list_since(
        &self,
        wallet_id: &str,
        since_entry_id: Uuid,
    ) -> AppResult<Vec<LedgerEntry>> {
        let mut tx = self.tx.lock().await;
        let seq = fetch_entry_seq(&mut **tx, wallet_id, since_entry_id).await?;
        fetch_entries(&mut **tx, wallet_id, seq).await
    }
}

#[async_trait]
impl OutboxRepository for PgTx {
    async fn enqueue(&self, event: &Event) -> AppResult<()> {
        let mut tx = self.tx.lock().await;
        insert_outbox(&mut **tx, event).await
    }

    async fn fetch_pending(&self, limit: usize) -> AppResult<Vec<OutboxRecord>> {
        let mut tx = self.tx.lock().await;
        fetch_pending_outbox(&mut **tx, limit).await
    }

    async fn mark_published(&self, event_id: Uuid) -> AppResult<()> {
        let mut tx = self.tx.lock().await;
        publish_outbox(&mut **tx, event_id).await
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> AppResult<()> {
        let mut tx = self.tx.lock().await;
        fail_outbox(&mut **tx, event_id, error).await
    }
}
