//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use finance_ledger::aggregate::{Account, Wallet};
use finance_ledger::domain::Amount;
use finance_ledger::event_bus::ResilientBus;
use finance_ledger::event_store::InMemoryEventStore;
use finance_ledger::processing_log::InMemoryProcessingLog;
use finance_ledger::repository::{AccountRepository, InMemoryLedgerStore, WalletRepository};

/// In-memory ledger, event store, processing log and bus
pub struct Harness {
    pub ledger: Arc<InMemoryLedgerStore>,
    pub events: Arc<InMemoryEventStore>,
    pub processing_log: Arc<InMemoryProcessingLog>,
    pub bus: Arc<ResilientBus>,
}

impl Harness {
    pub fn new() -> Self {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let events = Arc::new(InMemoryEventStore::new());
        let processing_log = Arc::new(InMemoryProcessingLog::new());
        let bus = Arc::new(ResilientBus::new(events.clone(), processing_log.clone()));

        Self {
            ledger,
            events,
            processing_log,
            bus,
        }
    }

    /// Create an active account with one USD wallet
    pub async fn open_wallet(&self, account_id: &str, wallet_id: &str, balance: i64) {
        seed_wallet(self.ledger.as_ref(), account_id, wallet_id, balance).await;
    }

    pub async fn balance(&self, wallet_id: &str) -> i64 {
        WalletRepository::get(self.ledger.as_ref(), wallet_id)
            .await
            .unwrap()
            .balance()
            .value()
    }
}

/// Insert an account (if missing) and a USD wallet through any backend
pub async fn seed_wallet<R>(repo: &R, account_id: &str, wallet_id: &str, balance: i64)
where
    R: AccountRepository + WalletRepository,
{
    let account = Account::new(account_id, format!("holder-{}", account_id)).unwrap();
    AccountRepository::save(repo, &account).await.unwrap();

    let mut wallet =
        Wallet::new(wallet_id, account_id, Amount::new(balance, "USD").unwrap()).unwrap();
    WalletRepository::save(repo, &mut wallet).await.unwrap();
}

/// Setup test database - truncate ledger, outbox and bus tables
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query(
        "TRUNCATE TABLE ledger_entries, ledger_wallets, ledger_accounts, event_outbox, event_store, event_processing_log CASCADE",
    )
    .execute(&pool)
    .await
    .expect("Failed to clean up DB");

    pool
}
