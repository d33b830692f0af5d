//! finance_ledger - ledger event bus host
//!
//! Runs the resilient bus with its async worker pool, an audit-log
//! subscriber for every ledger event, and the maintenance jobs that reset
//! stuck dispatches, relay the event outbox and redeliver failed dispatches.

use std::sync::Arc;

use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finance_ledger::config::StorageBackend;
use finance_ledger::db;
use finance_ledger::domain::{LedgerEvent, DEPOSIT_COMPLETED, TRANSFER_COMPLETED, WITHDRAWAL_INITIATED};
use finance_ledger::event_bus::{BusConfig, EventBus, EventHandler, ResilientBus};
use finance_ledger::event_store::{Event, EventStore, InMemoryEventStore, PostgresEventStore};
use finance_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use finance_ledger::processing_log::{InMemoryProcessingLog, PostgresProcessingLog, ProcessingLog};
use finance_ledger::repository::{InMemoryLedgerStore, OutboxRepository, PostgresLedgerStore};
use finance_ledger::Config;

/// Handler name of the audit-log subscriber
const AUDIT_LOG_HANDLER: &str = "audit-log";

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "finance_ledger=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Log every committed movement
fn subscribe_audit_log(bus: &ResilientBus) -> anyhow::Result<()> {
    let handler: Arc<dyn EventHandler> = Arc::new(|event: Event| async move {
        let ledger_event: LedgerEvent = event.payload_as()?;
        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            version = event.version,
            entries = ?ledger_event.ledger_entry_ids(),
            "Ledger movement"
        );
        anyhow::Ok(())
    });

    for event_type in [DEPOSIT_COMPLETED, WITHDRAWAL_INITIATED, TRANSFER_COMPLETED] {
        bus.subscribe(event_type, AUDIT_LOG_HANDLER, Arc::clone(&handler))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(config.json_logs);

    tracing::info!(
        backend = ?config.storage_backend,
        environment = %config.environment,
        "Starting finance_ledger"
    );

    let (store, processing_log, outbox, pool): (
        Arc<dyn EventStore>,
        Arc<dyn ProcessingLog>,
        Arc<dyn OutboxRepository>,
        Option<PgPool>,
    ) = match config.storage_backend {
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required"))?;

            tracing::info!("Connecting to database...");
            let pool = db::connect(database_url, config.database_max_connections).await?;
            db::verify_connection(&pool).await?;

            // Verify database schema
            if !db::check_schema(&pool).await? {
                tracing::error!("Database schema is not complete. Please run migrations.");
                return Err(anyhow::anyhow!("Database schema incomplete"));
            }
            tracing::info!("Database connected successfully");

            (
                Arc::new(PostgresEventStore::new(pool.clone())) as Arc<dyn EventStore>,
                Arc::new(PostgresProcessingLog::new(pool.clone())) as Arc<dyn ProcessingLog>,
                Arc::new(PostgresLedgerStore::new(pool.clone())) as Arc<dyn OutboxRepository>,
                Some(pool),
            )
        }
        StorageBackend::Memory => {
            if config.is_production() {
                tracing::warn!("In-memory backend in production: events do not survive a restart");
            }
            (
                Arc::new(InMemoryEventStore::new()) as Arc<dyn EventStore>,
                Arc::new(InMemoryProcessingLog::new()) as Arc<dyn ProcessingLog>,
                Arc::new(InMemoryLedgerStore::new()) as Arc<dyn OutboxRepository>,
                None,
            )
        }
    };

    let bus = Arc::new(ResilientBus::with_config(
        store,
        Arc::clone(&processing_log),
        BusConfig {
            workers: config.bus_workers,
            queue_capacity: config.bus_queue_capacity,
        },
    ));
    subscribe_audit_log(&bus)?;

    let scheduler = JobScheduler::with_config(
        processing_log,
        outbox,
        Arc::clone(&bus),
        JobSchedulerConfig {
            stale_processing_after: config.stale_processing_after,
            redelivery_interval: config.redelivery_interval,
            outbox_relay_interval: config.outbox_relay_interval,
            ..Default::default()
        },
    );
    let jobs_shutdown = scheduler.shutdown_token();
    let jobs = scheduler.start();

    shutdown_signal().await;

    // Cleanup
    tracing::info!("Shutting down...");
    jobs_shutdown.cancel();
    if let Err(e) = jobs.await {
        tracing::error!("Job scheduler terminated abnormally: {}", e);
    }

    bus.close().await?;

    if let Some(pool) = pool {
        pool.close().await;
        tracing::info!("Database connections closed");
    }
    tracing::info!("Goodbye!");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
