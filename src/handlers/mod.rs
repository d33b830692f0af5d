//! Command Handlers module
//!
//! Use cases that move money. Each handler validates its command, then in one
//! transaction runs the wallet mutations, appends the ledger entries and
//! stages the matching domain event in the outbox. After commit the event is
//! published on the bus; if that fails the outbox relay publishes it later.

mod commands;
mod deposit_handler;
mod transfer_handler;
mod withdrawal_handler;


use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;

use crate::domain::{LedgerEvent, WALLET_AGGREGATE};
use crate::error::AppResult;
use crate::event_bus::{BusError, EventBus};
use crate::event_store::Event;
use crate::metrics::{MetricsCollector, OperationKind};
use crate::repository::{OutboxRepository, TxRepositories};

pub use commands::*;
pub use deposit_handler::DepositHandler;
pub use transfer_handler::TransferHandler;
pub use withdrawal_handler::WithdrawalHandler;

/// Build the bus event for a ledger event and stage it in the transaction's
/// outbox. A payload that cannot be serialized aborts the transaction.
pub(crate) async fn stage_ledger_event(
    repos: &dyn TxRepositories,
    ledger_event: &LedgerEvent,
    version: i64,
    metadata: HashMap<String, String>,
) -> AppResult<Event> {
    let event = Event::new(
        ledger_event.event_type(),
        ledger_event.aggregate_id(),
        WALLET_AGGREGATE,
        ledger_event,
    )?
    .with_version(version)
    .with_metadata(metadata);

    repos.outbox().enqueue(&event).await?;
    Ok(event)
}

/// Publish a committed operation's staged event.
///
/// The money movement is already durable at this point, so bus failures are
/// logged and reported through the return value instead of failing the use
/// case. Returns true once the event is in the event store; the outbox row
/// is then marked published. Otherwise the row stays pending for the relay.
pub(crate) async fn publish_staged_event(
    bus: &dyn EventBus,
    outbox: &dyn OutboxRepository,
    event: Event,
) -> bool {
    let event_id = event.event_id;
    let event_type = event.event_type.clone();

    let persisted = match bus.publish(event).await {
        Ok(()) => true,
        Err(e @ BusError::HandlersFailed(_)) => {
            tracing::warn!(
                event_id = %event_id,
                event_type = %event_type,
                error = %e,
                "Event stored but some handlers failed"
            );
            true
        }
        // The relay got there first
        Err(e) if e.is_duplicate_event() => true,
        Err(e) => {
            tracing::error!(
                event_id = %event_id,
                event_type = %event_type,
                error = %e,
                "Failed to publish event, left pending in the outbox"
            );
            false
        }
    };

    if persisted {
        if let Err(e) = outbox.mark_published(event_id).await {
            tracing::warn!(
                event_id = %event_id,
                error = %e,
                "Event stored but outbox record not marked published"
            );
        }
    }

    persisted
}

/// Time an operation and report its outcome
pub(crate) async fn instrumented<T>(
    metrics: &dyn MetricsCollector,
    kind: OperationKind,
    operation: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    let started = Instant::now();
    let result = operation.await;
    metrics.record_duration(kind, started.elapsed());

    match &result {
        Ok(_) => metrics.record_operation(kind),
        Err(e) => {
            metrics.record_failure(kind);
            tracing::warn!(operation = %kind, error = %e, "Operation failed");
        }
    }

    result
}
