//! Transfer Handler
//!
//! Moves funds between two internal wallets: debit source, credit
//! destination, two ledger entries and the staged `transfer.completed`
//! event, all in one transaction.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{DomainError, EntryType, LedgerEvent, OperationContext};
use crate::error::{AppError, AppResult};
use crate::event_bus::EventBus;
use crate::ledger::TxLedger;
use crate::metrics::{MetricsCollector, NoopMetrics, OperationKind};
use crate::repository::{OutboxRepository, Transactional};

use super::{
    instrumented, publish_staged_event, stage_ledger_event, TransferCommand, TransferResult,
};

/// Handler for internal transfers
pub struct TransferHandler<U> {
    uow: Arc<U>,
    bus: Arc<dyn EventBus>,
    metrics: Arc<dyn MetricsCollector>,
}

impl<U: Transactional + OutboxRepository> TransferHandler<U> {
    pub fn new(uow: Arc<U>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            uow,
            bus,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Execute the transfer command
    pub async fn execute(
        &self,
        command: TransferCommand,
        context: &OperationContext,
    ) -> AppResult<TransferResult> {
        instrumented(
            self.metrics.as_ref(),
            OperationKind::Transfer,
            self.run(command, context),
        )
        .await
    }

    async fn run(
        &self,
        command: TransferCommand,
        context: &OperationContext,
    ) -> AppResult<TransferResult> {
        let amount = command.validate()?;
        let transfer_id = Uuid::new_v4();
        let base = command.base_description(transfer_id);

        let cmd = command.clone();
        let transfer_amount = amount.clone();
        let metadata = context.to_metadata();

        let (debit, credit, event) = self
            .uow
            .within_tx(move |repos| {
                Box::pin(async move {
                    let from_account = repos.accounts().get(&cmd.from_account_id).await?;
                    from_account.ensure_active()?;
                    let to_account = repos.accounts().get(&cmd.to_account_id).await?;
                    to_account.ensure_active()?;

                    let mut from_wallet = repos.wallets().get(&cmd.from_wallet_id).await?;
                    from_wallet.ensure_owned_by(&cmd.from_account_id)?;
                    let mut to_wallet = repos.wallets().get(&cmd.to_wallet_id).await?;
                    to_wallet.ensure_owned_by(&cmd.to_account_id)?;

                    if from_wallet.currency() != to_wallet.currency() {
                        return Err(AppError::from(DomainError::currency_mismatch(
                            from_wallet.currency(),
                            to_wallet.currency(),
                        )));
                    }

                    let ledger = TxLedger::new(repos);
                    let debit = ledger
                        .post(
                            &mut from_wallet,
                            EntryType::Debit,
                            &transfer_amount,
                            &format!("{} (to {})", base, cmd.to_wallet_id),
                        )
                        .await?;
                    let credit = ledger
                        .post(
                            &mut to_wallet,
                            EntryType::Credit,
                            &transfer_amount,
                            &format!("{} (from {})", base, cmd.from_wallet_id),
                        )
                        .await?;

                    let completed = LedgerEvent::TransferCompleted {
                        transfer_id,
                        from_account_id: cmd.from_account_id.clone(),
                        from_wallet_id: cmd.from_wallet_id.clone(),
                        to_account_id: cmd.to_account_id.clone(),
                        to_wallet_id: cmd.to_wallet_id.clone(),
                        amount: transfer_amount.value(),
                        currency: transfer_amount.currency().to_string(),
                        from_balance_after: debit.entry.balance_after(),
                        to_balance_after: credit.entry.balance_after(),
                        from_ledger_entry_id: debit.entry.id(),
                        to_ledger_entry_id: credit.entry.id(),
                        completed_at: Utc::now(),
                    };
                    let event =
                        stage_ledger_event(repos, &completed, debit.wallet.version(), metadata)
                            .await?;

                    Ok((debit, credit, event))
                })
            })
            .await?;

        let event_id = event.event_id;

        tracing::info!(
            transfer_id = %transfer_id,
            from_wallet_id = %command.from_wallet_id,
            to_wallet_id = %command.to_wallet_id,
            amount = amount.value(),
            currency = amount.currency(),
            event_id = %event_id,
            "Transfer committed"
        );

        let event_persisted =
            publish_staged_event(self.bus.as_ref(), self.uow.as_ref(), event).await;

        Ok(TransferResult {
            transfer_id,
            from_wallet_id: command.from_wallet_id,
            to_wallet_id: command.to_wallet_id,
            amount,
            from_balance_after: debit.entry.balance_after(),
            to_balance_after: credit.entry.balance_after(),
            from_ledger_entry_id: debit.entry.id(),
            to_ledger_entry_id: credit.entry.id(),
            event_id,
            event_persisted,
        })
    }
}
