//! Deposit Handler
//!
//! Fiat received -> wallet credited -> ledger entry -> `deposit.completed`
//! staged in the outbox, all in one transaction.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{EntryType, LedgerEvent, OperationContext};
use crate::error::AppResult;
use crate::event_bus::EventBus;
use crate::ledger::TxLedger;
use crate::metrics::{MetricsCollector, NoopMetrics, OperationKind};
use crate::repository::{OutboxRepository, Transactional};

use super::{
    instrumented, publish_staged_event, stage_ledger_event, DepositCommand, DepositResult,
};

/// Handler for deposits
pub struct DepositHandler<U> {
    uow: Arc<U>,
    bus: Arc<dyn EventBus>,
    metrics: Arc<dyn MetricsCollector>,
}

impl<U: Transactional + OutboxRepository> DepositHandler<U> {
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

    /// Execute the deposit command
    pub async fn execute(
        &self,
        command: DepositCommand,
        context: &OperationContext,
    ) -> AppResult<DepositResult> {
        instrumented(
            self.metrics.as_ref(),
            OperationKind::Deposit,
            self.run(command, context),
        )
        .await
    }

    async fn run(
        &self,
        command: DepositCommand,
        context: &OperationContext,
    ) -> AppResult<DepositResult> {
        let amount = command.validate()?;
        let description = command.entry_description();
        let deposit_id = Uuid::new_v4();

        let cmd = command.clone();
        let credit_amount = amount.clone();
        let metadata = context.to_metadata();

        let (posting, event) = self
            .uow
            .within_tx(move |repos| {
                Box::pin(async move {
                    let account = repos.accounts().get(&cmd.account_id).await?;
                    account.ensure_active()?;

                    let mut wallet = repos.wallets().get(&cmd.wallet_id).await?;
                    wallet.ensure_owned_by(&cmd.account_id)?;

                    let posting = TxLedger::new(repos)
                        .post(&mut wallet, EntryType::Credit, &credit_amount, &description)
                        .await?;

                    let completed = LedgerEvent::DepositCompleted {
                        deposit_id,
                        account_id: cmd.account_id,
                        wallet_id: cmd.wallet_id,
                        amount: credit_amount.value(),
                        currency: credit_amount.currency().to_string(),
                        balance_after: posting.entry.balance_after(),
                        ledger_entry_id: posting.entry.id(),
                        external_id: cmd.external_id,
                        completed_at: Utc::now(),
                    };
                    let event =
                        stage_ledger_event(repos, &completed, posting.wallet.version(), metadata)
                            .await?;

                    Ok((posting, event))
                })
            })
            .await?;

        let balance_after = posting.entry.balance_after();
        let event_id = event.event_id;

        tracing::info!(
            deposit_id = %deposit_id,
            wallet_id = %command.wallet_id,
            amount = amount.value(),
            currency = amount.currency(),
            balance_after = balance_after,
            event_id = %event_id,
            "Deposit committed"
        );

        let event_persisted =
            publish_staged_event(self.bus.as_ref(), self.uow.as_ref(), event).await;

        Ok(DepositResult {
            deposit_id,
            account_id: command.account_id,
            wallet_id: command.wallet_id,
            amount,
            balance_after,
            ledger_entry_id: posting.entry.id(),
            event_id,
            event_persisted,
        })
    }
}
