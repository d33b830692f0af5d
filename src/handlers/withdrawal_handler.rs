//! Withdrawal Handler
//!
//! Debits the wallet, records the entry and stages `withdrawal.initiated`;
//! the fiat payout is carried out by whoever consumes that event, so the
//! result stays `pending`.

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
    instrumented, publish_staged_event, stage_ledger_event, WithdrawalCommand, WithdrawalResult,
    WITHDRAWAL_PENDING,
};

/// Handler for withdrawals
pub struct WithdrawalHandler<U> {
    uow: Arc<U>,
    bus: Arc<dyn EventBus>,
    metrics: Arc<dyn MetricsCollector>,
}

impl<U: Transactional + OutboxRepository> WithdrawalHandler<U> {
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

    pub async fn execute(
        &self,
        command: WithdrawalCommand,
        context: &OperationContext,
    ) -> AppResult<WithdrawalResult> {
        instrumented(
            self.metrics.as_ref(),
            OperationKind::Withdrawal,
            self.run(command, context),
        )
        .await
    }

    async fn run(
        &self,
        command: WithdrawalCommand,
        context: &OperationContext,
    ) -> AppResult<WithdrawalResult> {
        let amount = command.validate()?;
        let description = command.entry_description();
        let withdrawal_id = Uuid::new_v4();

        let cmd = command.clone();
        let debit_amount = amount.clone();
        let metadata = context.to_metadata();

        let (posting, event) = self
            .uow
            .within_tx(move |repos| {
                Box::pin(async move {
                    let account = repos.accounts().get(&cmd.account_id).await?;
                    account.ensure_active()?;

                    let mut wallet = repos.wallets().get(&cmd.wallet_id).await?;
                    wallet.ensure_owned_by(&cmd.account_id)?;

                    // Insufficient funds surfaces from Wallet::debit
                    let posting = TxLedger::new(repos)
                        .post(&mut wallet, EntryType::Debit, &debit_amount, &description)
                        .await?;

                    let initiated = LedgerEvent::WithdrawalInitiated {
                        withdrawal_id,
                        account_id: cmd.account_id,
                        wallet_id: cmd.wallet_id,
                        amount: debit_amount.value(),
                        currency: debit_amount.currency().to_string(),
                        balance_after: posting.entry.balance_after(),
                        ledger_entry_id: posting.entry.id(),
                        destination_id: cmd.destination_id,
                        withdrawal_method: cmd.withdrawal_method,
                        initiated_at: Utc::now(),
                    };
                    let event =
                        stage_ledger_event(repos, &initiated, posting.wallet.version(), metadata)
                            .await?;

                    Ok((posting, event))
                })
            })
            .await?;

        let balance_after = posting.entry.balance_after();
        let event_id = event.event_id;

        tracing::info!(
            withdrawal_id = %withdrawal_id,
            wallet_id = %command.wallet_id,
            destination_id = %command.destination_id,
            amount = amount.value(),
            balance_after = balance_after,
            event_id = %event_id,
            "Withdrawal debited, payout pending"
        );

        let event_persisted =
            publish_staged_event(self.bus.as_ref(), self.uow.as_ref(), event).await;

        Ok(WithdrawalResult {
            withdrawal_id,
            account_id: command.account_id,
            wallet_id: command.wallet_id,
            amount,
            balance_after,
            ledger_entry_id: posting.entry.id(),
            status: WITHDRAWAL_PENDING.to_string(),
            event_id,
            event_persisted,
        })
    }
}
