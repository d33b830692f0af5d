//! Domain Events
//!
//! Facts emitted by the ledger use cases once a money movement has committed.
//! They are serialized into the payload of a bus `Event`; subscribers can
//! deserialize the payload back into `LedgerEvent`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type published after a committed deposit
pub const DEPOSIT_COMPLETED: &str = "deposit.completed";

/// Event type published after a committed withdrawal debit
pub const WITHDRAWAL_INITIATED: &str = "withdrawal.initiated";

/// Event type published after a committed transfer
pub const TRANSFER_COMPLETED: &str = "transfer.completed";

/// Aggregate type all ledger events are keyed under
pub const WALLET_AGGREGATE: &str = "wallet";

/// Ledger events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Funds arrived from an external fiat source
    DepositCompleted {
        deposit_id: Uuid,
        account_id: String,
        wallet_id: String,
        amount: i64,
        currency: String,
        balance_after: i64,
        ledger_entry_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        external_id: Option<String>,
        completed_at: DateTime<Utc>,
    },

    /// Funds left the wallet; the fiat payout is still pending
    WithdrawalInitiated {
        withdrawal_id: Uuid,
        account_id: String,
        wallet_id: String,
        amount: i64,
        currency: String,
        balance_after: i64,
        ledger_entry_id: Uuid,
        destination_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        withdrawal_method: Option<String>,
        initiated_at: DateTime<Utc>,
    },

    /// Funds moved between two internal wallets
    TransferCompleted {
        transfer_id: Uuid,
        from_account_id: String,
        from_wallet_id: String,
        to_account_id: String,
        to_wallet_id: String,
        amount: i64,
        currency: String,
        from_balance_after: i64,
        to_balance_after: i64,
        from_ledger_entry_id: Uuid,
        to_ledger_entry_id: Uuid,
        completed_at: DateTime<Utc>,
    },
}

impl LedgerEvent {
    /// Get the event type as published on the bus
    pub fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::DepositCompleted { .. } => DEPOSIT_COMPLETED,
            LedgerEvent::WithdrawalInitiated { .. } => WITHDRAWAL_INITIATED,
            LedgerEvent::TransferCompleted { .. } => TRANSFER_COMPLETED,
        }
    }

    /// Wallet this event is keyed under (the debited wallet for transfers)
    pub fn aggregate_id(&self) -> &str {
        match self {
            LedgerEvent::DepositCompleted { wallet_id, .. } => wallet_id,
            LedgerEvent::WithdrawalInitiated { wallet_id, .. } => wallet_id,
            LedgerEvent::TransferCompleted { from_wallet_id, .. } => from_wallet_id,
        }
    }

    /// Ledger entries written by the operation
    pub fn ledger_entry_ids(&self) -> Vec<Uuid> {
        match self {
            LedgerEvent::DepositCompleted {
                ledger_entry_id, ..
            }
            | LedgerEvent::WithdrawalInitiated {
                ledger_entry_id, ..
            } => vec![*ledger_entry_id],
            LedgerEvent::TransferCompleted {
                from_ledger_entry_id,
                to_ledger_entry_id,
                ..
            } => vec![*from_ledger_entry_id, *to_ledger_entry_id],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer() -> LedgerEvent {
        LedgerEvent::TransferCompleted {
            transfer_id: Uuid::new_v4(),
            from_account_id: "acc-a".to_string(),
            from_wallet_id: "w-a".to_string(),
            to_account_id: "acc-b".to_string(),
            to_wallet_id: "w-b".to_string(),
            amount: 30,
            currency: "USD".to_string(),
            from_balance_after: 70,
            to_balance_after: 80,
            from_ledger_entry_id: Uuid::new_v4(),
            to_ledger_entry_id: Uuid::new_v4(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_ledger_event_serialization() {
        let event = transfer();

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transfer_completed");
        assert_eq!(json["from_balance_after"], 70);

        let deserialized: LedgerEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event, deserialized);
    }

    #[test]
    fn test_event_type_and_aggregate() {
        let event = transfer();
        assert_eq!(event.event_type(), "transfer.completed");
        assert_eq!(event.aggregate_id(), "w-a");
        assert_eq!(event.ledger_entry_ids().len(), 2);
    }
}
