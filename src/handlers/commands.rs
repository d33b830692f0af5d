//! Command definitions
//!
//! Commands represent intentions to move money. Each one validates its own
//! shape (identifiers, positive amount, currency) before any storage is
//! touched; ownership and account status are checked inside the transaction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Amount, DomainError};

fn require(value: &str, message: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(message));
    }
    Ok(())
}

fn positive_amount(value: i64, currency: &str, message: &str) -> Result<Amount, DomainError> {
    if value <= 0 {
        return Err(DomainError::validation(message));
    }
    Amount::new(value, currency)
}

// =========================================================================
// DepositCommand
// =========================================================================

/// Command to credit a wallet with funds received from a fiat gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositCommand {
    pub account_id: String,
    pub wallet_id: String,
    /// Amount in the smallest currency unit
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    /// Reference to the gateway transaction
    pub external_id: Option<String>,
}

impl DepositCommand {
    pub fn new(
        account_id: impl Into<String>,
        wallet_id: impl Into<String>,
        amount: i64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            wallet_id: wallet_id.into(),
            amount,
            currency: currency.into(),
            description: None,
            external_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Check identifiers and return the validated amount
    pub fn validate(&self) -> Result<Amount, DomainError> {
        require(&self.account_id, "account ID is required")?;
        require(&self.wallet_id, "wallet ID is required")?;
        positive_amount(self.amount, &self.currency, "deposit amount must be positive")
    }

    pub(crate) fn entry_description(&self) -> String {
        match &self.description {
            Some(description) if !description.is_empty() => description.clone(),
            _ => format!(
                "Deposit from external ID: {}",
                self.external_id.as_deref().unwrap_or_default()
            ),
        }
    }
}

// =========================================================================
// WithdrawalCommand
// =========================================================================

/// Command to debit a wallet ahead of a fiat payout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalCommand {
    pub account_id: String,
    pub wallet_id: String,
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    /// Bank account or payout reference
    pub destination_id: String,
    /// e.g. "bank_transfer", "pix"
    pub withdrawal_method: Option<String>,
}

impl WithdrawalCommand {
    pub fn new(
        account_id: impl Into<String>,
        wallet_id: impl Into<String>,
        amount: i64,
        currency: impl Into<String>,
        destination_id: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            wallet_id: wallet_id.into(),
            amount,
            currency: currency.into(),
            description: None,
            destination_id: destination_id.into(),
            withdrawal_method: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.withdrawal_method = Some(method.into());
        self
    }

    pub fn validate(&self) -> Result<Amount, DomainError> {
        require(&self.account_id, "account ID is required")?;
        require(&self.wallet_id, "wallet ID is required")?;
        require(&self.destination_id, "destination ID is required")?;
        positive_amount(
            self.amount,
            &self.currency,
            "withdrawal amount must be positive",
        )
    }

    pub(crate) fn entry_description(&self) -> String {
        match &self.description {
            Some(description) if !description.is_empty() => description.clone(),
            _ => format!(
                "Withdrawal to {} via {}",
                self.destination_id,
                self.withdrawal_method.as_deref().unwrap_or_default()
            ),
        }
    }
}

// =========================================================================
// TransferCommand
// =========================================================================

/// Command to move funds between two internal wallets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    pub from_account_id: String,
    pub from_wallet_id: String,
    pub to_account_id: String,
    pub to_wallet_id: String,
    pub amount: i64,
    pub currency: String,
    /// Optional memo; each entry gets a direction suffix
    pub description: Option<String>,
}

impl TransferCommand {
    pub fn new(
        from: (impl Into<String>, impl Into<String>),
        to: (impl Into<String>, impl Into<String>),
        amount: i64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            from_account_id: from.0.into(),
            from_wallet_id: from.1.into(),
            to_account_id: to.0.into(),
            to_wallet_id: to.1.into(),
            amount,
            currency: currency.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<Amount, DomainError> {
        if self.from_account_id.trim().is_empty() || self.from_wallet_id.trim().is_empty() {
            return Err(DomainError::validation(
                "source account and wallet are required",
            ));
        }
        if self.to_account_id.trim().is_empty() || self.to_wallet_id.trim().is_empty() {
            return Err(DomainError::validation(
                "destination account and wallet are required",
            ));
        }
        if self.from_wallet_id == self.to_wallet_id {
            return Err(DomainError::SameWalletTransfer);
        }
        positive_amount(self.amount, &self.currency, "transfer amount must be positive")
    }

    pub(crate) fn base_description(&self, transfer_id: Uuid) -> String {
        match &self.description {
            Some(description) if !description.is_empty() => description.clone(),
            _ => format!("Transfer {}", transfer_id),
        }
    }
}

// =========================================================================
// Results
// =========================================================================

/// Status reported by a withdrawal; the payout itself happens downstream
pub const WITHDRAWAL_PENDING: &str = "pending";

/// Result of a successful deposit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositResult {
    pub deposit_id: Uuid,
    pub account_id: String,
    pub wallet_id: String,
    pub amount: Amount,
    pub balance_after: i64,
    pub ledger_entry_id: Uuid,
    /// ID of the `deposit.completed` event
    pub event_id: Uuid,
    /// False if the event is still waiting in the outbox; the deposit is
    /// committed anyway and the outbox relay publishes it later
    pub event_persisted: bool,
}

/// Result of a successful withdrawal debit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalResult {
    pub withdrawal_id: Uuid,
    pub account_id: String,
    pub wallet_id: String,
    pub amount: Amount,
    pub balance_after: i64,
    pub ledger_entry_id: Uuid,
    pub status: String,
    pub event_id: Uuid,
    pub event_persisted: bool,
}

/// Result of a successful transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer_id: Uuid,
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    pub amount: Amount,
    pub from_balance_after: i64,
    pub to_balance_after: i64,
    pub from_ledger_entry_id: Uuid,
    pub to_ledger_entry_id: Uuid,
    pub event_id: Uuid,
    pub event_persisted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_command_validation() {
        let cmd = DepositCommand::new("acc-1", "w-1", 500, "USD").with_external_id("gw-9");
        let amount = cmd.validate().unwrap();
        assert_eq!(amount.value(), 500);
        assert_eq!(cmd.entry_description(), "Deposit from external ID: gw-9");

        assert!(DepositCommand::new("", "w-1", 1, "USD").validate().is_err());
        assert!(DepositCommand::new("acc-1", "w-1", 0, "USD").validate().is_err());
        assert!(DepositCommand::new("acc-1", "w-1", 1, "usd").validate().is_err());
    }

    #[test]
    fn test_withdrawal_requires_destination() {
        let cmd = WithdrawalCommand::new("acc-1", "w-1", 10, "USD", "");
        assert!(matches!(cmd.validate(), Err(DomainError::Validation(m)) if m.contains("destination")));

        let cmd = WithdrawalCommand::new("acc-1", "w-1", 10, "USD", "iban-1").with_method("sepa");
        assert!(cmd.validate().is_ok());
        assert_eq!(cmd.entry_description(), "Withdrawal to iban-1 via sepa");
    }

    #[test]
    fn test_transfer_same_wallet_rejected() {
        let cmd = TransferCommand::new(("acc-1", "w-1"), ("acc-2", "w-1"), 10, "USD");
        assert_eq!(cmd.validate(), Err(DomainError::SameWalletTransfer));
    }

    #[test]
    fn test_transfer_description_override() {
        let id = Uuid::new_v4();
        let cmd = TransferCommand::new(("acc-1", "w-1"), ("acc-2", "w-2"), 10, "USD");
        assert_eq!(cmd.base_description(id), format!("Transfer {}", id));

        let cmd = cmd.with_description("rent");
        assert_eq!(cmd.base_description(id), "rent");
    }
}
