//! Wallet Aggregate
//!
//! A single-currency balance owned by an account. Wallets are mutated in
//! memory through `credit`/`debit` and persisted by a `WalletRepository`,
//! which uses `version` for optimistic concurrency control.

use serde::{Deserialize, Serialize};

use crate::domain::{Amount, DomainError};

/// Wallet Aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWallet", into = "RawWallet")]
pub struct Wallet {
    /// Unique wallet ID
    id: String,

    /// Owning account ID
    account_id: String,

    /// Current balance; its currency never changes
    balance: Amount,

    /// Version the wallet was read at (0 = never persisted)
    version: i64,
}

/// Unvalidated wire shape, routed through `Wallet::restore`
#[derive(Serialize, Deserialize)]
struct RawWallet {
    id: String,
    account_id: String,
    balance: Amount,
    version: i64,
}

impl TryFrom<RawWallet> for Wallet {
    type Error = DomainError;

    fn try_from(raw: RawWallet) -> Result<Self, Self::Error> {
        Wallet::restore(raw.id, raw.account_id, raw.balance, raw.version)
    }
}

impl From<Wallet> for RawWallet {
    fn from(wallet: Wallet) -> Self {
        RawWallet {
            id: wallet.id,
            account_id: wallet.account_id,
            balance: wallet.balance,
            version: wallet.version,
        }
    }
}

impl Wallet {
    /// Create a new, not yet persisted wallet
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        initial: Amount,
    ) -> Result<Self, DomainError> {
        Self::restore(id, account_id, initial, 0)
    }

    /// Rebuild a wallet read back from storage at `version`
    pub fn restore(
        id: impl Into<String>,
        account_id: impl Into<String>,
        balance: Amount,
        version: i64,
    ) -> Result<Self, DomainError> {
        let id = id.into();
        let account_id = account_id.into();

        if id.is_empty() {
            return Err(DomainError::validation("wallet id is required"));
        }
        if account_id.is_empty() {
            return Err(DomainError::validation("account id is required"));
        }

        Ok(Self {
            id,
            account_id,
            balance,
            version,
        })
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Credit (deposit) money to the wallet
    pub fn credit(&mut self, amount: &Amount) -> Result<(), DomainError> {
        self.ensure_currency(amount)?;
        self.balance = self.balance.add(amount)?;
        Ok(())
    }

    /// Debit (withdraw) money from the wallet
    pub fn debit(&mut self, amount: &Amount) -> Result<(), DomainError> {
        self.ensure_currency(amount)?;
        self.balance = self.balance.sub(amount)?;
        Ok(())
    }

    /// Fail unless the wallet belongs to `account_id`
    pub fn ensure_owned_by(&self, account_id: &str) -> Result<(), DomainError> {
        if self.account_id != account_id {
            return Err(DomainError::WalletOwnership {
                wallet_id: self.id.clone(),
                account_id: account_id.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_currency(&self, amount: &Amount) -> Result<(), DomainError> {
        if self.balance.currency() != amount.currency() {
            return Err(DomainError::currency_mismatch(
                self.balance.currency(),
                amount.currency(),
            ));
        }
        Ok(())
    }

    /// Record the version assigned by a successful conditional write
    pub(crate) fn mark_persisted(&mut self, version: i64) {
        self.version = version;
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn balance(&self) -> &Amount {
        &self.balance
    }

    pub fn currency(&self) -> &str {
        self.balance.currency()
    }

    pub fn version(&self) -> i64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(value: i64) -> Amount {
        Amount::new(value, "USD").unwrap()
    }

    fn wallet(balance: i64) -> Wallet {
        Wallet::new("w-1", "acc-1", usd(balance)).unwrap()
    }

    #[test]
    fn test_wallet_new() {
        let wallet = wallet(100);
        assert_eq!(wallet.id(), "w-1");
        assert_eq!(wallet.account_id(), "acc-1");
        assert_eq!(wallet.balance().value(), 100);
        assert_eq!(wallet.version(), 0);
    }

    #[test]
    fn test_wallet_requires_ids() {
        assert!(Wallet::new("", "acc-1", usd(0)).is_err());
        assert!(Wallet::new("w-1", "", usd(0)).is_err());
    }

    #[test]
    fn test_wallet_deserialize_revalidates() {
        let stored = Wallet::restore("w-1", "acc-1", usd(40), 3).unwrap();
        let json = serde_json::to_string(&stored).unwrap();
        let loaded: Wallet = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, stored);

        let bad: Result<Wallet, _> = serde_json::from_str(
            r#"{"id":"","account_id":"acc-1","balance":{"value":1,"currency":"USD"},"version":1}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_wallet_credit_then_debit_restores_balance() {
        for value in [0, 1, 30, 100, 9_999] {
            let mut wallet = wallet(100);
            let before = wallet.balance().clone();

            wallet.credit(&usd(value)).unwrap();
            wallet.debit(&usd(value)).unwrap();

            assert_eq!(wallet.balance(), &before);
        }
    }

    #[test]
    fn test_wallet_debit_insufficient() {
        let mut wallet = wallet(50);
        let result = wallet.debit(&usd(100));

        assert!(matches!(result, Err(DomainError::InsufficientAmount { .. })));
        // Balance untouched on failure
        assert_eq!(wallet.balance().value(), 50);
    }

    #[test]
    fn test_wallet_currency_mismatch() {
        let mut wallet = wallet(50);
        let eur = Amount::new(10, "EUR").unwrap();

        assert!(matches!(
            wallet.credit(&eur),
            Err(DomainError::CurrencyMismatch { .. })
        ));
        assert!(matches!(
            wallet.debit(&eur),
            Err(DomainError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_wallet_ownership() {
        let wallet = wallet(0);
        assert!(wallet.ensure_owned_by("acc-1").is_ok());
        assert!(matches!(
            wallet.ensure_owned_by("acc-2"),
            Err(DomainError::WalletOwnership { .. })
        ));
    }
}
