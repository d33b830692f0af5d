//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

/// Domain-specific errors
///
/// These errors represent business rule violations and domain invariant failures.
/// They are independent of the storage and bus layers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (empty identifier, bad amount, bad currency)
    #[error("{0}")]
    Validation(String),

    /// Subtraction would leave a negative value
    #[error("insufficient amount: required {required}, available {available}")]
    InsufficientAmount { required: i64, available: i64 },

    /// Operands are in different currencies
    #[error("currency mismatch: expected {expected}, got {found}")]
    CurrencyMismatch { expected: String, found: String },

    /// Account exists but is not active
    #[error("account is not active: {0}")]
    AccountNotActive(String),

    /// Wallet does not belong to the account named in the request
    #[error("wallet {wallet_id} does not belong to account {account_id}")]
    WalletOwnership {
        wallet_id: String,
        account_id: String,
    },

    /// Transfer source and destination are the same wallet
    #[error("cannot transfer to the same wallet")]
    SameWalletTransfer,

    /// Any other illegal state transition
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl DomainError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an insufficient amount error
    pub fn insufficient_amount(required: i64, available: i64) -> Self {
        Self::InsufficientAmount {
            required,
            available,
        }
    }

    /// Create a currency mismatch error
    pub fn currency_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::CurrencyMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Check if this is malformed input
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a state error (inactive account, ownership, same wallet)
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::AccountNotActive(_)
                | Self::WalletOwnership { .. }
                | Self::SameWalletTransfer
                | Self::InvalidState(_)
        )
    }
}
