//! Account Aggregate
//!
//! Account is the financial owner entity. It holds identity and status only;
//! balances live in the account's wallets.

use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl Default for AccountStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
        }
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            other => Err(DomainError::validation(format!(
                "invalid account status: {}",
                other
            ))),
        }
    }
}

/// Account Aggregate
///
/// Status transitions: Active -> Inactive -> Active. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAccount", into = "RawAccount")]
pub struct Account {
    /// Unique account ID
    id: String,

    /// Owner (user or legal entity) ID
    holder_id: String,

    /// Account status
    status: AccountStatus,
}

#[derive(Serialize, Deserialize)]
struct RawAccount {
    id: String,
    holder_id: String,
    status: AccountStatus,
}

impl TryFrom<RawAccount> for Account {
    type Error = DomainError;

    fn try_from(raw: RawAccount) -> Result<Self, Self::Error> {
        Account::restore(raw.id, raw.holder_id, raw.status)
    }
}

impl From<Account> for RawAccount {
    fn from(account: Account) -> Self {
        RawAccount {
            id: account.id,
            holder_id: account.holder_id,
            status: account.status,
        }
    }
}

impl Account {
    /// Create a new active account
    pub fn new(id: impl Into<String>, holder_id: impl Into<String>) -> Result<Self, DomainError> {
        Self::restore(id, holder_id, AccountStatus::Active)
    }

    /// Rebuild an account read back from storage
    pub fn restore(
        id: impl Into<String>,
        holder_id: impl Into<String>,
        status: AccountStatus,
    ) -> Result<Self, DomainError> {
        let id = id.into();
        let holder_id = holder_id.into();

        if id.is_empty() {
            return Err(DomainError::validation("account id is required"));
        }
        if holder_id.is_empty() {
            return Err(DomainError::validation("holder id is required"));
        }

        Ok(Self {
            id,
            holder_id,
            status,
        })
    }

    /// Deactivate the account
    pub fn deactivate(&mut self) -> Result<(), DomainError> {
        if self.status == AccountStatus::Inactive {
            return Err(DomainError::InvalidState(
                "account already inactive".to_string(),
            ));
        }
        self.status = AccountStatus::Inactive;
        Ok(())
    }

    /// Reactivate the account
    pub fn activate(&mut self) -> Result<(), DomainError> {
        if self.status == AccountStatus::Active {
            return Err(DomainError::InvalidState("account already active".to_string()));
        }
        self.status = AccountStatus::Active;
        Ok(())
    }

    /// Fail unless the account may move money
    pub fn ensure_active(&self) -> Result<(), DomainError> {
        if !self.is_active() {
            return Err(DomainError::AccountNotActive(self.id.clone()));
        }
        Ok(())
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}
