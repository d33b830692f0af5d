//! Ledger Entry
//!
//! Immutable, append-only record of one wallet balance change.
//! Entries are never updated or deleted; together they are the audit proof
//! of every mutation.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Amount, DomainError};

/// Direction of a balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Credit,
    Debit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Credit => "credit",
            EntryType::Debit => "debit",
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(EntryType::Credit),
            "debit" => Ok(EntryType::Debit),
            other => Err(DomainError::validation(format!(
                "invalid entry type: {}",
                other
            ))),
        }
    }
}

/// One balance change of one wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLedgerEntry", into = "RawLedgerEntry")]
pub struct LedgerEntry {
    id: Uuid,
    wallet_id: String,
    entry_type: EntryType,
    amount: Amount,
    balance_after: i64,
    description: String,
    created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct RawLedgerEntry {
    id: Uuid,
    wallet_id: String,
    entry_type: EntryType,
    amount: Amount,
    balance_after: i64,
    description: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RawLedgerEntry> for LedgerEntry {
    type Error = DomainError;

    fn try_from(raw: RawLedgerEntry) -> Result<Self, Self::Error> {
        LedgerEntry::restore(
            raw.id,
            raw.wallet_id,
            raw.entry_type,
            raw.amount,
            raw.balance_after,
            raw.description,
            raw.created_at,
        )
    }
}

impl From<LedgerEntry> for RawLedgerEntry {
    fn from(entry: LedgerEntry) -> Self {
        RawLedgerEntry {
            id: entry.id,
            wallet_id: entry.wallet_id,
            entry_type: entry.entry_type,
            amount: entry.amount,
            balance_after: entry.balance_after,
            description: entry.description,
            created_at: entry.created_at,
        }
    }
}

impl LedgerEntry {
    /// Record a new entry, stamped with the current time at the
    /// microsecond precision storage keeps.
    pub fn new(
        id: Uuid,
        wallet_id: impl Into<String>,
        entry_type: EntryType,
        amount: Amount,
        balance_after: i64,
        description: impl Into<String>,
    ) -> Result<Self, DomainError> {
        Self::restore(
            id,
            wallet_id,
            entry_type,
            amount,
            balance_after,
            description,
            Utc::now().trunc_subsecs(6),
        )
    }

    /// Rebuild an entry read back from storage
    pub fn restore(
        id: Uuid,
        wallet_id: impl Into<String>,
        entry_type: EntryType,
        amount: Amount,
        balance_after: i64,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let wallet_id = wallet_id.into();
        if id.is_nil() {
            return Err(DomainError::validation("ledger entry id is required"));
        }
        if wallet_id.is_empty() {
            return Err(DomainError::validation("wallet id is required"));
        }
        if balance_after < 0 {
            return Err(DomainError::validation("balance after cannot be negative"));
        }

        Ok(Self {
            id,
            wallet_id,
            entry_type,
            amount,
            balance_after,
            description: description.into(),
            created_at,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn amount(&self) -> &Amount {
        &self.amount
    }

    pub fn balance_after(&self) -> i64 {
        self.balance_after
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
