//! Amount type
//!
//! Domain primitive for monetary amounts in the smallest currency unit
//! (cents, satoshis). All amounts are validated at construction time, so
//! invalid values cannot exist in the system.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::DomainError;

/// Length of an ISO-4217 style currency code
const CURRENCY_CODE_LEN: usize = 3;

/// Amount represents a validated monetary value.
///
/// # Invariants
/// - Value is never negative
/// - Currency is exactly 3 uppercase ASCII letters
///
/// # Example
/// ```
/// use finance_ledger::domain::Amount;
///
/// let amount = Amount::new(100, "USD").unwrap();
/// assert_eq!(amount.value(), 100);
/// assert_eq!(amount.currency(), "USD");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawAmount", into = "RawAmount")]
pub struct Amount {
    value: i64,
    currency: String,
}

/// Unvalidated wire shape, re-validated on deserialization
#[derive(Serialize, Deserialize)]
struct RawAmount {
    value: i64,
    currency: String,
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `DomainError::Validation` if value < 0
    /// - `DomainError::Validation` if currency is not 3 uppercase letters
    pub fn new(value: i64, currency: impl Into<String>) -> Result<Self, DomainError> {
        if value < 0 {
            return Err(DomainError::validation("amount value cannot be negative"));
        }

        let currency = currency.into();
        validate_currency(&currency)?;

        Ok(Self { value, currency })
    }

    /// Zero amount in the given currency
    pub fn zero(currency: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(0, currency)
    }

    /// Value in the smallest currency unit
    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Add two amounts of the same currency.
    pub fn add(&self, other: &Amount) -> Result<Amount, DomainError> {
        self.ensure_same_currency(other)?;

        let value = self
            .value
            .checked_add(other.value)
            .ok_or_else(|| DomainError::validation("amount overflow"))?;

        Ok(Amount {
            value,
            currency: self.currency.clone(),
        })
    }

    /// Subtract `other` from this amount. The result can be zero but never negative.
    pub fn sub(&self, other: &Amount) -> Result<Amount, DomainError> {
        self.ensure_same_currency(other)?;

        if self.value < other.value {
            return Err(DomainError::insufficient_amount(other.value, self.value));
        }

        Ok(Amount {
            value: self.value - other.value,
            currency: self.currency.clone(),
        })
    }

    /// Check if this amount covers `other`
    pub fn is_sufficient_for(&self, other: &Amount) -> bool {
        self.currency == other.currency && self.value >= other.value
    }

    fn ensure_same_currency(&self, other: &Amount) -> Result<(), DomainError> {
        if self.currency != other.currency {
            return Err(DomainError::currency_mismatch(&self.currency, &other.currency));
        }
        Ok(())
    }
}

/// Validate a currency code: exactly 3 uppercase ASCII letters.
pub fn validate_currency(currency: &str) -> Result<(), DomainError> {
    let well_formed = currency.len() == CURRENCY_CODE_LEN
        && currency.chars().all(|c| c.is_ascii_uppercase());

    if !well_formed {
        return Err(DomainError::validation(format!(
            "currency must be 3 uppercase letters (got {:?})",
            currency
        )));
    }
    Ok(())
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency)
    }
}

impl TryFrom<RawAmount> for Amount {
    type Error = DomainError;

    fn try_from(raw: RawAmount) -> Result<Self, Self::Error> {
        Amount::new(raw.value, raw.currency)
    }
}

impl From<Amount> for RawAmount {
    fn from(amount: Amount) -> Self {
        RawAmount {
            value: amount.value,
            currency: amount.currency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_valid() {
        let amount = Amount::new(100, "USD").unwrap();
        assert_eq!(amount.value(), 100);
        assert_eq!(amount.currency(), "USD");
    }

    #[test]
    fn test_amount_zero_allowed() {
        let amount = Amount::new(0, "BRL").unwrap();
        assert!(amount.is_zero());
    }

    #[test]
    fn test_amount_negative_rejected() {
        let err = Amount::new(-1, "USD").unwrap_err();
        assert_eq!(err.to_string(), "amount value cannot be negative");
        assert!(err.is_validation());
    }

    #[test]
    fn test_amount_lowercase_currency_rejected() {
        let err = Amount::new(10, "usd").unwrap_err();
        assert!(err.to_string().contains("uppercase"));
    }

    #[test]
    fn test_amount_currency_length() {
        assert!(Amount::new(10, "US").is_err());
        assert!(Amount::new(10, "USDT").is_err());
        assert!(Amount::new(10, "").is_err());
        assert!(Amount::new(10, "U1D").is_err());
    }

    #[test]
    fn test_amount_add() {
        let a = Amount::new(100, "USD").unwrap();
        let b = Amount::new(50, "USD").unwrap();
        let sum = a.add(&b).unwrap();
        assert_eq!(sum.value(), 150);
        // operands untouched
        assert_eq!(a.value(), 100);
    }

    #[test]
    fn test_amount_add_overflow() {
        let a = Amount::new(i64::MAX, "USD").unwrap();
        let b = Amount::new(1, "USD").unwrap();
        assert!(a.add(&b).unwrap_err().is_validation());
    }

    #[test]
    fn test_amount_sub_to_zero() {
        let a = Amount::new(30, "USD").unwrap();
        let diff = a.sub(&a).unwrap();
        assert!(diff.is_zero());
    }

    #[test]
    fn test_amount_sub_insufficient() {
        let a = Amount::new(30, "USD").unwrap();
        let b = Amount::new(31, "USD").unwrap();
        assert_eq!(
            a.sub(&b).unwrap_err(),
            DomainError::InsufficientAmount {
                required: 31,
                available: 30
            }
        );
    }

    #[test]
    fn test_amount_currency_mismatch() {
        let usd = Amount::new(30, "USD").unwrap();
        let eur = Amount::new(10, "EUR").unwrap();
        assert!(matches!(
            usd.add(&eur),
            Err(DomainError::CurrencyMismatch { .. })
        ));
        assert!(matches!(
            usd.sub(&eur),
            Err(DomainError::CurrencyMismatch { .. })
        ));
        assert!(!usd.is_sufficient_for(&eur));
    }

    #[test]
    fn test_amount_deserialize_revalidates() {
        let ok: Amount = serde_json::from_str(r#"{"value":5,"currency":"USD"}"#).unwrap();
        assert_eq!(ok.value(), 5);

        let bad: Result<Amount, _> = serde_json::from_str(r#"{"value":-5,"currency":"USD"}"#);
        assert!(bad.is_err());
    }
}
