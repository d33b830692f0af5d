//! Error handling module
//!
//! Centralized error types for the ledger. Domain rule violations are
//! wrapped as-is so callers can match on the exact `DomainError`.

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Domain errors
    #[error(transparent)]
    Domain(#[from] crate::domain::DomainError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Concurrency conflict on wallet {wallet_id}: expected version {expected_version}")]
    ConcurrencyConflict {
        wallet_id: String,
        expected_version: i64,
    },

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(wallet_id: impl Into<String>, expected_version: i64) -> Self {
        Self::ConcurrencyConflict {
            wallet_id: wallet_id.into(),
            expected_version,
        }
    }

    /// Whether re-running the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::ConcurrencyConflict { .. } => true,
            // 40001 = serialization_failure, 40P01 = deadlock_detected
            AppError::Database(sqlx::Error::Database(db_err)) => {
                matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound { .. })
    }

    /// Get the wrapped domain error, if any
    pub fn as_domain(&self) -> Option<&crate::domain::DomainError> {
        match self {
            AppError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;

    #[test]
    fn test_conflict_is_retryable() {
        assert!(AppError::conflict("w-1", 3).is_retryable());
        assert!(!AppError::not_found("wallet", "w-1").is_retryable());
        assert!(!AppError::Domain(DomainError::SameWalletTransfer).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            AppError::not_found("wallet", "w-9").to_string(),
            "wallet not found: w-9"
        );
        let err: AppError = DomainError::validation("amount must be positive").into();
        assert_eq!(err.to_string(), "amount must be positive");
        assert!(err.as_domain().is_some());
    }
}
