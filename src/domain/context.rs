//! Operation Context
//!
//! Contains metadata about the current operation for audit and tracing.
//! Carried into every published event as its metadata map.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Context for an operation, used for auditing and tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Who asked for the operation (user, service, job)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiated_by: Option<String>,

    /// Originating component (api, worker, fiat-gateway)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl OperationContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self {
            correlation_id: None,
            initiated_by: None,
            source: None,
        }
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Create context with initiator
    pub fn with_initiated_by(mut self, initiated_by: impl Into<String>) -> Self {
        self.initiated_by = Some(initiated_by.into());
        self
    }

    /// Create context with source component
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }

    /// Flatten into event metadata
    pub fn to_metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        if let Some(id) = self.correlation_id {
            metadata.insert("correlation_id".to_string(), id.to_string());
        }
        if let Some(initiated_by) = &self.initiated_by {
            metadata.insert("initiated_by".to_string(), initiated_by.clone());
        }
        if let Some(source) = &self.source {
            metadata.insert("source".to_string(), source.clone());
        }
        metadata
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let correlation_id = Uuid::new_v4();

        let context = OperationContext::new()
            .with_correlation_id(correlation_id)
            .with_initiated_by("user-42")
            .with_source("api");

        assert_eq!(context.correlation_id, Some(correlation_id));
        assert_eq!(context.initiated_by.as_deref(), Some("user-42"));
        assert_eq!(context.source.as_deref(), Some("api"));
    }

    #[test]
    fn test_ensure_correlation_id() {
        let mut context = OperationContext::new();
        assert!(context.correlation_id.is_none());

        let id = context.ensure_correlation_id();
        assert_eq!(context.correlation_id.unwrap(), id);

        // Calling again should return the same ID
        let id2 = context.ensure_correlation_id();
        assert_eq!(id, id2);
    }

    #[test]
    fn test_to_metadata_skips_missing() {
        let metadata = OperationContext::new().with_source("worker").to_metadata();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata.get("source").map(String::as_str), Some("worker"));
    }
}
