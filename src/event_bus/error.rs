//! Event Bus Errors

use crate::event_store::EventStoreError;
use crate::processing_log::ProcessingLogError;

/// One failed subscriber, isolated from the others
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("handler '{handler_name}' failed: {message}")]
pub struct HandlerError {
    pub handler_name: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(handler_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            handler_name: handler_name.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by the bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Event store failure; nothing was dispatched
    #[error("Event store error: {0}")]
    Store(#[from] EventStoreError),

    #[error("Processing log error: {0}")]
    ProcessingLog(#[from] ProcessingLogError),

    /// The event is stored but at least one handler needs a retry
    #[error("{} handler(s) failed: {}", .0.len(), summarize(.0))]
    HandlersFailed(Vec<HandlerError>),

    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("Event bus is closed")]
    Closed,
}

impl BusError {
    /// Check if the event was rejected as a duplicate
    pub fn is_duplicate_event(&self) -> bool {
        matches!(self, BusError::Store(e) if e.is_duplicate())
    }

    /// Failed handlers, if this is a partial dispatch failure
    pub fn failed_handlers(&self) -> &[HandlerError] {
        match self {
            BusError::HandlersFailed(failures) => failures,
            _ => &[],
        }
    }
}

fn summarize(failures: &[HandlerError]) -> String {
    failures
        .iter()
        .map(|f| f.handler_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_handlers_failed_message() {
        let err = BusError::HandlersFailed(vec![
            HandlerError::new("mailer", "smtp down"),
            HandlerError::new("projector", "timeout"),
        ]);
        assert_eq!(err.to_string(), "2 handler(s) failed: mailer, projector");
        assert_eq!(err.failed_handlers().len(), 2);
    }

    #[test]
    fn test_is_duplicate_event() {
        let err = BusError::from(EventStoreError::DuplicateEvent(Uuid::new_v4()));
        assert!(err.is_duplicate_event());
        assert!(!BusError::Closed.is_duplicate_event());
    }
}
