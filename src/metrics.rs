//! Operation metrics
//!
//! Use cases report through an injected `MetricsCollector` instead of
//! process-wide counters, so tests and alternative exporters can plug in
//! their own collector.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Kind of money movement being measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deposit,
    Withdrawal,
    Transfer,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Deposit => "deposit",
            OperationKind::Withdrawal => "withdrawal",
            OperationKind::Transfer => "transfer",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics sink held by the use cases
pub trait MetricsCollector: Send + Sync {
    /// A committed operation
    fn record_operation(&self, kind: OperationKind);

    /// An operation that returned an error
    fn record_failure(&self, kind: OperationKind);

    /// Wall time of one operation, successful or not
    fn record_duration(&self, kind: OperationKind, elapsed: Duration);
}

/// Collector that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn record_operation(&self, _kind: OperationKind) {}
    fn record_failure(&self, _kind: OperationKind) {}
    fn record_duration(&self, _kind: OperationKind, _elapsed: Duration) {}
}

/// Point-in-time view of `InMemoryMetrics`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub deposits: u64,
    pub withdrawals: u64,
    pub transfers: u64,
    pub failures: u64,
    pub total: u64,
    pub avg_duration_ms: f64,
}

/// Lock-free counters
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    deposits: AtomicU64,
    withdrawals: AtomicU64,
    transfers: AtomicU64,
    failures: AtomicU64,
    timed_operations: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let deposits = self.deposits.load(Ordering::Relaxed);
        let withdrawals = self.withdrawals.load(Ordering::Relaxed);
        let transfers = self.transfers.load(Ordering::Relaxed);
        let timed = self.timed_operations.load(Ordering::Relaxed);
        let nanos = self.total_duration_nanos.load(Ordering::Relaxed);

        let avg_duration_ms = if timed > 0 {
            nanos as f64 / timed as f64 / 1_000_000.0
        } else {
            0.0
        };

        MetricsSnapshot {
            deposits,
            withdrawals,
            transfers,
            failures: self.failures.load(Ordering::Relaxed),
            total: deposits + withdrawals + transfers,
            avg_duration_ms,
        }
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn record_operation(&self, kind: OperationKind) {
        let counter = match kind {
            OperationKind::Deposit => &self.deposits,
            OperationKind::Withdrawal => &self.withdrawals,
            OperationKind::Transfer => &self.transfers,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, _kind: OperationKind) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_duration(&self, _kind: OperationKind, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.timed_operations.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_metrics_counts() {
        let metrics = InMemoryMetrics::new();
        metrics.record_operation(OperationKind::Deposit);
        metrics.record_operation(OperationKind::Deposit);
        metrics.record_operation(OperationKind::Transfer);
        metrics.record_failure(OperationKind::Withdrawal);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.deposits, 2);
        assert_eq!(snapshot.withdrawals, 0);
        assert_eq!(snapshot.transfers, 1);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.total, 3);
    }

    #[test]
    fn test_in_memory_metrics_average_duration() {
        let metrics = InMemoryMetrics::new();
        assert_eq!(metrics.snapshot().avg_duration_ms, 0.0);

        metrics.record_duration(OperationKind::Deposit, Duration::from_millis(10));
        metrics.record_duration(OperationKind::Deposit, Duration::from_millis(30));

        assert!((metrics.snapshot().avg_duration_ms - 20.0).abs() < f64::EPSILON);
    }
}
