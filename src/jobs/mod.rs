//! Scheduled Jobs
//!
//! Background jobs for periodic bus maintenance:
//! - dispatches stuck in `processing` (crashed worker, killed process) are
//!   flipped to `failed`
//! - outbox records left unpublished after commit are published
//! - events with a failed handler are redelivered through the bus

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::event_bus::{BusError, EventBus, RedeliveryReport, ResilientBus};
use crate::processing_log::{ProcessingLog, ProcessingLogError};
use crate::repository::OutboxRepository;

// =========================================================================
// Stale processing reset
// =========================================================================

/// Mark `processing` records older than `older_than` as failed
pub async fn reset_stale_processing(
    processing_log: &dyn ProcessingLog,
    older_than: Duration,
) -> Result<u64, JobError> {
    let older_than = chrono::Duration::from_std(older_than)
        .map_err(|e| JobError::InvalidDuration(e.to_string()))?;

    let reset = processing_log.reset_stale_processing(older_than).await?;

    if reset > 0 {
        tracing::warn!(records_reset = reset, "Reset stale processing records");
    }

    Ok(reset)
}

// =========================================================================
// Outbox relay
// =========================================================================

/// Outcome of one outbox relay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub attempted: usize,
    pub published: usize,
    pub still_pending: usize,
}

/// Publish up to `batch_size` outbox records that were not published after
/// their transaction committed.
///
/// An event the store already holds was stored before a crash; it is
/// dispatched again and the processing log skips handlers that completed.
/// A closed bus stops the run.
pub async fn relay_outbox(
    outbox: &dyn OutboxRepository,
    bus: &ResilientBus,
    batch_size: usize,
) -> Result<RelayReport, JobError> {
    let records = outbox.fetch_pending(batch_size).await?;
    let mut report = RelayReport::default();

    for record in records {
        report.attempted += 1;
        let event_id = record.event_id();

        let outcome = match bus.publish(record.event).await {
            Ok(()) | Err(BusError::HandlersFailed(_)) => Ok(()),
            Err(e) if e.is_duplicate_event() => match bus.redeliver(event_id).await {
                Ok(()) | Err(BusError::HandlersFailed(_)) => Ok(()),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                outbox.mark_published(event_id).await?;
                report.published += 1;
            }
            Err(BusError::Closed) => return Err(JobError::Bus(BusError::Closed)),
            Err(e) => {
                tracing::warn!(
                    event_id = %event_id,
                    attempts = record.attempts + 1,
                    error = %e,
                    "Outbox relay attempt failed"
                );
                outbox.mark_failed(event_id, &e.to_string()).await?;
                report.still_pending += 1;
            }
        }
    }

    if report.attempted > 0 {
        tracing::info!(
            attempted = report.attempted,
            published = report.published,
            still_pending = report.still_pending,
            "Outbox relay finished"
        );
    }

    Ok(report)
}

// =========================================================================
// Failed event redelivery
// =========================================================================

/// Redeliver up to `batch_size` events with a failed handler
pub async fn redeliver_failed_events(
    bus: &ResilientBus,
    batch_size: usize,
) -> Result<RedeliveryReport, JobError> {
    Ok(bus.redeliver_failed(batch_size).await?)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Age after which a `processing` record counts as stale (default: 5 minutes)
    pub stale_processing_after: Duration,
    /// Interval for the stale check (default: 1 minute)
    pub stale_check_interval: Duration,
    /// Interval for failed-event redelivery (default: 1 minute)
    pub redelivery_interval: Duration,
    /// Events redelivered per run (default: 100)
    pub redelivery_batch_size: usize,
    /// Interval for the outbox relay (default: 5 seconds)
    pub outbox_relay_interval: Duration,
    /// Outbox records relayed per run (default: 100)
    pub outbox_batch_size: usize,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            stale_processing_after: Duration::from_secs(300),
            stale_check_interval: Duration::from_secs(60),
            redelivery_interval: Duration::from_secs(60),
            redelivery_batch_size: 100,
            outbox_relay_interval: Duration::from_secs(5),
            outbox_batch_size: 100,
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks until shut down
pub struct JobScheduler {
    processing_log: Arc<dyn ProcessingLog>,
    outbox: Arc<dyn OutboxRepository>,
    bus: Arc<ResilientBus>,
    config: JobSchedulerConfig,
    shutdown: CancellationToken,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(
        processing_log: Arc<dyn ProcessingLog>,
        outbox: Arc<dyn OutboxRepository>,
        bus: Arc<ResilientBus>,
    ) -> Self {
        Self::with_config(processing_log, outbox, bus, JobSchedulerConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(
        processing_log: Arc<dyn ProcessingLog>,
        outbox: Arc<dyn OutboxRepository>,
        bus: Arc<ResilientBus>,
        config: JobSchedulerConfig,
    ) -> Self {
        Self {
            processing_log,
            outbox,
            bus,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the scheduler loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the job scheduler in the background
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut stale_interval = interval(self.config.stale_check_interval);
        let mut outbox_interval = interval(self.config.outbox_relay_interval);
        let mut redelivery_interval = interval(self.config.redelivery_interval);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = stale_interval.tick() => {
                    if let Err(e) = reset_stale_processing(
                        self.processing_log.as_ref(),
                        self.config.stale_processing_after,
                    )
                    .await
                    {
                        tracing::error!(error = %e, "Stale processing reset failed");
                    }
                }
                _ = outbox_interval.tick() => {
                    if let Err(e) = relay_outbox(
                        self.outbox.as_ref(),
                        &self.bus,
                        self.config.outbox_batch_size,
                    )
                    .await
                    {
                        tracing::error!(error = %e, "Outbox relay failed");
                    }
                }
                _ = redelivery_interval.tick() => {
                    if let Err(e) =
                        redeliver_failed_events(&self.bus, self.config.redelivery_batch_size).await
                    {
                        tracing::error!(error = %e, "Failed event redelivery failed");
                    }
                }
            }
        }

        tracing::info!("Job scheduler stopped");
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match reset_stale_processing(
            self.processing_log.as_ref(),
            self.config.stale_processing_after,
        )
        .await
        {
            Ok(count) => report.stale_records_reset = count,
            Err(e) => report.errors.push(format!("Stale processing reset: {}", e)),
        }

        match relay_outbox(
            self.outbox.as_ref(),
            &self.bus,
            self.config.outbox_batch_size,
        )
        .await
        {
            Ok(outbox) => report.outbox = outbox,
            Err(e) => report.errors.push(format!("Outbox relay: {}", e)),
        }

        match redeliver_failed_events(&self.bus, self.config.redelivery_batch_size).await {
            Ok(redelivery) => report.redelivery = redelivery,
            Err(e) => report.errors.push(format!("Redelivery: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub stale_records_reset: u64,
    pub outbox: RelayReport,
    pub redelivery: RedeliveryReport,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Processing log error: {0}")]
    ProcessingLog(#[from] ProcessingLogError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Outbox error: {0}")]
    Outbox(#[from] AppError),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),
}

// =========================================================================
// Tests
// =========================================================================
