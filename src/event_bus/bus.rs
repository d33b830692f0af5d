//! Resilient Bus implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{BusError, EventBus, EventHandler, HandlerError};
use crate::event_store::{Event, EventStore};
use crate::processing_log::ProcessingLog;

/// Default number of async publish workers
pub const DEFAULT_WORKERS: usize = 5;

/// Default capacity of the async publish queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Outcome of a replay
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    /// Events loaded and dispatched
    pub events: usize,
    /// Events with at least one failed handler
    pub failed_events: usize,
}

/// Outcome of `redeliver_failed`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryReport {
    pub attempted: usize,
    pub recovered: usize,
    pub still_failing: usize,
}

#[derive(Clone)]
struct Subscription {
    handler_name: String,
    handler: Arc<dyn EventHandler>,
}

struct AsyncTask {
    event: Event,
    cancel: CancellationToken,
}

/// Store-then-dispatch core shared by callers and workers
struct Dispatcher {
    store: Arc<dyn EventStore>,
    processing_log: Arc<dyn ProcessingLog>,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
}

impl Dispatcher {
    async fn publish(&self, event: &Event) -> Result<(), BusError> {
        if let Err(e) = self.store.save_event(event).await {
            tracing::error!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                error = %e,
                "Failed to save event"
            );
            return Err(e.into());
        }

        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            "Event saved"
        );

        self.dispatch(event).await
    }

    fn handlers_for(&self, event_type: &str) -> Vec<Subscription> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Run every subscribed handler in registration order
    async fn dispatch(&self, event: &Event) -> Result<(), BusError> {
        let subscriptions = self.handlers_for(&event.event_type);

        if subscriptions.is_empty() {
            tracing::warn!(
                event_type = %event.event_type,
                event_id = %event.event_id,
                "No handlers for event type"
            );
            return Ok(());
        }

        let mut failures = Vec::new();
        for subscription in &subscriptions {
            if let Err(e) = self.handle_with_idempotency(event, subscription).await {
                failures.push(e);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BusError::HandlersFailed(failures))
        }
    }

    async fn handle_with_idempotency(
        &self,
        event: &Event,
        subscription: &Subscription,
    ) -> Result<(), HandlerError> {
        let name = subscription.handler_name.as_str();
        let log_failure = |stage: &str, e: &dyn std::fmt::Display| {
            tracing::error!(
                event_id = %event.event_id,
                handler = name,
                error = %e,
                "Processing log {} failed",
                stage
            );
            HandlerError::new(name, format!("processing log {} failed: {}", stage, e))
        };

        let claimed = self
            .processing_log
            .try_claim(event.event_id, name)
            .await
            .map_err(|e| log_failure("claim", &e))?;

        if !claimed {
            tracing::debug!(
                event_id = %event.event_id,
                handler = name,
                "Event already processed or in flight, skipping"
            );
            return Ok(());
        }

        if let Err(err) = subscription.handler.handle(event.clone()).await {
            let message = format!("{:#}", err);
            tracing::error!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                handler = name,
                error = %message,
                "Handler execution failed"
            );
            if let Err(e) = self
                .processing_log
                .mark_failed(event.event_id, name, &message)
                .await
            {
                log_failure("mark failed", &e);
            }
            return Err(HandlerError::new(name, message));
        }

        self.processing_log
            .mark_completed(event.event_id, name)
            .await
            .map_err(|e| log_failure("mark completed", &e))?;

        tracing::info!(
            event_id = %event.event_id,
            handler = name,
            "Event processed successfully"
        );
        Ok(())
    }
}

/// Persistent, idempotent event bus with an async worker pool.
///
/// Must be created inside a Tokio runtime: the workers are spawned
/// immediately.
pub struct ResilientBus {
    dispatcher: Arc<Dispatcher>,
    queue: RwLock<Option<mpsc::Sender<AsyncTask>>>,
    receiver: Arc<Mutex<mpsc::Receiver<AsyncTask>>>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl ResilientBus {
    /// Create a bus with the default pool (5 workers, queue of 1000)
    pub fn new(store: Arc<dyn EventStore>, processing_log: Arc<dyn ProcessingLog>) -> Self {
        Self::with_config(store, processing_log, BusConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn EventStore>,
        processing_log: Arc<dyn ProcessingLog>,
        config: BusConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher {
            store,
            processing_log,
            subscriptions: RwLock::new(HashMap::new()),
        });

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&dispatcher),
                    Arc::clone(&receiver),
                    shutdown.clone(),
                ))
            })
            .collect();

        tracing::info!(
            workers = config.workers.max(1),
            queue_capacity = config.queue_capacity.max(1),
            "Event bus started"
        );

        Self {
            dispatcher,
            queue: RwLock::new(Some(sender)),
            receiver,
            workers: StdMutex::new(workers),
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    /// `publish_async` with a caller-owned cancellation token. A task whose
    /// token is cancelled before a worker picks it up is skipped; one
    /// cancelled mid-publish is abandoned.
    pub fn publish_async_with_cancel(&self, event: Event, cancel: CancellationToken) -> bool {
        if self.is_closed() {
            tracing::warn!(event_id = %event.event_id, "Bus closed, dropping async event");
            return false;
        }

        let queue = self.queue.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = queue.as_ref() else {
            tracing::warn!(event_id = %event.event_id, "Bus closed, dropping async event");
            return false;
        };

        let event_id = event.event_id;
        let event_type = event.event_type.clone();
        match sender.try_send(AsyncTask { event, cancel }) {
            Ok(()) => {
                tracing::debug!(
                    event_id = %event_id,
                    event_type = %event_type,
                    "Event queued for async processing"
                );
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(event_id = %event_id, "Async queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(event_id = %event_id, "Bus closed, dropping async event");
                false
            }
        }
    }

    /// Load one stored event and run it through idempotent dispatch again
    pub async fn redeliver(&self, event_id: Uuid) -> Result<(), BusError> {
        self.ensure_open()?;
        let event = self.dispatcher.store.get_event_by_id(event_id).await?;
        self.dispatcher.dispatch(&event).await
    }

    /// Redeliver up to `limit` events that have a failed handler
    pub async fn redeliver_failed(&self, limit: usize) -> Result<RedeliveryReport, BusError> {
        self.ensure_open()?;
        let event_ids = self.dispatcher.processing_log.failed_event_ids(limit).await?;

        let mut report = RedeliveryReport {
            attempted: event_ids.len(),
            ..Default::default()
        };

        for event_id in event_ids {
            match self.redeliver(event_id).await {
                Ok(()) => report.recovered += 1,
                Err(e) => {
                    tracing::warn!(event_id = %event_id, error = %e, "Redelivery still failing");
                    report.still_failing += 1;
                }
            }
        }

        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                recovered = report.recovered,
                still_failing = report.still_failing,
                "Redelivered failed events"
            );
        }

        Ok(report)
    }
}

#[async_trait]
impl EventBus for ResilientBus {
    async fn publish(&self, event: Event) -> Result<(), BusError> {
        self.ensure_open()?;
        self.dispatcher.publish(&event).await
    }

    fn publish_async(&self, event: Event) -> bool {
        self.publish_async_with_cancel(event, CancellationToken::new())
    }

    fn subscribe(
        &self,
        event_type: &str,
        handler_name: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError> {
        self.ensure_open()?;
        if event_type.is_empty() {
            return Err(BusError::InvalidSubscription(
                "event type is required".to_string(),
            ));
        }
        if handler_name.is_empty() {
            return Err(BusError::InvalidSubscription(
                "handler name is required".to_string(),
            ));
        }

        let mut subscriptions = self
            .dispatcher
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let handlers = subscriptions.entry(event_type.to_string()).or_default();

        if handlers.iter().any(|s| s.handler_name == handler_name) {
            return Err(BusError::InvalidSubscription(format!(
                "handler '{}' is already subscribed to '{}'",
                handler_name, event_type
            )));
        }

        handlers.push(Subscription {
            handler_name: handler_name.to_string(),
            handler,
        });

        tracing::info!(
            event_type = event_type,
            handler_name = handler_name,
            total_handlers = handlers.len(),
            "Handler subscribed"
        );
        Ok(())
    }

    async fn replay(
        &self,
        aggregate_id: &str,
        from_version: i64,
    ) -> Result<ReplayReport, BusError> {
        self.ensure_open()?;
        let events = self
            .dispatcher
            .store
            .get_events(aggregate_id, from_version)
            .await?;

        tracing::info!(
            aggregate_id = aggregate_id,
            from_version = from_version,
            event_count = events.len(),
            "Replaying events"
        );

        let mut report = ReplayReport {
            events: events.len(),
            failed_events: 0,
        };
        for event in &events {
            if let Err(e) = self.dispatcher.dispatch(event).await {
                tracing::error!(
                    event_id = %event.event_id,
                    error = %e,
                    "Replay dispatch failed"
                );
                report.failed_events += 1;
            }
        }

        Ok(report)
    }

    async fn close(&self) -> Result<(), BusError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.cancel();
        self.queue
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!("Bus worker terminated abnormally: {}", e);
            }
        }

        let mut receiver = self.receiver.lock().await;
        let mut dropped = 0usize;
        while receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(dropped = dropped, "Dropped queued async events on close");
        }

        tracing::info!("Event bus closed");
        Ok(())
    }
}

async fn run_worker(
    worker_id: usize,
    dispatcher: Arc<Dispatcher>,
    receiver: Arc<Mutex<mpsc::Receiver<AsyncTask>>>,
    shutdown: CancellationToken,
) {
    loop {
        let next = {
            let mut receiver = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                guard = receiver.lock() => guard,
            };
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                task = receiver.recv() => task,
            }
        };

        let Some(task) = next else { break };

        if task.cancel.is_cancelled() {
            tracing::debug!(
                worker_id = worker_id,
                event_id = %task.event.event_id,
                "Skipping cancelled async event"
            );
            continue;
        }

        tokio::select! {
            _ = task.cancel.cancelled() => {
                tracing::warn!(
                    worker_id = worker_id,
                    event_id = %task.event.event_id,
                    "Async publish abandoned after cancellation"
                );
            }
            result = dispatcher.publish(&task.event) => {
                if let Err(e) = result {
                    tracing::error!(
                        worker_id = worker_id,
                        event_id = %task.event.event_id,
                        error = %e,
                        "Async publish failed"
                    );
                }
            }
        }
    }

    tracing::debug!(worker_id = worker_id, "Bus worker stopped");
}
