//! Resilient bus behaviour through the public API

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use finance_ledger::event_bus::{BusConfig, EventBus, EventHandler, ReplayReport, ResilientBus};
use finance_ledger::event_store::{Event, EventStore, InMemoryEventStore};
use finance_ledger::processing_log::{InMemoryProcessingLog, ProcessingLog, ProcessingStatus};

mod common;

fn versioned(aggregate_id: &str, version: i64) -> Event {
    Event::new("wallet.changed", aggregate_id, "wallet", &json!({ "version": version }))
        .unwrap()
        .with_version(version)
}

fn recorder(seen: Arc<Mutex<Vec<i64>>>) -> Arc<dyn EventHandler> {
    Arc::new(move |event: Event| {
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().push(event.version);
            anyhow::Ok(())
        }
    })
}

#[tokio::test]
async fn test_replay_from_version_in_order() {
    let h = common::Harness::new();

    // Stored directly, never dispatched
    for version in [3, 1, 2] {
        h.events.save_event(&versioned("w-1", version)).await.unwrap();
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    h.bus
        .subscribe("wallet.changed", "recorder", recorder(seen.clone()))
        .unwrap();

    let report = h.bus.replay("w-1", 2).await.unwrap();
    assert_eq!(
        report,
        ReplayReport {
            events: 2,
            failed_events: 0
        }
    );
    assert_eq!(*seen.lock().unwrap(), vec![2, 3]);

    // Second replay is a no-op for already completed handlers
    h.bus.replay("w-1", 0).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![2, 3, 1]);
}

#[tokio::test]
async fn test_publish_twice_delivers_once() {
    let h = common::Harness::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    h.bus
        .subscribe("wallet.changed", "recorder", recorder(seen.clone()))
        .unwrap();

    let event = versioned("w-1", 1);
    h.bus.publish(event.clone()).await.unwrap();
    assert!(h.bus.publish(event.clone()).await.unwrap_err().is_duplicate_event());

    assert_eq!(seen.lock().unwrap().len(), 1);
    let record = h
        .processing_log
        .get_record(event.event_id, "recorder")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ProcessingStatus::Completed);
    assert_eq!(record.attempts, 1);
}

#[tokio::test]
async fn test_failed_handler_retried_by_replay_only() {
    let h = common::Harness::new();
    let healthy = Arc::new(Mutex::new(Vec::new()));
    let failures = Arc::new(Mutex::new(0));

    let attempts = failures.clone();
    let flaky: Arc<dyn EventHandler> = Arc::new(move |_event: Event| {
        let attempts = attempts.clone();
        async move {
            let mut attempts = attempts.lock().unwrap();
            *attempts += 1;
            if *attempts == 1 {
                anyhow::bail!("projection store offline");
            }
            anyhow::Ok(())
        }
    });
    h.bus.subscribe("wallet.changed", "projector", flaky).unwrap();
    h.bus
        .subscribe("wallet.changed", "recorder", recorder(healthy.clone()))
        .unwrap();

    let event = versioned("w-1", 1);
    let err = h.bus.publish(event.clone()).await.unwrap_err();
    assert_eq!(err.failed_handlers().len(), 1);
    assert_eq!(err.failed_handlers()[0].handler_name, "projector");

    let record = h
        .processing_log
        .get_record(event.event_id, "projector")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ProcessingStatus::Failed);
    assert_eq!(record.last_error.as_deref(), Some("projection store offline"));

    h.bus.replay("w-1", 1).await.unwrap();
    assert_eq!(*failures.lock().unwrap(), 2);
    assert_eq!(healthy.lock().unwrap().len(), 1);
    assert!(h
        .processing_log
        .is_processed(event.event_id, "projector")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_publish_async_with_worker_pool() {
    let events = Arc::new(InMemoryEventStore::new());
    let bus = ResilientBus::with_config(
        events.clone(),
        Arc::new(InMemoryProcessingLog::new()),
        BusConfig {
            workers: 2,
            queue_capacity: 16,
        },
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler: Arc<dyn EventHandler> = Arc::new(move |event: Event| {
        let tx = tx.clone();
        async move {
            tx.send(event.version)?;
            anyhow::Ok(())
        }
    });
    bus.subscribe("wallet.changed", "notifier", handler).unwrap();

    for version in 1..=5 {
        assert!(bus.publish_async(versioned("w-1", version)));
    }

    let mut delivered = Vec::new();
    while delivered.len() < 5 {
        let version = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        delivered.push(version);
    }
    delivered.sort_unstable();
    assert_eq!(delivered, vec![1, 2, 3, 4, 5]);

    bus.close().await.unwrap();
    assert_eq!(events.len().await, 5);
    assert!(!bus.publish_async(versioned("w-1", 6)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_replays_apply_handler_once() {
    let h = common::Harness::new();
    let calls = Arc::new(Mutex::new(0));
    let effects = Arc::new(Mutex::new(0));

    let (call_count, effect_count) = (calls.clone(), effects.clone());
    let slow: Arc<dyn EventHandler> = Arc::new(move |_event: Event| {
        let (calls, effects) = (call_count.clone(), effect_count.clone());
        async move {
            let first = {
                let mut calls = calls.lock().unwrap();
                *calls += 1;
                *calls == 1
            };
            if first {
                anyhow::bail!("ledger projection unavailable");
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            *effects.lock().unwrap() += 1;
            anyhow::Ok(())
        }
    });
    h.bus.subscribe("wallet.changed", "projector", slow).unwrap();

    let event = versioned("w-1", 1);
    assert!(h.bus.publish(event.clone()).await.is_err());

    let (first, second) = tokio::join!(
        tokio::spawn({
            let bus = h.bus.clone();
            async move { bus.replay("w-1", 1).await }
        }),
        tokio::spawn({
            let bus = h.bus.clone();
            async move { bus.replay("w-1", 1).await }
        }),
    );
    first.unwrap().unwrap();
    second.unwrap().unwrap();

    // Whichever dispatcher lost the claim skipped the handler
    assert_eq!(*effects.lock().unwrap(), 1);
    assert_eq!(*calls.lock().unwrap(), 2);

    // Once completed, neither path runs it again
    h.bus.replay("w-1", 1).await.unwrap();
    h.bus.redeliver_failed(10).await.unwrap();
    assert_eq!(*effects.lock().unwrap(), 1);

    let record = h
        .processing_log
        .get_record(event.event_id, "projector")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ProcessingStatus::Completed);
    assert_eq!(record.attempts, 2);
}
