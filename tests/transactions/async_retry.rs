//! Async Transaction Tests
//!
//! - Async bodies apply once their future completes
//! - Context survives across await points
//! - Cancellation with a restart target retries after that target finishes
//! - Indicators track running async transactions

use crate::common::*;
use parking_lot::Mutex;
use ripple::Indicator;
use std::sync::Arc;
use tokio::sync::Notify;

// ============================================================================
// Running
// ============================================================================

#[tokio::test]
async fn async_body_applies_after_completion() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);

    let age = system
        .transaction_async(TransactionOptions::new("load"), || {
            let p = p.clone();
            async move {
                tokio::task::yield_now().await;
                p.set("age", 39)?;
                tokio::task::yield_now().await;
                p.get("age")
            }
        })
        .await
        .unwrap();

    assert_eq!(age, Value::Int(39));
    assert_eq!(int(&p, "age"), 39);
}

#[tokio::test]
async fn failed_async_body_discards_writes() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);

    let err = system
        .transaction_async(TransactionOptions::new("load"), || {
            let p = p.clone();
            async move {
                p.set("name", "Jane")?;
                tokio::task::yield_now().await;
                Err::<(), _>(Error::failed("network down"))
            }
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "network down");
    assert_eq!(text(&p, "name"), "John");
}

// ============================================================================
// Restart
// ============================================================================

#[tokio::test]
async fn canceled_with_restart_target_retries() {
    init_tracing();
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);

    let attempts = Counter::new();
    let gate = Arc::new(Notify::new());
    let running: Arc<Mutex<Option<Arc<Transaction>>>> = Arc::new(Mutex::new(None));
    let hints: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let blocker = system.create_transaction("blocker");

    let load = system.transaction_async(TransactionOptions::new("load"), || {
        attempts.hit();
        let first = attempts.get() == 1;
        let (p, gate, running, hints) = (p.clone(), gate.clone(), running.clone(), hints.clone());
        async move {
            let current = Transaction::current();
            if let Some(t) = &current {
                hints.lock().push(t.hint().to_string());
            }
            *running.lock() = current;
            if first {
                gate.notified().await;
            }
            p.set("age", 40)
        }
    });

    let driver = async {
        while running.lock().is_none() {
            tokio::task::yield_now().await;
        }
        let first = running.lock().clone().unwrap();
        assert!(first.cancel(Error::failed("superseded"), Some(blocker.clone())));
        gate.notify_one();
        tokio::task::yield_now().await;
        blocker.apply().unwrap();
    };

    let (result, ()) = tokio::join!(load, driver);
    result.unwrap();

    assert_eq!(attempts.get(), 2);
    let hints = hints.lock().clone();
    assert_eq!(hints[0], "load");
    assert!(hints[1].starts_with("load - restart after"));
    assert_eq!(int(&p, "age"), 40);
}

#[tokio::test]
async fn cancel_without_restart_target_fails() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);

    let err = system
        .transaction_async(TransactionOptions::new("load"), || {
            let p = p.clone();
            async move {
                p.set("age", 50)?;
                if let Some(t) = Transaction::current() {
                    t.cancel(Error::failed("user left"), None);
                }
                Ok(())
            }
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "user left");
    assert_eq!(int(&p, "age"), 38);
}

// ============================================================================
// Indicator
// ============================================================================

#[tokio::test]
async fn indicator_is_busy_while_body_runs() {
    let system = ReactiveSystem::new();
    let indicator = Indicator::new("loading");
    let options = TransactionOptions::new("fetch").indicator(indicator.clone());

    let observed = system
        .transaction_async(options, || {
            let indicator = indicator.clone();
            async move {
                tokio::task::yield_now().await;
                Ok((indicator.is_busy(), indicator.workers()))
            }
        })
        .await
        .unwrap();

    let (busy, workers) = observed;
    assert!(busy);
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].hint, "fetch");
    assert!(!indicator.is_busy());
    indicator.when_idle().await;
}
