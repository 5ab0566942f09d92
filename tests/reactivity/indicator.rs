//! Indicator Tests
//!
//! - Async operations run with an indicator mark it busy while in flight
//! - Several in-flight operations share one indicator

use crate::common::*;
use ripple::Indicator;
use std::sync::Arc;
use tokio::sync::Notify;

fn parked(system: &ReactiveSystem, hint: &str, indicator: &Arc<Indicator>, gate: &Arc<Notify>) -> Arc<Operation> {
    let gate = gate.clone();
    system
        .async_operation(
            hint,
            OperationOptions::atomic().indicator(indicator.clone()),
            move |_| {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok(Value::Null)
                }
            },
        )
        .unwrap()
}

#[tokio::test]
async fn indicator_tracks_in_flight_operation() {
    let system = ReactiveSystem::new();
    let indicator = Indicator::new("saving");
    let gate = Arc::new(Notify::new());
    let save = parked(&system, "save", &indicator, &gate);

    let run = save.invoke_async(vec![]);
    let watch = async {
        indicator.when_busy().await;
        assert_eq!(indicator.counter(), 1);
        assert_eq!(indicator.workers()[0].hint, "save");
        assert!(save.is_busy());
        gate.notify_one();
    };
    let (result, ()) = tokio::join!(run, watch);
    result.unwrap();

    assert!(!indicator.is_busy());
    assert!(!save.is_busy());
}

#[tokio::test]
async fn indicator_stays_busy_until_last_worker_leaves() {
    let system = ReactiveSystem::new();
    let indicator = Indicator::new("syncing");
    let (gate_a, gate_b) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
    let a = parked(&system, "sync a", &indicator, &gate_a);
    let b = parked(&system, "sync b", &indicator, &gate_b);

    let run_a = a.invoke_async(vec![]);
    let run_b = b.invoke_async(vec![]);
    let driver = async {
        while indicator.counter() < 2 {
            tokio::task::yield_now().await;
        }
        gate_a.notify_one();
        while indicator.counter() > 1 {
            tokio::task::yield_now().await;
        }
        assert!(indicator.is_busy());
        assert_eq!(indicator.workers()[0].hint, "sync b");
        gate_b.notify_one();
    };
    let (ra, rb, ()) = tokio::join!(run_a, run_b, driver);
    ra.unwrap();
    rb.unwrap();
    indicator.when_idle().await;
}
