//! Transaction Lifecycle Tests
//!
//! - Status moves Open -> Sealed -> Applied/Canceled
//! - Sealed transactions reject new calls
//! - A failing body cancels and discards its writes
//! - `apply` while calls are pending is misuse
//! - `when_finished` resolves with the outcome
//! - Cooperative frame helpers

use crate::common::*;
use ripple::{is_frame_over, request_next_frame, TransactionStatus};
use std::time::Duration;

// ============================================================================
// Status
// ============================================================================

#[test]
fn status_moves_from_open_to_applied() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);

    let t = system.create_transaction("rename");
    assert_eq!(t.status(), TransactionStatus::Open);
    t.run(|| p.set("name", "Jane")).unwrap();
    assert_eq!(t.status(), TransactionStatus::Open);
    assert!(t.outcome().is_none());

    t.apply().unwrap();
    assert_eq!(t.status(), TransactionStatus::Applied);
    assert!(t.is_sealed());
    assert!(t.is_finished());
    assert!(matches!(t.outcome(), Some(Ok(()))));
}

#[test]
fn sealed_transaction_rejects_calls() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);

    let t = system.create_transaction("rename");
    t.apply().unwrap();

    let err = t.run(|| p.set("name", "Jane")).unwrap_err();
    assert!(matches!(err, Error::Sealed { .. }));
    assert!(err.is_misuse());
    assert_eq!(text(&p, "name"), "John");
}

#[test]
fn failing_body_cancels_and_discards() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);

    let t = system.create_transaction("rename");
    let err = t
        .run(|| {
            p.set("name", "Jane")?;
            Err::<(), _>(Error::failed("boom"))
        })
        .unwrap_err();
    assert_eq!(err.to_string(), "boom");
    assert!(t.is_canceled());
    assert!(matches!(t.status(), TransactionStatus::Canceled { reason } if reason == "boom"));

    // apply reports the cancellation without finishing
    assert_eq!(t.apply().unwrap_err().to_string(), "boom");
    assert!(!t.is_finished());
    t.seal();
    assert!(t.is_finished());
    assert_eq!(text(&p, "name"), "John");
}

#[test]
fn cancel_only_once() {
    let system = ReactiveSystem::new();
    let t = system.create_transaction("job");

    assert!(t.cancel(Error::failed("first"), None));
    assert!(!t.cancel(Error::failed("second"), None));
    assert_eq!(t.error().map(|e| e.to_string()), Some("first".to_string()));

    t.seal();
    assert!(t.is_finished());
    assert!(!t.cancel(Error::failed("third"), None));
}

#[test]
fn apply_while_pending_is_misuse() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);

    let t = system.create_transaction("rename");
    t.run(|| {
        let err = t.apply().unwrap_err();
        assert!(err.is_misuse());
        assert_eq!(t.pending(), 1);
        p.set("name", "Jane")
    })
    .unwrap();

    t.apply().unwrap();
    assert_eq!(text(&p, "name"), "Jane");
}

#[test]
fn current_transaction_is_scoped_to_run() {
    let system = ReactiveSystem::new();
    assert!(Transaction::current().is_none());

    let t = system.create_transaction("scope");
    let inside = t.run(|| Ok(Transaction::current())).unwrap();
    assert_eq!(inside.map(|c| c.id()), Some(t.id()));
    assert!(Transaction::current().is_none());
    t.apply().unwrap();
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test]
async fn when_finished_resolves_with_outcome() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);

    let applied = system.create_transaction("rename");
    applied.run(|| p.set("name", "Jane")).unwrap();
    let waiter = applied.when_finished();
    applied.apply().unwrap();
    waiter.await.unwrap();

    let canceled = system.create_transaction("abandoned");
    canceled.cancel(Error::failed("no longer needed"), None);
    canceled.seal();
    let err = canceled.when_finished().await.unwrap_err();
    assert_eq!(err.to_string(), "no longer needed");
}

// ============================================================================
// Frames
// ============================================================================

#[test]
fn frame_is_over_once_time_limit_passes() {
    // zero limit: over on every checked call
    assert!(is_frame_over(1, Duration::ZERO));
    // checks only every n-th call
    let checks: Vec<bool> = (0..4).map(|_| is_frame_over(1000, Duration::ZERO)).collect();
    assert!(checks.iter().filter(|over| **over).count() <= 1);
    assert!(!is_frame_over(1, Duration::from_secs(3600)));
}

#[tokio::test]
async fn next_frame_restarts_the_budget() {
    request_next_frame(Duration::ZERO).await;
    assert!(!is_frame_over(1, Duration::from_secs(3600)));
    request_next_frame(Duration::from_millis(1)).await;
    assert!(!is_frame_over(1, Duration::from_secs(3600)));
}
