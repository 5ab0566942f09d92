//! Shared test utilities for all integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from any test's
//! main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

pub use ripple::{
    ChangesetManager, Error, Isolation, Kind, ObservableObject, Operation, OperationOptions,
    ReactiveSystem, Reentrance, Result, Throttling, Transaction, TransactionOptions, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output to the test harness (shown with `--nocapture`).
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

// ============================================================================
// Fixtures
// ============================================================================

/// Create a `Person { name, age }` in its own transaction.
pub fn person(system: &ReactiveSystem, name: &str, age: i64) -> ObservableObject {
    system
        .transaction("create person", || {
            ObservableObject::builder("Person")
                .field("name", name)
                .field("age", age)
                .build()
        })
        .expect("person creation should apply")
}

/// Apply one field write in its own transaction.
pub fn write(system: &ReactiveSystem, object: &ObservableObject, key: &str, value: impl Into<Value>) {
    let value = value.into();
    system
        .transaction("write", || object.set(key, value))
        .expect("write should apply");
}

/// Read an integer field, panicking on anything else.
pub fn int(object: &ObservableObject, key: &str) -> i64 {
    object
        .get(key)
        .expect("field should be readable")
        .as_int()
        .expect("field should be an integer")
}

/// Read a string field, panicking on anything else.
pub fn text(object: &ObservableObject, key: &str) -> String {
    object
        .get(key)
        .expect("field should be readable")
        .as_str()
        .expect("field should be a string")
        .to_string()
}

/// Shared call counter for operation bodies.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
