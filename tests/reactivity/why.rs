//! Causality Tests
//!
//! - `why` explains the full chain that made an operation run again
//! - `brief_why` names only the immediate cause

use crate::common::*;
use parking_lot::Mutex;
use std::sync::Arc;

#[test]
fn why_follows_cached_chain_to_field_change() {
    let system = Arc::new(ReactiveSystem::new());
    let p = person(&system, "John", 38);
    let greeting = {
        let p = p.clone();
        system
            .operation("greeting", OperationOptions::cached(), move |_| {
                Ok(Value::from(format!("Hello, {}", text(&p, "name"))))
            })
            .unwrap()
    };
    let reasons = Arc::new(Mutex::new(Vec::new()));
    let render = {
        let reasons = reasons.clone();
        let weak = Arc::downgrade(&system);
        system
            .operation("render", OperationOptions::reactive(), move |_| {
                let value = greeting.invoke(&[])?;
                if let Some(system) = weak.upgrade() {
                    reasons.lock().push((system.why(), system.brief_why()));
                }
                Ok(value)
            })
            .unwrap()
    };

    render.invoke(&[]).unwrap();
    system
        .transaction("rename", || p.set("name", "Jane"))
        .unwrap();

    let reasons = reasons.lock();
    assert_eq!(reasons.len(), 2);
    assert_eq!(reasons[0].0, "render: first run");
    let (full, brief) = &reasons[1];
    assert!(full.starts_with("render: greeting became obsolete <- "));
    assert!(full.contains(".name changed by"));
    assert!(full.contains("rename"));
    assert_eq!(brief, "render: greeting became obsolete");
}

#[test]
fn why_outside_operations() {
    let system = ReactiveSystem::new();
    assert_eq!(system.why(), "no operation is running");
    let inside = system.transaction("plain", || Ok(system.brief_why())).unwrap();
    assert_eq!(inside, "no operation is running");
}
