//! Hello Person Scenario
//!
//! A cached `render` member over a person: created in one transaction, read
//! in a second that changes nothing, recomputed only after the name changes.

use crate::common::*;
use std::sync::Arc;

fn render(system: &ReactiveSystem, p: &ObservableObject) -> Arc<Operation> {
    let target = p.clone();
    system
        .member_operation(p, "render", OperationOptions::cached(), move |_| {
            Ok(Value::from(format!("Hello, {}", text(&target, "name"))))
        })
        .unwrap()
}

#[test]
fn render_recomputes_only_after_name_changes() {
    init_tracing();
    let system = ReactiveSystem::new();

    let t1 = system.create_transaction("T1");
    let p = t1
        .run(|| {
            ObservableObject::builder("Person")
                .field("name", "John")
                .field("age", 38)
                .build()
        })
        .unwrap();
    t1.apply().unwrap();
    let render = render(&system, &p);
    assert_eq!(render.hint(), format!("{p}.render"));

    let t2 = system.create_transaction("T2");
    let greeting = t2.run(|| render.invoke(&[])).unwrap();
    assert_eq!(greeting, Value::from("Hello, John"));
    t2.apply().unwrap();

    assert_eq!(render.invoke(&[]).unwrap(), Value::from("Hello, John"));
    assert_eq!(render.runs(), 1);

    let t3 = system.create_transaction("T3");
    t3.run(|| p.set("name", "Jane")).unwrap();
    t3.apply().unwrap();

    assert!(!render.is_up_to_date());
    assert_eq!(render.invoke(&[]).unwrap(), Value::from("Hello, Jane"));
    assert_eq!(render.runs(), 2);
    assert!(system.brief_why().contains("no operation"));
    assert!(render.last_cause().unwrap().brief().contains("T3"));
}

#[test]
fn age_change_keeps_rendered_greeting() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    let render = render(&system, &p);

    render.invoke(&[]).unwrap();
    write(&system, &p, "age", 39);
    assert_eq!(render.invoke(&[]).unwrap(), Value::from("Hello, John"));
    assert_eq!(render.runs(), 1);
}

#[test]
fn raw_fields_are_not_dependencies() {
    let system = ReactiveSystem::new();
    let p = system
        .transaction("create", || {
            ObservableObject::builder("Person")
                .field("name", "John")
                .raw_field("visits", 0)
                .build()
        })
        .unwrap();
    let badge = {
        let target = p.clone();
        system
            .member_operation(&p, "badge", OperationOptions::cached(), move |_| {
                Ok(Value::from(format!(
                    "{} ({} visits)",
                    text(&target, "name"),
                    int(&target, "visits")
                )))
            })
            .unwrap()
    };

    assert_eq!(badge.invoke(&[]).unwrap(), Value::from("John (0 visits)"));
    write(&system, &p, "visits", 5);
    // still stored transactionally
    assert_eq!(int(&p, "visits"), 5);
    assert!(badge.is_up_to_date());
    assert_eq!(badge.invoke(&[]).unwrap(), Value::from("John (0 visits)"));
}

#[test]
fn snapshot_ignores_uncommitted_writes() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    write(&system, &p, "age", 39);

    let open = system.create_transaction("pending edit");
    open.run(|| p.set("name", "Draft")).unwrap();

    let snapshot = system.take_snapshot(&p).unwrap();
    assert_eq!(snapshot.get("name"), Some(&Value::from("John")));
    assert_eq!(snapshot.get("age"), Some(&Value::Int(39)));
    assert_eq!(snapshot.len(), 2);

    open.apply().unwrap();
    assert_eq!(system.take_snapshot(&p).unwrap()["name"], Value::from("Draft"));
}
