//! Reactive Operation Tests
//!
//! - Reactions rerun when something they read changes
//! - Changes reach reactions through cached operations
//! - A reaction's own writes do not retrigger it
//! - Failing reactions are logged and left obsolete
//! - Delayed and async reactions run on the tokio runtime

use crate::common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn watcher(system: &ReactiveSystem, p: &ObservableObject, seen: &Arc<Mutex<Vec<i64>>>) -> Arc<Operation> {
    let (p, seen) = (p.clone(), seen.clone());
    system
        .operation("watch age", OperationOptions::reactive(), move |_| {
            let age = int(&p, "age");
            seen.lock().push(age);
            Ok(Value::Int(age))
        })
        .unwrap()
}

// ============================================================================
// Reruns
// ============================================================================

#[test]
fn reaction_reruns_on_change() {
    init_tracing();
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let watch = watcher(&system, &p, &seen);

    watch.invoke(&[]).unwrap();
    write(&system, &p, "age", 39);
    write(&system, &p, "name", "Jane");
    write(&system, &p, "age", 40);

    assert_eq!(*seen.lock(), vec![38, 39, 40]);
    assert_eq!(watch.runs(), 3);
    assert!(watch.is_up_to_date());
    assert_eq!(watch.last_result().unwrap().unwrap(), Value::Int(40));
}

#[test]
fn reaction_follows_cached_dependency() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    let greeting = {
        let p = p.clone();
        system
            .operation("greeting", OperationOptions::cached(), move |_| {
                Ok(Value::from(format!("Hello, {}", text(&p, "name"))))
            })
            .unwrap()
    };
    let shown = Arc::new(Mutex::new(Vec::new()));
    let render = {
        let (greeting, shown) = (greeting.clone(), shown.clone());
        system
            .operation("render", OperationOptions::reactive(), move |_| {
                let value = greeting.invoke(&[])?;
                shown.lock().push(value.to_string());
                Ok(value)
            })
            .unwrap()
    };

    render.invoke(&[]).unwrap();
    write(&system, &p, "age", 39);
    write(&system, &p, "name", "Jane");

    assert_eq!(*shown.lock(), vec!["Hello, John", "Hello, Jane"]);
    assert_eq!(greeting.runs(), 2);
    assert!(render.is_up_to_date());
}

#[test]
fn reaction_writes_feed_other_reactions() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    let summary = system
        .transaction("create summary", || {
            ObservableObject::builder("Summary").field("text", "").build()
        })
        .unwrap();

    let summarize = {
        let (p, summary) = (p.clone(), summary.clone());
        system
            .operation("summarize", OperationOptions::reactive(), move |_| {
                summary.set("text", format!("{} ({})", text(&p, "name"), int(&p, "age")))?;
                Ok(Value::Null)
            })
            .unwrap()
    };
    let printed = Arc::new(Mutex::new(Vec::new()));
    let print = {
        let (summary, printed) = (summary.clone(), printed.clone());
        system
            .operation("print", OperationOptions::reactive(), move |_| {
                printed.lock().push(text(&summary, "text"));
                Ok(Value::Null)
            })
            .unwrap()
    };

    print.invoke(&[]).unwrap();
    summarize.invoke(&[]).unwrap();
    write(&system, &p, "age", 39);

    assert_eq!(*printed.lock(), vec!["", "John (38)", "John (39)"]);
    assert_eq!(text(&summary, "text"), "John (39)");
}

#[test]
fn own_writes_do_not_retrigger() {
    let system = ReactiveSystem::new();
    let counter = system
        .transaction("create counter", || {
            ObservableObject::builder("Counter").field("value", 0).build()
        })
        .unwrap();
    let bump = {
        let counter = counter.clone();
        system
            .operation("bump", OperationOptions::reactive(), move |_| {
                let value = int(&counter, "value");
                counter.set("value", value + 1)?;
                Ok(Value::Int(value + 1))
            })
            .unwrap()
    };

    bump.invoke(&[]).unwrap();
    assert_eq!(int(&counter, "value"), 1);
    assert_eq!(bump.runs(), 1);
    assert!(bump.is_up_to_date());

    write(&system, &counter, "value", 10);
    assert_eq!(int(&counter, "value"), 11);
    assert_eq!(bump.runs(), 2);
}

#[test]
fn failing_reaction_stays_obsolete() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    let check = {
        let p = p.clone();
        system
            .operation("check age", OperationOptions::reactive(), move |_| {
                let age = int(&p, "age");
                if age > 150 {
                    return Err(Error::failed("implausible age"));
                }
                Ok(Value::Int(age))
            })
            .unwrap()
    };

    check.invoke(&[]).unwrap();
    // the failure is reported, not propagated to the writer
    write(&system, &p, "age", 200);
    assert_eq!(check.runs(), 2);
    assert!(!check.is_up_to_date());

    write(&system, &p, "age", 60);
    assert_eq!(check.runs(), 2);
    assert_eq!(check.invoke(&[]).unwrap(), Value::Int(60));
    assert!(check.is_up_to_date());
}

#[test]
fn disposed_reaction_owner_stops_reacting() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let watch = {
        let (target, seen) = (p.clone(), seen.clone());
        system
            .member_operation(&p, "watch", OperationOptions::reactive(), move |_| {
                seen.lock().push(target.get("age").ok());
                Ok(Value::Null)
            })
            .unwrap()
    };
    watch.invoke(&[]).unwrap();

    system.dispose(&p).unwrap();
    // the disposal itself is the last change it reacts to
    assert_eq!(*seen.lock(), vec![Some(Value::Int(38)), None]);
    assert!(system.get_member_operation(&p, "watch").is_none());
    assert!(watch.last_result().is_none());
}

// ============================================================================
// Throttling and async
// ============================================================================

#[tokio::test]
async fn delayed_reaction_coalesces_changes() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let watch = watcher(&system, &p, &seen);
    watch
        .configure(|o| o.throttling = Throttling::Delay(20))
        .unwrap();

    watch.invoke(&[]).unwrap();
    write(&system, &p, "age", 39);
    write(&system, &p, "age", 40);
    assert_eq!(watch.runs(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(*seen.lock(), vec![38, 40]);
    assert!(watch.is_up_to_date());
}

#[tokio::test]
async fn async_reaction_runs_on_runtime() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let load = {
        let (p, seen) = (p.clone(), seen.clone());
        system
            .async_operation("load", OperationOptions::reactive(), move |_| {
                let (p, seen) = (p.clone(), seen.clone());
                async move {
                    let name = p.get("name")?;
                    tokio::task::yield_now().await;
                    seen.lock().push(name.to_string());
                    Ok(name)
                }
            })
            .unwrap()
    };

    load.invoke_async(vec![]).await.unwrap();
    write(&system, &p, "name", "Jane");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*seen.lock(), vec!["John", "Jane"]);
    assert_eq!(load.runs(), 2);
    assert!(load.is_up_to_date());
}
