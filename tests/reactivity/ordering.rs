//! Reaction Ordering Tests
//!
//! - Reactions of one round run by ascending order
//! - Reactions triggered by reactions run in the next round
//! - Reactions that keep invalidating each other stop after max rounds

use crate::common::*;
use parking_lot::Mutex;
use ripple::EngineConfig;
use std::sync::Arc;

#[test]
fn reactions_run_by_order() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut ops = Vec::new();
    for (name, order) in [("late", 10), ("early", -5), ("middle", 0)] {
        let (p, log) = (p.clone(), log.clone());
        let op = system
            .operation(
                name,
                OperationOptions::reactive().order(order),
                move |_| {
                    p.get("age")?;
                    log.lock().push(name);
                    Ok(Value::Null)
                },
            )
            .unwrap();
        op.invoke(&[]).unwrap();
        ops.push(op);
    }
    log.lock().clear();

    write(&system, &p, "age", 39);
    assert_eq!(*log.lock(), vec!["early", "middle", "late"]);

    // reordering takes effect on the next round
    ops[0].configure(|o| o.order = -10).unwrap();
    log.lock().clear();
    write(&system, &p, "age", 40);
    assert_eq!(*log.lock(), vec!["late", "early", "middle"]);
}

#[test]
fn ping_pong_reactions_stop_after_max_rounds() {
    init_tracing();
    let mut config = EngineConfig::default();
    config.reactions.max_rounds = 4;
    let system = ReactiveSystem::with_config(&config);

    let cell = system
        .transaction("create", || {
            ObservableObject::builder("Cell")
                .field("x", 0)
                .field("y", 0)
                .build()
        })
        .unwrap();

    let forward = {
        let cell = cell.clone();
        system
            .operation("forward", OperationOptions::reactive(), move |_| {
                cell.set("y", int(&cell, "x") + 1)?;
                Ok(Value::Null)
            })
            .unwrap()
    };
    let backward = {
        let cell = cell.clone();
        system
            .operation("backward", OperationOptions::reactive(), move |_| {
                cell.set("x", int(&cell, "y") + 1)?;
                Ok(Value::Null)
            })
            .unwrap()
    };

    forward.invoke(&[]).unwrap();
    backward.invoke(&[]).unwrap();

    // two direct runs plus one reaction per round
    assert_eq!(forward.runs() + backward.runs(), 2 + 4);
    assert_eq!((int(&cell, "x"), int(&cell, "y")), (6, 5));
    assert!(!forward.is_up_to_date());
}
