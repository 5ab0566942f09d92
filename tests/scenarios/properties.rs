//! Randomized Properties
//!
//! - Disjoint writes from two overlapping transactions apply as a union
//! - Different values for one field written concurrently conflict
//! - A cached operation recomputes exactly when a field it read changed

use crate::common::*;
use proptest::prelude::*;

fn record(system: &ReactiveSystem) -> ObservableObject {
    system
        .transaction("create record", || ObservableObject::builder("Record").build())
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn disjoint_writes_apply_as_union(
        left in prop::collection::vec(any::<i64>(), 1..5),
        right in prop::collection::vec(any::<i64>(), 1..5),
        left_first in any::<bool>(),
    ) {
        let system = ReactiveSystem::new();
        let r = record(&system);

        let t1 = system.create_transaction("left");
        let t2 = system.create_transaction("right");
        t1.run(|| left.iter().enumerate().try_for_each(|(i, v)| r.set(&format!("l{i}"), *v)))
            .unwrap();
        t2.run(|| right.iter().enumerate().try_for_each(|(i, v)| r.set(&format!("r{i}"), *v)))
            .unwrap();
        let (first, second) = if left_first { (&t1, &t2) } else { (&t2, &t1) };
        prop_assert!(first.apply().is_ok());
        prop_assert!(second.apply().is_ok());

        let snapshot = system.take_snapshot(&r).unwrap();
        prop_assert_eq!(snapshot.len(), left.len() + right.len());
        for (i, v) in left.iter().enumerate() {
            prop_assert_eq!(&snapshot[&format!("l{i}")], &Value::Int(*v));
        }
        for (i, v) in right.iter().enumerate() {
            prop_assert_eq!(&snapshot[&format!("r{i}")], &Value::Int(*v));
        }
    }

    #[test]
    fn concurrent_different_values_conflict(a in any::<i64>(), b in any::<i64>()) {
        prop_assume!(a != b && a != 0 && b != 0);
        let system = ReactiveSystem::new();
        let r = record(&system);
        write(&system, &r, "x", 0);

        let t1 = system.create_transaction("first");
        let t2 = system.create_transaction("second");
        t1.run(|| r.set("x", a)).unwrap();
        t2.run(|| r.set("x", b)).unwrap();
        prop_assert!(t1.apply().is_ok());

        let err = t2.apply().unwrap_err();
        prop_assert!(err.is_conflict());
        prop_assert_eq!(err.conflicts().len(), 1);
        prop_assert_eq!(int(&r, "x"), a);
    }

    #[test]
    fn cached_recomputes_iff_read_field_changed(
        writes in prop::collection::vec((0usize..3, 0i64..3), 0..12),
    ) {
        let system = ReactiveSystem::new();
        let r = system
            .transaction("create", || {
                ObservableObject::builder("Record")
                    .field("f0", 0)
                    .field("f1", 0)
                    .field("f2", 0)
                    .build()
            })
            .unwrap();
        let watched = {
            let target = r.clone();
            system
                .operation("watched", OperationOptions::cached(), move |_| target.get("f0"))
                .unwrap()
        };
        watched.invoke(&[]).unwrap();

        let mut current = 0;
        let mut expected_runs = 1;
        for (field, value) in writes {
            write(&system, &r, &format!("f{field}"), value);
            if field == 0 && value != current {
                current = value;
                expected_runs += 1;
            }
            prop_assert_eq!(watched.invoke(&[]).unwrap(), Value::Int(current));
        }
        prop_assert_eq!(watched.runs(), expected_runs);
    }
}
