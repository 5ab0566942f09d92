//! Journal Tests
//!
//! - Transactions and atomic operations run with a journal are recorded
//! - Undo/redo replay patches across several objects
//! - Replays are ordinary transactions visible to readers

use crate::common::*;

#[test]
fn undo_reverts_every_object_of_a_transaction() {
    let system = ReactiveSystem::new();
    let john = person(&system, "John", 38);
    let jane = person(&system, "Jane", 35);
    let journal = system.journal(10);

    let options = TransactionOptions::new("birthdays").journal(journal.clone());
    system
        .transaction_with(options, || {
            john.set("age", 39)?;
            jane.set("age", 36)
        })
        .unwrap();
    assert_eq!(journal.len(), 1);

    assert!(journal.undo().unwrap());
    assert_eq!(int(&john, "age"), 38);
    assert_eq!(int(&jane, "age"), 35);

    assert!(journal.redo().unwrap());
    assert_eq!(int(&john, "age"), 39);
    assert_eq!(int(&jane, "age"), 36);
    assert!(!journal.can_redo());
}

#[test]
fn atomic_operation_records_into_journal() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    let journal = system.journal(5);

    let rename = {
        let p = p.clone();
        system
            .operation(
                "rename",
                OperationOptions::atomic().journal(journal.clone()),
                move |args| {
                    p.set("name", args[0].clone())?;
                    Ok(Value::Null)
                },
            )
            .unwrap()
    };

    rename.invoke(&[Value::from("Jane")]).unwrap();
    rename.invoke(&[Value::from("Joan")]).unwrap();
    assert_eq!(journal.len(), 2);

    journal.undo().unwrap();
    assert_eq!(text(&p, "name"), "Jane");
    journal.undo().unwrap();
    assert_eq!(text(&p, "name"), "John");
    assert!(!journal.can_undo());
}

#[test]
fn undo_inside_open_reader_keeps_reader_snapshot() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    let journal = system.journal(5);

    system
        .transaction_with(TransactionOptions::new("rename").journal(journal.clone()), || {
            p.set("name", "Jane")
        })
        .unwrap();

    let reader = system.create_transaction("reader");
    journal.undo().unwrap();

    assert_eq!(reader.run(|| p.get("name")).unwrap(), Value::from("Jane"));
    reader.apply().unwrap();
    assert_eq!(text(&p, "name"), "John");
}
