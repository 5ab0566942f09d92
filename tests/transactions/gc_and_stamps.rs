//! Stamp and Garbage Collection Tests
//!
//! - Create-only applies do not advance the global stamp
//! - Applies that edit existing objects allocate a fresh stamp
//! - Revisions count edits and turn negative on disposal
//! - History is unlinked once no older reader is pending

use crate::common::*;
use ripple::FIRST_STAMP;

// ============================================================================
// Stamps
// ============================================================================

#[test]
fn create_only_apply_keeps_stamp() {
    let system = ReactiveSystem::new();
    assert_eq!(system.manager().current_stamp(), FIRST_STAMP);

    let t = system.create_transaction("create");
    t.run(|| ObservableObject::builder("Person").field("name", "John").build())
        .unwrap();
    t.apply().unwrap();

    assert_eq!(t.changeset().timestamp(), FIRST_STAMP);
    assert_eq!(system.manager().current_stamp(), FIRST_STAMP);
}

#[test]
fn edits_allocate_increasing_stamps() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);

    let mut stamps = Vec::new();
    for age in [39, 40, 41] {
        let t = system.create_transaction("birthday");
        t.run(|| p.set("age", age)).unwrap();
        t.apply().unwrap();
        stamps.push(t.changeset().timestamp());
    }
    assert_eq!(stamps, vec![FIRST_STAMP + 1, FIRST_STAMP + 2, FIRST_STAMP + 3]);
    assert_eq!(system.manager().current_stamp(), FIRST_STAMP + 3);
}

#[test]
fn revision_counts_edits() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    assert_eq!(p.revision().unwrap(), 1);

    write(&system, &p, "age", 39);
    assert_eq!(p.revision().unwrap(), 2);

    // several writes in one transaction are one revision
    system
        .transaction("rename", || {
            p.set("name", "Jane")?;
            p.set("age", 40)
        })
        .unwrap();
    assert_eq!(p.revision().unwrap(), 3);

    system.dispose(&p).unwrap();
    assert!(p.is_disposed());
    assert_eq!(p.revision().unwrap(), -4);
}

// ============================================================================
// Garbage collection
// ============================================================================

#[test]
fn finished_history_is_unlinked() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    write(&system, &p, "age", 39);
    write(&system, &p, "age", 40);

    assert_eq!(p.handle().history_depth(), 1);
    assert_eq!(system.manager().pending_count(), 0);
    let stats = system.gc_stats();
    assert_eq!(stats.collected_changesets, 3);
    assert_eq!(stats.pending, 0);
    assert!(stats.unlinked_versions >= 2);
}

#[test]
fn open_reader_keeps_history() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);

    let reader = system.create_transaction("reader");
    write(&system, &p, "age", 39);
    write(&system, &p, "age", 40);

    assert_eq!(p.handle().history_depth(), 3);
    assert_eq!(reader.run(|| p.get("age")).unwrap(), Value::Int(38));
    // the reader pins everything applied after it
    assert_eq!(system.collect_garbage(), 0);

    reader.apply().unwrap();
    assert_eq!(p.handle().history_depth(), 1);
    assert_eq!(system.manager().pending_count(), 0);
}

#[test]
fn manual_collection_is_idempotent() {
    let system = ReactiveSystem::new();
    let p = person(&system, "John", 38);
    write(&system, &p, "age", 39);

    assert_eq!(system.collect_garbage(), 0);
    assert_eq!(system.collect_garbage(), 0);
    assert_eq!(int(&p, "age"), 39);
}
