//! Transaction Integration Tests
//!
//! Snapshot isolation, rebase conflicts, nesting, lifecycle, async retry,
//! garbage collection and the journal.

#[path = "../common/mod.rs"]
mod common;

mod async_retry;
mod gc_and_stamps;
mod journal;
mod lifecycle;
