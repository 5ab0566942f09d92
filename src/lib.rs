//! Ripple - transactional observable objects with incremental recomputation
//!
//! Objects hold versioned fields. Transactions edit them in isolation and
//! publish their changes atomically; concurrent edits of the same field are
//! reported as conflicts. Cached and reactive operations record what they
//! read and are invalidated (and, for reactive ones, re-run) when any of it
//! changes.
//!
//! # Quick Start
//!
//! ```ignore
//! use ripple::{ObservableObject, OperationOptions, ReactiveSystem, Value};
//!
//! let system = ReactiveSystem::new();
//! let person = system.transaction("create", || {
//!     ObservableObject::builder("Person").field("name", "John").build()
//! })?;
//!
//! let render = system.member_operation(&person, "render", OperationOptions::cached(), {
//!     let person = person.clone();
//!     move |_| Ok(Value::from(format!("Hello, {}", person.get("name")?)))
//! })?;
//!
//! system.transaction("rename", || person.set("name", "Jane"))?;
//! assert_eq!(render.invoke(&[])?, Value::from("Hello, Jane"));
//! ```
//!
//! # Architecture
//!
//! - `ripple-core`: values, identifiers, options and the error taxonomy
//! - `ripple-concurrency`: versions, changesets, transactions and the
//!   observer graph
//! - `ripple-engine`: operations, the `ReactiveSystem` facade, indicator,
//!   journal and configuration

pub use ripple_concurrency::{
    empty_version, is_frame_over, outside, request_next_frame, Changeset, ChangesetInfo,
    ChangesetManager, FieldPatch, FieldVersion, GcStats, JournalSink, Launch, Monitor,
    ObjectBuilder, ObjectHandle, ObjectPatch, ObjectVersion, Observable, ObservableObject,
    Observer, ObsoleteCause, PatchSet, Reaction, Recorder, Transaction, TransactionOptions,
    TransactionStatus, Worker,
};
pub use ripple_core::{
    structural_equality, ChangesetId, ContentEquality, Error, FieldConflict, FieldKey, Isolation,
    Kind, LoggingOptions, ObjectId, ObserverId, ProfilingOptions, Reentrance, Result, Stamp,
    Throttling, Value, BOOT_STAMP, FIRST_STAMP,
};
pub use ripple_engine::{
    EngineConfig, Indicator, Journal, Operation, OperationOptions, ReactionConfig,
    ReactiveSystem, CONFIG_FILE_NAME, DEFAULT_JOURNAL_CAPACITY,
};

/// Execution context plumbing for code that drives futures by hand
pub mod context {
    pub use ripple_concurrency::context::{current, enter, with, Context, ContextGuard, WithContext};
}
