//! Concurrency layer for ripple
//!
//! This crate implements multi-version transactional objects with:
//! - ObjectHandle / ObjectVersion / FieldVersion: versioned object storage
//! - Changeset: snapshot reads, isolated writes, rebase and conflict detection
//! - ChangesetManager: revision stamps, pending queue, history collection
//! - Transaction: isolation, nesting, sealing, cancellation, async retry
//! - Observer / Launch: dependency graph driving invalidation of cached and
//!   reactive operations
//! - ObservableObject: accessor routing field access through the context

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod changeset;
pub mod context;
pub mod hooks;
pub mod manager;
pub mod mvcc;
pub mod observer;
pub mod patch;
pub mod transaction;
pub mod version;

pub use changeset::Changeset;
pub use context::{Context, ContextGuard, WithContext};
pub use hooks::{JournalSink, Monitor, Worker};
pub use manager::{ChangesetManager, GcStats, DEFAULT_MAX_REACTION_ROUNDS};
pub use mvcc::{ObjectBuilder, ObservableObject};
pub use observer::{Launch, Observable, Observer, ObsoleteCause, Reaction, Recorder};
pub use patch::{FieldPatch, ObjectPatch, PatchSet};
pub use transaction::{
    is_frame_over, outside, request_next_frame, Transaction, TransactionOptions,
    TransactionStatus,
};
pub use version::{empty_version, ChangesetInfo, FieldVersion, ObjectHandle, ObjectVersion};
