//! Reactive engine for ripple
//!
//! This crate builds on the concurrency layer:
//! - Operation: per-object-per-member wrapper for plain, atomic, reactive
//!   and cached members, with reentrance and throttling policies
//! - ReactiveSystem: facade owning a manager and the operation registry
//! - Indicator: busy tracking for async transactions
//! - Journal: undo/redo over applied patch sets
//! - EngineConfig: `ripple.toml` configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod indicator;
pub mod journal;
pub mod operation;
pub mod system;

pub use config::{EngineConfig, ReactionConfig, CONFIG_FILE_NAME};
pub use indicator::Indicator;
pub use journal::{Journal, DEFAULT_JOURNAL_CAPACITY};
pub use operation::{BoxResultFuture, Operation, OperationOptions};
pub use system::ReactiveSystem;
