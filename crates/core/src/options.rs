//! Operation and diagnostics options
//!
//! These are the configuration values an operation or transaction carries:
//! kind, isolation, reentrance and throttling, plus the logging and
//! profiling switches shared by the whole engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Plain call, no transaction and no tracking
    Plain,
    /// Runs as a unit of work inside a transaction
    Atomic,
    /// Runs in a transaction, tracks what it reads and re-runs itself
    /// when any of it changes
    Reactive,
    /// Side-effect free, memoized until something it read changes
    Cached,
}

impl Kind {
    /// Whether invocations record the fields they read
    pub fn is_observing(&self) -> bool {
        matches!(self, Kind::Reactive | Kind::Cached)
    }
}

/// How a new unit of work relates to the transaction already in context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// Join the current transaction (start one if there is none)
    #[default]
    JoinToCurrentTransaction,
    /// Start a child transaction whose changeset sees the outer one's
    /// uncommitted state and merges into it on completion
    JoinAsNestedTransaction,
    /// Start an independent transaction
    DisjoinFromOuterTransaction,
    /// Start an independent transaction that inner calls cannot join either
    DisjoinFromOuterAndInnerTransaction,
    /// Independent transaction used internally to dispose objects
    DisjoinForInternalDisposal,
}

impl Isolation {
    /// Whether this isolation starts a transaction independent of the outer one
    pub fn is_disjoint(&self) -> bool {
        matches!(
            self,
            Isolation::DisjoinFromOuterTransaction
                | Isolation::DisjoinFromOuterAndInnerTransaction
                | Isolation::DisjoinForInternalDisposal
        )
    }
}

/// What happens when an operation is invoked while a previous invocation
/// (typically async) is still in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reentrance {
    /// Fail immediately with an error naming the busy operation
    #[default]
    PreventWithError,
    /// Restart the call after the in-flight one finishes
    WaitAndRestart,
    /// Cancel the in-flight transaction and start the new call immediately
    CancelPrevious,
    /// Cancel the in-flight transaction and wait for it to finish first
    CancelAndWaitPrevious,
    /// Let the in-flight one finish; the new call overwrites its result
    /// ignoring conflicts
    OverwritePrevious,
    /// Allow concurrent invocations; conflicts surface at commit time
    RunSideBySide,
}

/// When an obsolete reactive operation is re-run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Throttling {
    /// Right after the transaction that made it obsolete is applied
    #[default]
    Immediate,
    /// Only when invoked explicitly
    Manual,
    /// On the async runtime after the given delay in milliseconds
    Delay(u64),
}

impl Throttling {
    /// Delay before re-running, if any
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Throttling::Delay(ms) => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Which engine activities emit `debug!` logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingOptions {
    /// Master switch
    #[serde(default)]
    pub enabled: bool,
    /// Transaction acquire/seal/apply/cancel
    #[serde(default = "default_true")]
    pub transactions: bool,
    /// Operation invocations and cache hits
    #[serde(default = "default_true")]
    pub operations: bool,
    /// Obsolescence and reaction runs
    #[serde(default = "default_true")]
    pub reactions: bool,
    /// Individual field writes
    #[serde(default)]
    pub changes: bool,
    /// Garbage collection
    #[serde(default)]
    pub gc: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            transactions: true,
            operations: true,
            reactions: true,
            changes: false,
            gc: false,
        }
    }
}

impl LoggingOptions {
    /// Everything on
    pub fn verbose() -> Self {
        Self {
            enabled: true,
            transactions: true,
            operations: true,
            reactions: true,
            changes: true,
            gc: true,
        }
    }
}

/// Thresholds for performance warnings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingOptions {
    /// Master switch
    #[serde(default)]
    pub enabled: bool,
    /// Warn when one operation reads the same field more often than this
    #[serde(default = "default_repetitive_usage")]
    pub repetitive_usage_warning_threshold: usize,
    /// Warn when a synchronous transaction body runs longer than this
    #[serde(default = "default_blocking_ms")]
    pub main_thread_blocking_warning_threshold_ms: u64,
    /// Warn when an async transaction takes longer than this
    #[serde(default = "default_async_ms")]
    pub async_action_duration_warning_threshold_ms: u64,
    /// Log a GC summary every this many collected changesets (0 = never)
    #[serde(default = "default_gc_interval")]
    pub garbage_collection_summary_interval: u64,
}

fn default_repetitive_usage() -> usize {
    10
}

fn default_blocking_ms() -> u64 {
    14
}

fn default_async_ms() -> u64 {
    300
}

fn default_gc_interval() -> u64 {
    100
}

impl Default for ProfilingOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            repetitive_usage_warning_threshold: default_repetitive_usage(),
            main_thread_blocking_warning_threshold_ms: default_blocking_ms(),
            async_action_duration_warning_threshold_ms: default_async_ms(),
            garbage_collection_summary_interval: default_gc_interval(),
        }
    }
}
