//! Error types for ripple
//!
//! Three families of failure exist:
//! - Misuse: programmer-contract violations, never retried
//! - Conflict: rebase found fields changed concurrently to different content
//! - Cancellation: a transaction was canceled (reentrance policy, explicit
//!   cancel, or a failing body) and has no restart target
//!
//! Errors are `Clone` because one cancellation reason is delivered to every
//! party waiting on the same transaction.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::types::FieldConflict;
use thiserror::Error;

/// Result type alias for ripple operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ripple
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A mutation was attempted with no transaction in context
    #[error("{action} is not allowed outside of a transaction")]
    OutsideTransaction {
        /// What was attempted
        action: String,
    },

    /// A no-side-effects (cached) operation tried to write
    #[error("operation '{operation}' should not have side effects (trying to change {target})")]
    SideEffect {
        /// Operation that attempted the write
        operation: String,
        /// Object and field being written
        target: String,
    },

    /// The transaction is sealed and accepts no more work
    #[error("transaction {transaction} is sealed and cannot be run or modified")]
    Sealed {
        /// Sealed transaction
        transaction: String,
    },

    /// A write was attempted while inspecting a transaction
    #[error("cannot change {target} in inspection mode")]
    InspectionMode {
        /// Object and field being written
        target: String,
    },

    /// Reentrant call rejected under `Reentrance::PreventWithError`
    #[error("operation '{operation}' is already running (reentrance is prevented) in {busy_with}")]
    Reentrance {
        /// Busy operation
        operation: String,
        /// Transaction that holds it
        busy_with: String,
    },

    /// No version of the object is visible to the reading changeset
    #[error("object {object} is not yet available for {changeset}{detail}")]
    NotAvailable {
        /// Object that could not be resolved
        object: String,
        /// Reading changeset
        changeset: String,
        /// Extra context (which transaction still holds the object)
        detail: String,
    },

    /// The object has been disposed
    #[error("object {object} is disposed")]
    Disposed {
        /// Disposed object
        object: String,
    },

    /// Any other contract violation
    #[error("misuse: {0}")]
    Misuse(String),

    /// Rebase found unresolved field conflicts at seal time
    #[error("{transaction} conflicts with: {}", format_conflicts(.conflicts))]
    Conflict {
        /// Conflicting transaction
        transaction: String,
        /// Every conflicting field
        conflicts: Vec<FieldConflict>,
    },

    /// The transaction was canceled
    #[error("transaction {transaction} is canceled: {reason}")]
    Canceled {
        /// Canceled transaction
        transaction: String,
        /// Cancellation reason
        reason: String,
    },

    /// Failure raised by user code running under a transaction or operation
    #[error("{0}")]
    Failed(String),

    /// Configuration could not be read, parsed or written
    #[error("configuration error: {0}")]
    Config(String),
}

fn format_conflicts(conflicts: &[FieldConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Create a misuse error
    pub fn misuse(msg: impl Into<String>) -> Self {
        Error::Misuse(msg.into())
    }

    /// Create a failure raised by user code
    pub fn failed(msg: impl Into<String>) -> Self {
        Error::Failed(msg.into())
    }

    /// Programmer-contract violation (never retried)
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Error::OutsideTransaction { .. }
                | Error::SideEffect { .. }
                | Error::Sealed { .. }
                | Error::InspectionMode { .. }
                | Error::Reentrance { .. }
                | Error::NotAvailable { .. }
                | Error::Disposed { .. }
                | Error::Misuse(_)
        )
    }

    /// Data conflict detected by rebase
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Transaction cancellation
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled { .. })
    }

    /// Conflicting fields, empty for non-conflict errors
    pub fn conflicts(&self) -> &[FieldConflict] {
        match self {
            Error::Conflict { conflicts, .. } => conflicts,
            _ => &[],
        }
    }
}
