//! Hooks transactions report to
//!
//! `Monitor` is told when an async transaction starts and stops working,
//! `JournalSink` receives the field changes of every applied transaction.

use crate::patch::PatchSet;
use ripple_core::ChangesetId;

/// A transaction as seen by a monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    /// Changeset id of the transaction
    pub id: ChangesetId,
    /// Transaction hint
    pub hint: String,
}

/// Tracks in-flight async transactions
pub trait Monitor: Send + Sync {
    /// `worker` started
    fn enter(&self, worker: &Worker);
    /// `worker` finished
    fn leave(&self, worker: &Worker);
}

/// Receives the changes of applied transactions
pub trait JournalSink: Send + Sync {
    /// A transaction applied `patch`
    fn edited(&self, patch: PatchSet);
}
