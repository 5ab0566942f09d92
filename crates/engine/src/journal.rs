//! Undo/redo journal
//!
//! Transactions run with a journal hand it the `PatchSet` of everything they
//! applied. `undo` replays the inverted patch and `redo` the original one,
//! each in a fresh transaction that does not record itself.

use parking_lot::Mutex;
use ripple_concurrency::{ChangesetManager, JournalSink, PatchSet, Transaction, TransactionOptions};
use ripple_core::{Isolation, Result};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Number of patches kept unless configured otherwise
pub const DEFAULT_JOURNAL_CAPACITY: usize = 5;

#[derive(Default)]
struct JournalState {
    patches: VecDeque<PatchSet>,
    // patches[..position] can be undone, patches[position..] redone
    position: usize,
}

/// Bounded history of applied patch sets
pub struct Journal {
    manager: Arc<ChangesetManager>,
    capacity: usize,
    state: Mutex<JournalState>,
}

impl Journal {
    /// Journal keeping [`DEFAULT_JOURNAL_CAPACITY`] patches
    pub fn new(manager: &Arc<ChangesetManager>) -> Arc<Self> {
        Journal::with_capacity(manager, DEFAULT_JOURNAL_CAPACITY)
    }

    /// Journal keeping at most `capacity` patches (at least one)
    pub fn with_capacity(manager: &Arc<ChangesetManager>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            manager: Arc::clone(manager),
            capacity: capacity.max(1),
            state: Mutex::new(JournalState::default()),
        })
    }

    /// Maximum number of patches kept
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of patches kept
    pub fn len(&self) -> usize {
        self.state.lock().patches.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.state.lock().patches.is_empty()
    }

    /// Whether a patch can be undone
    pub fn can_undo(&self) -> bool {
        self.state.lock().position > 0
    }

    /// Whether an undone patch can be redone
    pub fn can_redo(&self) -> bool {
        let state = self.state.lock();
        state.position < state.patches.len()
    }

    /// Revert the latest applied patch
    ///
    /// Returns `false` when there is nothing to undo.
    ///
    /// # Errors
    ///
    /// The conflict or failure of the reverting transaction; the journal
    /// position is left unchanged then.
    pub fn undo(&self) -> Result<bool> {
        let patch = {
            let state = self.state.lock();
            match state.position.checked_sub(1) {
                Some(index) => state.patches[index].inverted(),
                None => return Ok(false),
            }
        };
        self.replay("undo", &patch)?;
        let mut state = self.state.lock();
        state.position = state.position.saturating_sub(1);
        Ok(true)
    }

    /// Re-apply the latest undone patch
    ///
    /// Returns `false` when there is nothing to redo.
    ///
    /// # Errors
    ///
    /// The conflict or failure of the replaying transaction.
    pub fn redo(&self) -> Result<bool> {
        let patch = {
            let state = self.state.lock();
            match state.patches.get(state.position) {
                Some(patch) => patch.clone(),
                None => return Ok(false),
            }
        };
        self.replay("redo", &patch)?;
        let mut state = self.state.lock();
        state.position = (state.position + 1).min(state.patches.len());
        Ok(true)
    }

    fn replay(&self, hint: &str, patch: &PatchSet) -> Result<()> {
        let options =
            TransactionOptions::new(hint).isolation(Isolation::DisjoinFromOuterTransaction);
        Transaction::run_with(&self.manager, options, || patch.apply())?;
        debug!(action = hint, objects = patch.len(), "journal replayed patch");
        Ok(())
    }
}

impl JournalSink for Journal {
    fn edited(&self, patch: PatchSet) {
        let mut state = self.state.lock();
        let position = state.position;
        state.patches.truncate(position);
        state.patches.push_back(patch);
        while state.patches.len() > self.capacity {
            state.patches.pop_front();
        }
        state.position = state.patches.len();
    }
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Journal")
            .field("capacity", &self.capacity)
            .field("patches", &state.patches.len())
            .field("position", &state.position)
            .finish()
    }
}
