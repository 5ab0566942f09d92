//! Changeset manager: stamps, identities and history garbage collection
//!
//! One manager backs one reactive system. It hands out:
//! 1. Revision stamps (`current_stamp` on acquire, `allocate_stamp` on apply)
//! 2. Changeset, object and observer ids
//!
//! and keeps the pending queue: every acquired changeset stays queued until
//! it is finished and no older changeset is still open. Collecting a
//! changeset unlinks the `former` pointers of its versions, which releases
//! history nobody can read anymore.
//!
//! ## Collection rule
//!
//! ```text
//! 1. sort pending by timestamp
//! 2. take the longest prefix of finished changesets
//! 3. unlink former of every version they own
//! 4. drop them from the queue
//! ```
//!
//! A reader with revision `r` only ever walks past versions stamped `> r`.
//! Every collected changeset is stamped `<=` the revision of every changeset
//! still open, so nobody needs the history behind its versions.

use crate::changeset::Changeset;
use parking_lot::{Mutex, MutexGuard, RwLock};
use ripple_core::{
    structural_equality, ChangesetId, ContentEquality, LoggingOptions, ObjectId, ObserverId,
    ProfilingOptions, Stamp, FIRST_STAMP,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Default bound on reaction rounds triggered by one apply
pub const DEFAULT_MAX_REACTION_ROUNDS: usize = 100;

/// Garbage collection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Changesets dropped from the pending queue
    pub collected_changesets: u64,
    /// Object versions whose history was unlinked
    pub unlinked_versions: u64,
    /// Changesets still pending
    pub pending: usize,
}

/// Owner of stamps, ids and the pending queue
pub struct ChangesetManager {
    /// Latest stamp handed out by an apply
    stamp: AtomicU64,
    next_changeset_id: AtomicU64,
    next_object_id: AtomicU64,
    next_observer_id: AtomicU64,
    pending: Mutex<Vec<Arc<Changeset>>>,
    /// Serializes rebase + apply, and acquire against both
    commit: Mutex<()>,
    collected: AtomicU64,
    unlinked: AtomicU64,
    logging: RwLock<LoggingOptions>,
    profiling: RwLock<ProfilingOptions>,
    equality: RwLock<ContentEquality>,
    max_reaction_rounds: AtomicUsize,
}

impl ChangesetManager {
    /// Create a manager with default settings
    pub fn new() -> Arc<Self> {
        Arc::new(ChangesetManager {
            stamp: AtomicU64::new(FIRST_STAMP),
            next_changeset_id: AtomicU64::new(1),
            next_object_id: AtomicU64::new(1),
            next_observer_id: AtomicU64::new(1),
            pending: Mutex::new(Vec::new()),
            commit: Mutex::new(()),
            collected: AtomicU64::new(0),
            unlinked: AtomicU64::new(0),
            logging: RwLock::new(LoggingOptions::default()),
            profiling: RwLock::new(ProfilingOptions::default()),
            equality: RwLock::new(structural_equality),
            max_reaction_rounds: AtomicUsize::new(DEFAULT_MAX_REACTION_ROUNDS),
        })
    }

    /// Stamp a freshly acquired changeset reads at
    pub fn current_stamp(&self) -> Stamp {
        self.stamp.load(Ordering::SeqCst)
    }

    /// Allocate the next stamp for an apply that touched existing objects
    pub fn allocate_stamp(&self) -> Stamp {
        self.stamp.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Allocate the next changeset id
    pub fn next_changeset_id(&self) -> ChangesetId {
        ChangesetId::new(self.next_changeset_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Allocate the next object id
    pub fn next_object_id(&self) -> ObjectId {
        ObjectId::new(self.next_object_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Allocate the next observer id
    pub fn next_observer_id(&self) -> ObserverId {
        ObserverId::new(self.next_observer_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Hold while rebasing and publishing a changeset
    ///
    /// Acquiring a top-level changeset takes it too, so a new snapshot never
    /// observes half of an apply.
    pub(crate) fn commit_lock(&self) -> MutexGuard<'_, ()> {
        self.commit.lock()
    }

    // === Settings ===

    /// Logging switches
    pub fn logging(&self) -> LoggingOptions {
        self.logging.read().clone()
    }

    /// Replace logging switches
    pub fn set_logging(&self, options: LoggingOptions) {
        *self.logging.write() = options;
    }

    /// Profiling thresholds
    pub fn profiling(&self) -> ProfilingOptions {
        self.profiling.read().clone()
    }

    /// Replace profiling thresholds
    pub fn set_profiling(&self, options: ProfilingOptions) {
        *self.profiling.write() = options;
    }

    /// Content equality used by rebase
    pub fn content_equality(&self) -> ContentEquality {
        *self.equality.read()
    }

    /// Replace the content equality used by rebase
    pub fn set_content_equality(&self, equality: ContentEquality) {
        *self.equality.write() = equality;
    }

    /// Bound on reaction rounds triggered by one apply
    pub fn max_reaction_rounds(&self) -> usize {
        self.max_reaction_rounds.load(Ordering::Relaxed)
    }

    /// Replace the reaction round bound
    pub fn set_max_reaction_rounds(&self, rounds: usize) {
        self.max_reaction_rounds.store(rounds.max(1), Ordering::Relaxed);
    }

    pub(crate) fn log_transactions(&self) -> bool {
        let logging = self.logging.read();
        logging.enabled && logging.transactions
    }

    pub(crate) fn log_changes(&self) -> bool {
        let logging = self.logging.read();
        logging.enabled && logging.changes
    }

    pub(crate) fn log_reactions(&self) -> bool {
        let logging = self.logging.read();
        logging.enabled && logging.reactions
    }

    // === Pending queue ===

    pub(crate) fn register_pending(&self, changeset: Arc<Changeset>) {
        self.pending.lock().push(changeset);
    }

    /// Number of changesets still pending
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Collect the finished prefix of the pending queue
    ///
    /// Proceeds only when the oldest pending changeset is finished. Returns
    /// the number of changesets collected.
    pub fn collect_garbage(&self) -> usize {
        let collected: Vec<Arc<Changeset>> = {
            let mut pending = self.pending.lock();
            pending.sort_by_key(|c| c.timestamp());
            let prefix = pending.iter().take_while(|c| c.is_finished()).count();
            pending.drain(..prefix).collect()
        };
        if collected.is_empty() {
            return 0;
        }
        let mut unlinked = 0u64;
        for changeset in &collected {
            unlinked += changeset.unlink_history() as u64;
        }
        let before = self.collected.fetch_add(collected.len() as u64, Ordering::Relaxed);
        self.unlinked.fetch_add(unlinked, Ordering::Relaxed);

        let log_gc = {
            let logging = self.logging.read();
            logging.enabled && logging.gc
        };
        if log_gc {
            debug!(
                collected = collected.len(),
                unlinked = unlinked,
                oldest = ?collected.first().map(|c| c.id()),
                "collected changeset history"
            );
        }
        let profiling = self.profiling.read().clone();
        let interval = profiling.garbage_collection_summary_interval;
        if profiling.enabled && interval > 0 {
            let after = before + collected.len() as u64;
            if before / interval != after / interval {
                info!(
                    collected_changesets = after,
                    unlinked_versions = self.unlinked.load(Ordering::Relaxed),
                    pending = self.pending_count(),
                    "garbage collection summary"
                );
            }
        }
        collected.len()
    }

    /// Garbage collection counters
    pub fn gc_stats(&self) -> GcStats {
        GcStats {
            collected_changesets: self.collected.load(Ordering::Relaxed),
            unlinked_versions: self.unlinked.load(Ordering::Relaxed),
            pending: self.pending_count(),
        }
    }
}

impl std::fmt::Debug for ChangesetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangesetManager")
            .field("stamp", &self.current_stamp())
            .field("pending", &self.pending_count())
            .finish()
    }
}
