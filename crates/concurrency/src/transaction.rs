//! Transactions
//!
//! A transaction owns one changeset and counts the calls running under it.
//! It finishes once it is sealed and no call is pending: the changeset is
//! rebased and then applied, merged into the outer changeset (nested
//! transactions) or discarded (canceled or conflicting).
//!
//! ## States
//!
//! ```text
//! Open ──seal──> Sealed ──pending == 0──┬──> Applied
//!   │                                    └──> Canceled
//!   └──cancel──> Canceled (finishes once sealed and idle)
//! ```
//!
//! ## Acquisition
//!
//! | Isolation | Outer present and open | Otherwise |
//! |---|---|---|
//! | JoinToCurrentTransaction | join the outer | new top-level |
//! | JoinAsNestedTransaction | child of the outer | new top-level |
//! | Disjoin* | new top-level | new top-level |
//!
//! An outer transaction created with `DisjoinFromOuterAndInnerTransaction`
//! cannot be joined.

use crate::changeset::Changeset;
use crate::context::{self, Context, WithContext};
use crate::hooks::{JournalSink, Monitor, Worker};
use crate::manager::ChangesetManager;
use crate::observer;
use parking_lot::Mutex;
use ripple_core::{ChangesetId, Error, Isolation, Result};
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

// ============================================================================
// Options and status
// ============================================================================

/// How a transaction is started and what it reports to
#[derive(Clone, Default)]
pub struct TransactionOptions {
    /// Name used in logs and errors
    pub hint: String,
    /// Relation to the transaction already in context
    pub isolation: Isolation,
    /// Told when async work starts and stops
    pub indicator: Option<Arc<dyn Monitor>>,
    /// Receives the changes once applied
    pub journal: Option<Arc<dyn JournalSink>>,
}

impl TransactionOptions {
    /// Options with a hint and default isolation
    pub fn new(hint: impl Into<String>) -> Self {
        Self {
            hint: hint.into(),
            ..Self::default()
        }
    }

    /// Set the isolation
    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Set the indicator
    pub fn indicator(mut self, indicator: Arc<dyn Monitor>) -> Self {
        self.indicator = Some(indicator);
        self
    }

    /// Set the journal
    pub fn journal(mut self, journal: Arc<dyn JournalSink>) -> Self {
        self.journal = Some(journal);
        self
    }
}

impl fmt::Debug for TransactionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionOptions")
            .field("hint", &self.hint)
            .field("isolation", &self.isolation)
            .field("indicator", &self.indicator.is_some())
            .field("journal", &self.journal.is_some())
            .finish()
    }
}

/// Transaction state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Accepting calls
    Open,
    /// No new calls; finishes when pending calls return
    Sealed,
    /// Changes are visible (or merged into the outer transaction)
    Applied,
    /// Changes were dropped
    Canceled {
        /// Cancellation reason
        reason: String,
    },
}

impl TransactionStatus {
    /// Whether the transaction reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Applied | TransactionStatus::Canceled { .. }
        )
    }
}

struct TransactionState {
    pending: usize,
    sealed: bool,
    finished: bool,
    status: TransactionStatus,
    canceled: Option<Error>,
    restart_after: Option<Arc<Transaction>>,
    outcome: Option<Result<()>>,
}

// ============================================================================
// Transaction
// ============================================================================

/// One unit of work over one changeset
pub struct Transaction {
    changeset: Arc<Changeset>,
    outer: Option<Arc<Transaction>>,
    options: TransactionOptions,
    state: Mutex<TransactionState>,
    done: watch::Sender<bool>,
    started: Instant,
}

impl Transaction {
    fn new(
        manager: &Arc<ChangesetManager>,
        options: TransactionOptions,
        outer: Option<Arc<Transaction>>,
    ) -> Arc<Self> {
        let parent = outer.as_ref().map(|o| o.changeset.clone());
        let changeset = Changeset::acquire(manager, options.hint.clone(), parent);
        if let Some(outer) = &outer {
            outer.state.lock().pending += 1;
        }
        let (done, _) = watch::channel(false);
        let transaction = Arc::new(Self {
            changeset,
            outer,
            options,
            state: Mutex::new(TransactionState {
                pending: 0,
                sealed: false,
                finished: false,
                status: TransactionStatus::Open,
                canceled: None,
                restart_after: None,
                outcome: None,
            }),
            done,
            started: Instant::now(),
        });
        if manager.log_transactions() {
            debug!(
                txn_id = %transaction.id(),
                hint = %transaction.hint(),
                stamp = transaction.changeset.timestamp(),
                nested = transaction.outer.is_some(),
                "transaction acquired"
            );
        }
        transaction
    }

    /// Create a standalone top-level transaction for manual control
    ///
    /// Use [`Transaction::run`] to execute code in it, then
    /// [`Transaction::apply`] (or [`Transaction::seal`]) to finish it.
    pub fn create(manager: &Arc<ChangesetManager>, options: TransactionOptions) -> Arc<Self> {
        Transaction::new(manager, options, None)
    }

    /// Join or start a transaction according to `options.isolation`
    ///
    /// Returns the transaction and whether it was joined.
    pub fn acquire(
        manager: &Arc<ChangesetManager>,
        options: TransactionOptions,
    ) -> (Arc<Self>, bool) {
        // a sealed outer, or one disjoined both ways, is neither joined nor nested
        let outer = context::current_transaction().filter(|o| {
            Arc::ptr_eq(o.manager(), manager) && !o.is_sealed() && !o.disjoins_inner()
        });
        match outer {
            Some(outer) if !options.isolation.is_disjoint() => {
                if options.isolation == Isolation::JoinAsNestedTransaction {
                    (Transaction::new(manager, options, Some(outer)), false)
                } else {
                    (outer, true)
                }
            }
            _ => (Transaction::new(manager, options, None), false),
        }
    }

    /// Run `f` in a joined or new transaction and finish the new one
    ///
    /// # Errors
    ///
    /// The error of `f`, or the conflict or cancellation that kept the
    /// transaction from applying.
    pub fn run_with<T>(
        manager: &Arc<ChangesetManager>,
        options: TransactionOptions,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let (transaction, joined) = Transaction::acquire(manager, options);
        let result = transaction.run(f);
        if joined {
            return result;
        }
        transaction.seal();
        let value = result?;
        match transaction.outcome() {
            Some(Err(err)) => Err(err),
            _ => Ok(value),
        }
    }

    /// [`Transaction::run_with`] for async bodies
    ///
    /// The transaction is sealed when the body's future completes and the
    /// call resolves once it has finished. When it was canceled with a
    /// restart target, `f` is retried in a fresh transaction after that
    /// target finishes.
    pub async fn run_async<T, F, Fut>(
        manager: &Arc<ChangesetManager>,
        options: TransactionOptions,
        f: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let base_hint = options.hint.clone();
        let mut options = options;
        loop {
            let (transaction, joined) = Transaction::acquire(manager, options.clone());
            if joined {
                return transaction.run_future(&f).await;
            }
            let worker = transaction.worker();
            if let Some(indicator) = &options.indicator {
                indicator.enter(&worker);
            }
            let result = transaction.run_future(&f).await;
            transaction.seal();
            let outcome = transaction.when_finished().await;
            if let Some(indicator) = &options.indicator {
                indicator.leave(&worker);
            }
            transaction.warn_if_slow();

            let error = match (result, outcome) {
                (Ok(value), Ok(())) => return Ok(value),
                (Err(err), _) | (Ok(_), Err(err)) => err,
            };
            let Some(previous) = transaction.restart_after() else {
                return Err(error);
            };
            let _ = previous.when_finished().await;
            options.hint = format!("{base_hint} - restart after {previous}");
            if manager.log_transactions() {
                debug!(
                    txn_id = %transaction.id(),
                    hint = %options.hint,
                    reason = %error,
                    "restarting transaction"
                );
            }
        }
    }

    // === Accessors ===

    /// Changeset id
    pub fn id(&self) -> ChangesetId {
        self.changeset.id()
    }

    /// Hint
    pub fn hint(&self) -> &str {
        self.changeset.hint()
    }

    /// Changeset holding this transaction's versions
    pub fn changeset(&self) -> &Arc<Changeset> {
        &self.changeset
    }

    /// Manager the transaction belongs to
    pub fn manager(&self) -> &Arc<ChangesetManager> {
        self.changeset.manager()
    }

    /// Outer transaction of a nested one
    pub fn outer(&self) -> Option<&Arc<Transaction>> {
        self.outer.as_ref()
    }

    /// Options it was created with
    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// Monitor view of this transaction
    pub fn worker(&self) -> Worker {
        Worker {
            id: self.id(),
            hint: self.hint().to_string(),
        }
    }

    /// Current state
    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status.clone()
    }

    /// Whether new calls are rejected
    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Whether applied or discarded
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Whether canceled (its changes will be dropped)
    pub fn is_canceled(&self) -> bool {
        self.state.lock().canceled.is_some()
    }

    /// Cancellation reason
    pub fn error(&self) -> Option<Error> {
        self.state.lock().canceled.clone()
    }

    /// Transaction to wait for before retrying after cancellation
    pub fn restart_after(&self) -> Option<Arc<Transaction>> {
        self.state.lock().restart_after.clone()
    }

    /// Number of calls still running under this transaction
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    /// Result of finishing, `None` until finished
    pub fn outcome(&self) -> Option<Result<()>> {
        self.state.lock().outcome.clone()
    }

    /// Time since the transaction was acquired
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn disjoins_inner(&self) -> bool {
        self.options.isolation == Isolation::DisjoinFromOuterAndInnerTransaction
    }

    /// Let rebase overwrite concurrent changes instead of reporting conflicts
    pub fn set_ignore_conflicts(&self) {
        self.changeset.set_ignore_conflicts(true);
    }

    // === Running ===

    fn begin(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(Error::Sealed {
                transaction: self.to_string(),
            });
        }
        state.pending += 1;
        Ok(context::current().is_inspection())
    }

    fn end(self: &Arc<Self>, error: Option<&Error>, inspecting: bool) {
        if let Some(err) = error {
            if !inspecting {
                self.cancel(err.clone(), None);
            }
        }
        let finish = {
            let mut state = self.state.lock();
            state.pending = state.pending.saturating_sub(1);
            state.sealed && state.pending == 0 && !state.finished
        };
        if finish {
            self.finish();
        }
    }

    fn context(self: &Arc<Self>, inspecting: bool) -> Context {
        context::current().with_transaction(self.clone(), inspecting)
    }

    /// Run `f` with this transaction current
    ///
    /// An error returned by `f` cancels the transaction (unless the caller is
    /// inspecting) and is passed through.
    ///
    /// # Errors
    ///
    /// `Sealed` when the transaction no longer accepts calls.
    pub fn run<T>(self: &Arc<Self>, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let inspecting = self.begin()?;
        let started = Instant::now();
        let result = context::with(self.context(inspecting), f);
        self.warn_if_blocking(started.elapsed());
        self.end(result.as_ref().err(), inspecting);
        result
    }

    async fn run_future<T, F, Fut>(self: &Arc<Self>, f: &F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let inspecting = self.begin()?;
        let cx = self.context(inspecting);
        let future = context::with(cx.clone(), f);
        let result = WithContext::new(cx, future).await;
        self.end(result.as_ref().err(), inspecting);
        result
    }

    /// Run `f` against this transaction's changeset with writes rejected
    pub fn inspect<T>(self: &Arc<Self>, f: impl FnOnce() -> Result<T>) -> Result<T> {
        context::with(context::current().with_transaction(self.clone(), true), f)
    }

    fn warn_if_blocking(&self, elapsed: Duration) {
        let profiling = self.manager().profiling();
        if profiling.enabled
            && elapsed > Duration::from_millis(profiling.main_thread_blocking_warning_threshold_ms)
        {
            warn!(
                txn_id = %self.id(),
                hint = %self.hint(),
                elapsed_ms = elapsed.as_millis() as u64,
                "transaction body blocked the thread"
            );
        }
    }

    fn warn_if_slow(&self) {
        let profiling = self.manager().profiling();
        let elapsed = self.elapsed();
        if profiling.enabled
            && elapsed > Duration::from_millis(profiling.async_action_duration_warning_threshold_ms)
        {
            warn!(
                txn_id = %self.id(),
                hint = %self.hint(),
                elapsed_ms = elapsed.as_millis() as u64,
                "async transaction took long"
            );
        }
    }

    // === Completion ===

    /// Reject new calls; finishes as soon as no call is pending
    pub fn seal(self: &Arc<Self>) {
        let finish = {
            let mut state = self.state.lock();
            if state.sealed {
                return;
            }
            state.sealed = true;
            if state.status == TransactionStatus::Open {
                state.status = TransactionStatus::Sealed;
            }
            state.pending == 0 && !state.finished
        };
        if finish {
            self.finish();
        }
    }

    /// Seal and finish now
    ///
    /// # Errors
    ///
    /// `Misuse` while calls are pending, the cancellation reason when
    /// canceled, `Conflict` when rebase found conflicts.
    pub fn apply(self: &Arc<Self>) -> Result<()> {
        {
            let state = self.state.lock();
            if state.pending > 0 {
                return Err(Error::misuse(format!(
                    "cannot apply {} while {} call(s) are pending",
                    self, state.pending
                )));
            }
            if let Some(err) = &state.canceled {
                return Err(err.clone());
            }
        }
        self.seal();
        self.outcome()
            .unwrap_or_else(|| Err(Error::misuse(format!("{self} did not finish"))))
    }

    /// Cancel with `error`, optionally retrying after `restart_after`
    ///
    /// Provisional subscriptions are revoked at once so obsolete reactions
    /// of this transaction never run. Returns `false` when already canceled
    /// or finished.
    pub fn cancel(self: &Arc<Self>, error: Error, restart_after: Option<Arc<Transaction>>) -> bool {
        let finish = {
            let mut state = self.state.lock();
            if state.finished || state.canceled.is_some() {
                return false;
            }
            state.status = TransactionStatus::Canceled {
                reason: error.to_string(),
            };
            state.canceled = Some(error);
            state.restart_after = restart_after;
            state.sealed && state.pending == 0
        };
        self.changeset.revoke_subscriptions();
        if self.manager().log_transactions() {
            debug!(
                txn_id = %self.id(),
                hint = %self.hint(),
                restart_after = ?self.restart_after().map(|t| t.id()),
                "transaction canceled"
            );
        }
        if finish {
            self.finish();
        }
        true
    }

    fn finish(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
        }
        self.changeset.seal();
        let manager = self.manager().clone();
        let canceled = self.error();
        let mut reactions = Vec::new();
        let mut patch = None;
        let commit = manager.commit_lock();
        let outcome = match canceled {
            Some(err) => {
                self.changeset.discard();
                Err(err)
            }
            None => {
                let conflicts = self.changeset.rebase();
                if !conflicts.is_empty() {
                    let err = Error::Conflict {
                        transaction: self.to_string(),
                        conflicts,
                    };
                    {
                        let mut state = self.state.lock();
                        state.status = TransactionStatus::Canceled {
                            reason: err.to_string(),
                        };
                        state.canceled = Some(err.clone());
                    }
                    if manager.log_transactions() {
                        debug!(txn_id = %self.id(), hint = %self.hint(), error = %err, "transaction conflicts");
                    }
                    self.changeset.discard();
                    Err(err)
                } else if self.outer.is_some() {
                    self.changeset.migrate_into_parent();
                    Ok(())
                } else {
                    reactions = self.changeset.apply();
                    if self.options.journal.is_some() {
                        patch = Some(self.changeset.patch_set());
                    }
                    Ok(())
                }
            }
        };
        drop(commit);
        if let (Some(journal), Some(patch)) = (&self.options.journal, patch) {
            if !patch.is_empty() {
                journal.edited(patch);
            }
        }
        {
            let mut state = self.state.lock();
            if outcome.is_ok() {
                state.status = TransactionStatus::Applied;
            }
            state.outcome = Some(outcome);
        }
        if manager.log_transactions() {
            debug!(
                txn_id = %self.id(),
                hint = %self.hint(),
                status = ?self.status(),
                elapsed_us = self.elapsed().as_micros() as u64,
                "transaction finished"
            );
        }
        manager.collect_garbage();
        self.done.send_replace(true);
        if let Some(outer) = &self.outer {
            outer.end_nested();
        }
        observer::run_reactions(&manager, reactions);
    }

    fn end_nested(self: &Arc<Self>) {
        let finish = {
            let mut state = self.state.lock();
            state.pending = state.pending.saturating_sub(1);
            state.sealed && state.pending == 0 && !state.finished
        };
        if finish {
            self.finish();
        }
    }

    /// Wait until the transaction is applied or discarded
    ///
    /// # Errors
    ///
    /// The cancellation reason or conflict that kept it from applying.
    pub async fn when_finished(&self) -> Result<()> {
        let mut done = self.done.subscribe();
        let _ = done.wait_for(|finished| *finished).await;
        self.outcome().unwrap_or(Ok(()))
    }

    /// Transaction of the running code
    pub fn current() -> Option<Arc<Transaction>> {
        context::current_transaction()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.changeset, f)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Transaction")
            .field("id", &self.changeset.id())
            .field("hint", &self.changeset.hint())
            .field("status", &state.status)
            .field("pending", &state.pending)
            .field("nested", &self.outer.is_some())
            .finish()
    }
}

// ============================================================================
// Detached code and frame budget
// ============================================================================

/// Run `f` outside of any transaction, recorder or inspection
pub fn outside<T>(f: impl FnOnce() -> T) -> T {
    context::with(Context::default(), f)
}

thread_local! {
    static FRAME: Cell<(Option<Instant>, usize)> = Cell::new((None, 0));
}

/// Whether the current slice of cooperative work is over
///
/// Checks the clock every `every_n` calls and reports `true` once
/// `time_limit` has passed since the frame started.
pub fn is_frame_over(every_n: usize, time_limit: Duration) -> bool {
    FRAME.with(|frame| {
        let (start, count) = frame.get();
        let start = start.unwrap_or_else(Instant::now);
        let count = count + 1;
        frame.set((Some(start), count));
        count % every_n.max(1) == 0 && start.elapsed() >= time_limit
    })
}

/// Yield to the runtime and start a new frame
pub async fn request_next_frame(sleep: Duration) {
    if sleep.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(sleep).await;
    }
    FRAME.with(|frame| frame.set((Some(Instant::now()), 0)));
}
