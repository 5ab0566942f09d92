//! Operations
//!
//! An `Operation` wraps one member of one object together with its
//! configuration. Invoking it runs the body the way its kind asks for:
//!
//! | Kind | Transaction | Reads recorded | Re-run |
//! |---|---|---|---|
//! | Plain | none | no | never |
//! | Atomic | joined or started per isolation | no | never |
//! | Reactive | joined or started per isolation | yes | when obsolete, per throttling |
//! | Cached | the caller's, writes forbidden | yes | lazily, on the next call |
//!
//! ## Reentrance
//!
//! Only async invocations stay in flight across calls. A new call that finds
//! one in flight follows the operation's `Reentrance` policy.
//! `OverwritePrevious` lets the in-flight calls apply first and then applies
//! the new one ignoring conflicts. Synchronous callers cannot wait, so
//! `WaitAndRestart` and `OverwritePrevious` reject them like
//! `PreventWithError`, and `CancelAndWaitPrevious` behaves like
//! `CancelPrevious`.

use parking_lot::{Mutex, RwLock};
use ripple_concurrency::context::{self, WithContext};
use ripple_concurrency::{
    ChangesetManager, JournalSink, Monitor, ObsoleteCause, Observer, Reaction, Recorder,
    Transaction, TransactionOptions,
};
use ripple_core::{
    Error, Isolation, Kind, LoggingOptions, Reentrance, Result, Throttling, Value,
};
use smallvec::SmallVec;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Boxed future returned by async operation bodies
pub type BoxResultFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'static>>;

type SyncBody = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;
type AsyncBody = Arc<dyn Fn(Vec<Value>) -> BoxResultFuture + Send + Sync>;
type Busy = SmallVec<[Arc<Transaction>; 1]>;

enum Body {
    Sync(SyncBody),
    Async(AsyncBody),
}

// ============================================================================
// Options
// ============================================================================

/// Configuration of an operation
#[derive(Clone)]
pub struct OperationOptions {
    /// What invoking it does
    pub kind: Kind,
    /// Relation of its transaction to the caller's
    pub isolation: Isolation,
    /// Policy for calls arriving while an async call is in flight
    pub reentrance: Reentrance,
    /// When an obsolete reactive operation runs again
    pub throttling: Throttling,
    /// Position among reactions of the same round (ascending)
    pub order: i32,
    /// Told when its async transactions start and stop
    pub indicator: Option<Arc<dyn Monitor>>,
    /// Receives the changes its transactions apply
    pub journal: Option<Arc<dyn JournalSink>>,
    /// Overrides the system logging options for this operation
    pub logging: Option<LoggingOptions>,
}

impl OperationOptions {
    /// Defaults for `kind`
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            isolation: Isolation::default(),
            reentrance: Reentrance::default(),
            throttling: Throttling::default(),
            order: 0,
            indicator: None,
            journal: None,
            logging: None,
        }
    }

    /// Plain call
    pub fn plain() -> Self {
        Self::new(Kind::Plain)
    }

    /// Transactional unit of work
    pub fn atomic() -> Self {
        Self::new(Kind::Atomic)
    }

    /// Self-re-running reaction
    pub fn reactive() -> Self {
        Self::new(Kind::Reactive)
    }

    /// Memoized side-effect free computation
    pub fn cached() -> Self {
        Self::new(Kind::Cached)
    }

    /// Set the isolation
    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Set the reentrance policy
    pub fn reentrance(mut self, reentrance: Reentrance) -> Self {
        self.reentrance = reentrance;
        self
    }

    /// Set the throttling
    pub fn throttling(mut self, throttling: Throttling) -> Self {
        self.throttling = throttling;
        self
    }

    /// Set the reaction order
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
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

    /// Set operation-specific logging
    pub fn logging(mut self, logging: LoggingOptions) -> Self {
        self.logging = Some(logging);
        self
    }
}

impl fmt::Debug for OperationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationOptions")
            .field("kind", &self.kind)
            .field("isolation", &self.isolation)
            .field("reentrance", &self.reentrance)
            .field("throttling", &self.throttling)
            .field("order", &self.order)
            .field("indicator", &self.indicator.is_some())
            .field("journal", &self.journal.is_some())
            .field("logging", &self.logging)
            .finish()
    }
}

// ============================================================================
// Operation
// ============================================================================

/// One member of one object, wrapped per its options
pub struct Operation {
    me: Weak<Operation>,
    observer: Arc<Observer>,
    manager: Arc<ChangesetManager>,
    options: RwLock<OperationOptions>,
    body: Body,
    in_flight: Mutex<Busy>,
    delayed: AtomicBool,
    runs: AtomicU64,
}

impl Operation {
    fn with_body(
        manager: &Arc<ChangesetManager>,
        hint: String,
        options: OperationOptions,
        body: Body,
    ) -> Arc<Self> {
        let observer = Observer::new(manager.next_observer_id(), hint, options.kind, options.order);
        Arc::new_cyclic(|me: &Weak<Operation>| {
            let reaction: Weak<dyn Reaction> = me.clone();
            observer.set_reaction(reaction);
            Operation {
                me: me.clone(),
                observer,
                manager: Arc::clone(manager),
                options: RwLock::new(options),
                body,
                in_flight: Mutex::new(Busy::new()),
                delayed: AtomicBool::new(false),
                runs: AtomicU64::new(0),
            }
        })
    }

    /// Wrap a synchronous body
    pub fn new<F>(
        manager: &Arc<ChangesetManager>,
        hint: impl Into<String>,
        options: OperationOptions,
        body: F,
    ) -> Arc<Self>
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Operation::with_body(manager, hint.into(), options, Body::Sync(Arc::new(body)))
    }

    /// Wrap an async body
    ///
    /// # Errors
    ///
    /// `Misuse` for cached operations, which must be synchronous.
    pub fn new_async<F, Fut>(
        manager: &Arc<ChangesetManager>,
        hint: impl Into<String>,
        options: OperationOptions,
        body: F,
    ) -> Result<Arc<Self>>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let hint = hint.into();
        if options.kind == Kind::Cached {
            return Err(Error::misuse(format!(
                "cached operation {hint} cannot have an async body"
            )));
        }
        let body: AsyncBody = Arc::new(move |args| Box::pin(body(args)));
        Ok(Operation::with_body(manager, hint, options, Body::Async(body)))
    }

    // === Accessors ===

    /// Operation name
    pub fn hint(&self) -> &str {
        self.observer.hint()
    }

    /// Operation kind
    pub fn kind(&self) -> Kind {
        self.observer.kind()
    }

    /// Observer tracking its launches
    pub fn observer(&self) -> &Arc<Observer> {
        &self.observer
    }

    /// Current options
    pub fn options(&self) -> OperationOptions {
        self.options.read().clone()
    }

    /// Change the options in place
    ///
    /// # Errors
    ///
    /// `Misuse` when `f` changes the kind.
    pub fn configure(&self, f: impl FnOnce(&mut OperationOptions)) -> Result<()> {
        let mut options = self.options.write();
        let mut updated = options.clone();
        f(&mut updated);
        if updated.kind != self.observer.kind() {
            return Err(Error::misuse(format!(
                "cannot change the kind of {} from {:?} to {:?}",
                self.hint(),
                self.observer.kind(),
                updated.kind
            )));
        }
        self.observer.set_order(updated.order);
        *options = updated;
        Ok(())
    }

    /// Whether the body is async
    pub fn is_async(&self) -> bool {
        matches!(self.body, Body::Async(_))
    }

    /// How many times the body has been executed
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Whether an async invocation is in flight
    pub fn is_busy(&self) -> bool {
        !self.busy().is_empty()
    }

    /// Whether the applied result is still valid
    pub fn is_up_to_date(&self) -> bool {
        self.observer.is_up_to_date()
    }

    /// Result of the latest applied invocation
    pub fn last_result(&self) -> Option<Result<Value>> {
        self.observer.applied_launch().map(|l| l.result())
    }

    /// Why the latest applied invocation ran, `None` for a first run
    pub fn last_cause(&self) -> Option<ObsoleteCause> {
        self.observer
            .applied_launch()
            .and_then(|l| l.cause().cloned())
    }

    /// Why the applied result is obsolete, `None` while it is valid
    pub fn obsolete_cause(&self) -> Option<ObsoleteCause> {
        self.observer
            .applied_launch()
            .and_then(|l| l.obsolete_cause())
    }

    /// Forget the applied result and its dependencies
    pub fn reset(&self) {
        self.observer.reset();
    }

    fn logging(&self) -> LoggingOptions {
        self.options
            .read()
            .logging
            .clone()
            .unwrap_or_else(|| self.manager.logging())
    }

    fn log_operations(&self) -> bool {
        let logging = self.logging();
        logging.enabled && logging.operations
    }

    fn log_reactions(&self) -> bool {
        let logging = self.logging();
        logging.enabled && logging.reactions
    }

    fn usage_threshold(&self) -> Option<usize> {
        let profiling = self.manager.profiling();
        profiling
            .enabled
            .then_some(profiling.repetitive_usage_warning_threshold)
    }

    fn transaction_options(&self, options: &OperationOptions) -> TransactionOptions {
        TransactionOptions {
            hint: self.hint().to_string(),
            isolation: options.isolation,
            indicator: options.indicator.clone(),
            journal: options.journal.clone(),
        }
    }

    // === Invocation ===

    /// Invoke with `args`
    ///
    /// # Errors
    ///
    /// The body's error, the conflict or cancellation of its transaction,
    /// `Reentrance` per policy, and `Misuse` for async bodies.
    pub fn invoke(&self, args: &[Value]) -> Result<Value> {
        let options = self.options();
        match options.kind {
            Kind::Plain => self.call(args),
            Kind::Cached => self.invoke_cached(args),
            Kind::Atomic | Kind::Reactive => {
                if self.is_async() {
                    return Err(self.async_misuse());
                }
                self.check_reentrance(&options)?;
                self.run_in_transaction(args, &options)
            }
        }
    }

    /// [`Operation::invoke`] for async bodies (sync bodies work too)
    pub async fn invoke_async(self: &Arc<Self>, args: Vec<Value>) -> Result<Value> {
        let options = self.options();
        match options.kind {
            Kind::Plain => self.start_body(args).await,
            Kind::Cached => self.invoke(&args),
            Kind::Atomic | Kind::Reactive => {
                let overwritten = self.await_reentrance(&options).await?;
                self.run_in_transaction_async(args, &options, overwritten)
                    .await
            }
        }
    }

    fn call(&self, args: &[Value]) -> Result<Value> {
        match &self.body {
            Body::Sync(body) => {
                self.runs.fetch_add(1, Ordering::Relaxed);
                if self.log_operations() {
                    debug!(operation = %self.hint(), args = ?args, "operation started");
                }
                body(args)
            }
            Body::Async(_) => Err(self.async_misuse()),
        }
    }

    fn async_misuse(&self) -> Error {
        Error::misuse(format!(
            "{} is async and must be invoked with invoke_async",
            self.hint()
        ))
    }

    fn start_body(&self, args: Vec<Value>) -> BoxResultFuture {
        match &self.body {
            Body::Sync(_) => Box::pin(std::future::ready(self.call(&args))),
            Body::Async(body) => {
                self.runs.fetch_add(1, Ordering::Relaxed);
                if self.log_operations() {
                    debug!(operation = %self.hint(), args = ?args, "async operation started");
                }
                body(args)
            }
        }
    }

    fn invoke_cached(&self, args: &[Value]) -> Result<Value> {
        let context = context::current();
        let changeset = context.transaction().map(|t| t.changeset().clone());
        let existing = changeset
            .as_ref()
            .and_then(|c| c.launch_for(self.observer.id()))
            .or_else(|| self.observer.applied_launch());
        if let Some(launch) = &existing {
            if launch.is_valid_for(changeset.as_deref(), args) {
                if let Some(outer) = context.recorder() {
                    outer.record_launch(launch);
                }
                if self.log_operations() {
                    debug!(operation = %self.hint(), "cached result reused");
                }
                return launch.result();
            }
        }

        let cause = existing.and_then(|l| l.obsolete_cause());
        let recorder = Recorder::new(self.observer.clone(), cause, self.usage_threshold());
        let inner = context
            .clone()
            .with_recorder(recorder.clone())
            .without_side_effects(self.hint());
        let result = context::with(inner, || self.call(args));
        let launch = recorder.complete(changeset.as_ref(), args.to_vec(), result.clone());
        if let Some(outer) = context.recorder() {
            outer.record_launch(&launch);
        }
        result
    }

    fn run_in_transaction(
        &self,
        args: &[Value],
        options: &OperationOptions,
    ) -> Result<Value> {
        let cause = self.obsolete_cause();
        let (transaction, joined) =
            Transaction::acquire(&self.manager, self.transaction_options(options));
        let observing = options.kind.is_observing();
        let result = transaction.run(|| {
            if !observing {
                return self.call(args);
            }
            let recorder = Recorder::new(self.observer.clone(), cause, self.usage_threshold());
            let cx = context::current().with_recorder(recorder.clone());
            let result = context::with(cx, || self.call(args));
            recorder.complete(Some(transaction.changeset()), args.to_vec(), result.clone());
            result
        });
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

    async fn run_in_transaction_async(
        &self,
        args: Vec<Value>,
        options: &OperationOptions,
        overwritten: Busy,
    ) -> Result<Value> {
        let caller = Transaction::current().map(|t| t.id());
        let cause = self.obsolete_cause();
        let observing = options.kind.is_observing();
        let attempt = || {
            let transaction = Transaction::current();
            if let Some(own) = transaction.as_ref().filter(|t| Some(t.id()) != caller) {
                if !overwritten.is_empty() {
                    own.set_ignore_conflicts();
                }
                self.in_flight.lock().push(own.clone());
            }
            let recorder = observing.then(|| {
                Recorder::new(self.observer.clone(), cause.clone(), self.usage_threshold())
            });
            let mut cx = context::current();
            if let Some(recorder) = &recorder {
                cx = cx.with_recorder(recorder.clone());
            }
            let body = context::with(cx.clone(), || self.start_body(args.clone()));
            let changeset = transaction.map(|t| t.changeset().clone());
            let args = args.clone();
            let overwritten = overwritten.clone();
            async move {
                let result = WithContext::new(cx, body).await;
                if let Some(recorder) = recorder {
                    recorder.complete(changeset.as_ref(), args, result.clone());
                }
                // apply only after the overwritten calls are done
                for previous in &overwritten {
                    let _ = previous.when_finished().await;
                }
                result
            }
        };
        let result =
            Transaction::run_async(&self.manager, self.transaction_options(options), attempt).await;
        self.in_flight.lock().retain(|t| !t.is_finished());
        result
    }

    // === Reentrance ===

    fn busy(&self) -> Busy {
        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|t| !t.is_finished());
        in_flight.clone()
    }

    fn reentrance_error(&self, busy_with: &Transaction) -> Error {
        Error::Reentrance {
            operation: self.hint().to_string(),
            busy_with: busy_with.to_string(),
        }
    }

    fn cancel_all(&self, busy: &[Arc<Transaction>]) {
        for transaction in busy {
            let reason = format!("{} was invoked again", self.hint());
            let error = Error::Canceled {
                transaction: transaction.to_string(),
                reason,
            };
            if transaction.cancel(error, None) && self.log_operations() {
                debug!(operation = %self.hint(), txn_id = %transaction.id(), "previous invocation canceled");
            }
        }
    }

    /// Synchronous calls cannot wait, so the waiting policies reject them
    fn check_reentrance(&self, options: &OperationOptions) -> Result<()> {
        let busy = self.busy();
        let Some(first) = busy.first() else {
            return Ok(());
        };
        match options.reentrance {
            Reentrance::PreventWithError
            | Reentrance::WaitAndRestart
            | Reentrance::OverwritePrevious => Err(self.reentrance_error(first)),
            Reentrance::CancelPrevious | Reentrance::CancelAndWaitPrevious => {
                self.cancel_all(&busy);
                Ok(())
            }
            Reentrance::RunSideBySide => Ok(()),
        }
    }

    /// Returns the in-flight calls the new one overwrites
    async fn await_reentrance(&self, options: &OperationOptions) -> Result<Busy> {
        loop {
            let busy = self.busy();
            let Some(first) = busy.first().cloned() else {
                return Ok(Busy::new());
            };
            match options.reentrance {
                Reentrance::PreventWithError => return Err(self.reentrance_error(&first)),
                Reentrance::WaitAndRestart => {
                    let _ = first.when_finished().await;
                }
                Reentrance::CancelPrevious => {
                    self.cancel_all(&busy);
                    return Ok(Busy::new());
                }
                Reentrance::CancelAndWaitPrevious => {
                    self.cancel_all(&busy);
                    for transaction in &busy {
                        let _ = transaction.when_finished().await;
                    }
                }
                Reentrance::OverwritePrevious => return Ok(busy),
                Reentrance::RunSideBySide => return Ok(Busy::new()),
            }
        }
    }

    // === Reactions ===

    fn reaction_args(&self) -> Option<Vec<Value>> {
        if self.observer.is_up_to_date() {
            return None;
        }
        Some(
            self.observer
                .applied_launch()
                .map(|l| l.args().to_vec())
                .unwrap_or_default(),
        )
    }

    fn report_failure(&self, error: &Error) {
        warn!(operation = %self.hint(), error = %error, "reaction failed");
    }

    fn rerun(self: &Arc<Self>) {
        let Some(args) = self.reaction_args() else {
            return;
        };
        if self.log_reactions() {
            debug!(operation = %self.hint(), cause = ?self.obsolete_cause().map(|c| c.to_string()), "reaction started");
        }
        if !self.is_async() {
            if let Err(err) = self.invoke(&args) {
                self.report_failure(&err);
            }
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let operation = Arc::clone(self);
                runtime.spawn(async move {
                    if let Err(err) = operation.invoke_async(args).await {
                        operation.report_failure(&err);
                    }
                });
            }
            Err(_) => warn!(operation = %self.hint(), "async reaction skipped: no tokio runtime"),
        }
    }

    fn rerun_later(self: &Arc<Self>, delay: Duration) {
        if self.delayed.swap(true, Ordering::AcqRel) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let operation = Arc::clone(self);
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    operation.delayed.store(false, Ordering::Release);
                    let Some(args) = operation.reaction_args() else {
                        return;
                    };
                    if let Err(err) = operation.invoke_async(args).await {
                        operation.report_failure(&err);
                    }
                });
            }
            Err(_) => {
                self.delayed.store(false, Ordering::Release);
                warn!(operation = %self.hint(), "delayed reaction skipped: no tokio runtime");
            }
        }
    }
}

impl Reaction for Operation {
    fn react(&self) {
        let Some(operation) = self.me.upgrade() else {
            return;
        };
        let throttling = self.options.read().throttling;
        match throttling {
            Throttling::Immediate => operation.rerun(),
            Throttling::Manual => {
                if self.log_reactions() {
                    debug!(operation = %self.hint(), "reaction postponed until invoked");
                }
            }
            Throttling::Delay(_) => {
                operation.rerun_later(throttling.delay().unwrap_or_default());
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hint())
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("hint", &self.hint())
            .field("options", &*self.options.read())
            .field("async", &self.is_async())
            .field("runs", &self.runs())
            .finish()
    }
}
