//! Reactive system facade
//!
//! A `ReactiveSystem` owns one `ChangesetManager` and a registry of the
//! operations created through it. It is the entry point applications use:
//! transactions, operation registration and lookup, snapshots, disposal,
//! diagnostics and the logging/profiling switches.
//!
//! # Example
//!
//! ```ignore
//! let system = ReactiveSystem::new();
//! let person = system.transaction("create", || {
//!     ObservableObject::new("Person", [("name", Value::from("John"))])
//! })?;
//! let render = system.member_operation(&person, "render", OperationOptions::cached(), {
//!     let person = person.clone();
//!     move |_| Ok(Value::from(format!("Hello, {}", person.get("name")?)))
//! })?;
//! assert_eq!(render.invoke(&[])?, Value::from("Hello, John"));
//! ```

use crate::config::EngineConfig;
use crate::journal::Journal;
use crate::operation::{Operation, OperationOptions};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ripple_concurrency::context;
use ripple_concurrency::{
    ChangesetManager, GcStats, ObservableObject, Transaction, TransactionOptions,
};
use ripple_core::{Error, Isolation, LoggingOptions, ProfilingOptions, Result, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Entry point owning one manager and its operations
pub struct ReactiveSystem {
    manager: Arc<ChangesetManager>,
    operations: DashMap<String, Arc<Operation>>,
}

impl ReactiveSystem {
    /// System with default settings
    pub fn new() -> Self {
        Self {
            manager: ChangesetManager::new(),
            operations: DashMap::new(),
        }
    }

    /// System configured from `config`
    pub fn with_config(config: &EngineConfig) -> Self {
        let system = ReactiveSystem::new();
        system.apply_config(config);
        system
    }

    /// System configured from a TOML file
    ///
    /// # Errors
    ///
    /// `Config` when the file cannot be read or parsed.
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let config = EngineConfig::from_file(path)?;
        info!(path = %path.display(), "loaded engine configuration");
        Ok(ReactiveSystem::with_config(&config))
    }

    /// Replace logging, profiling and reaction settings
    pub fn apply_config(&self, config: &EngineConfig) {
        self.manager.set_logging(config.logging.clone());
        self.manager.set_profiling(config.profiling.clone());
        self.manager
            .set_max_reaction_rounds(config.reactions.max_rounds);
    }

    /// Settings currently in effect
    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            logging: self.manager.logging(),
            profiling: self.manager.profiling(),
            ..EngineConfig::default()
        };
        config.reactions.max_rounds = self.manager.max_reaction_rounds();
        config
    }

    /// Manager owning stamps, pending changesets and GC
    pub fn manager(&self) -> &Arc<ChangesetManager> {
        &self.manager
    }

    // === Transactions ===

    /// Run `f` in the current transaction or a new one
    ///
    /// # Errors
    ///
    /// The error of `f`, or the conflict or cancellation of the transaction.
    pub fn transaction<T>(&self, hint: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        Transaction::run_with(&self.manager, TransactionOptions::new(hint), f)
    }

    /// Run `f` in a transaction started per `options`
    pub fn transaction_with<T>(
        &self,
        options: TransactionOptions,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        Transaction::run_with(&self.manager, options, f)
    }

    /// Run an async body in a transaction, retrying after restarts
    pub async fn transaction_async<T, F, Fut>(
        &self,
        options: TransactionOptions,
        f: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        Transaction::run_async(&self.manager, options, f).await
    }

    /// Standalone transaction for manual `run`/`apply`
    pub fn create_transaction(&self, hint: &str) -> Arc<Transaction> {
        Transaction::create(&self.manager, TransactionOptions::new(hint))
    }

    /// Journal recording transactions run with it
    pub fn journal(&self, capacity: usize) -> Arc<Journal> {
        Journal::with_capacity(&self.manager, capacity)
    }

    // === Operations ===

    fn register(&self, operation: Arc<Operation>) -> Result<Arc<Operation>> {
        match self.operations.entry(operation.hint().to_string()) {
            Entry::Occupied(_) => Err(Error::misuse(format!(
                "operation {} is already registered",
                operation.hint()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&operation));
                Ok(operation)
            }
        }
    }

    /// Register a synchronous operation under `hint`
    ///
    /// # Errors
    ///
    /// `Misuse` when `hint` is taken.
    pub fn operation<F>(
        &self,
        hint: impl Into<String>,
        options: OperationOptions,
        body: F,
    ) -> Result<Arc<Operation>>
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(Operation::new(&self.manager, hint, options, body))
    }

    /// Register an async operation under `hint`
    ///
    /// # Errors
    ///
    /// `Misuse` when `hint` is taken or the operation is cached.
    pub fn async_operation<F, Fut>(
        &self,
        hint: impl Into<String>,
        options: OperationOptions,
        body: F,
    ) -> Result<Arc<Operation>>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(Operation::new_async(&self.manager, hint, options, body)?)
    }

    /// Register `member` of `object` as an operation named `Object#id.member`
    pub fn member_operation<F>(
        &self,
        object: &ObservableObject,
        member: &str,
        options: OperationOptions,
        body: F,
    ) -> Result<Arc<Operation>>
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.operation(format!("{object}.{member}"), options, body)
    }

    /// Registered operation named `hint`
    pub fn get_operation(&self, hint: &str) -> Option<Arc<Operation>> {
        self.operations.get(hint).map(|o| Arc::clone(o.value()))
    }

    /// Operation registered for `member` of `object`
    pub fn get_member_operation(
        &self,
        object: &ObservableObject,
        member: &str,
    ) -> Option<Arc<Operation>> {
        self.get_operation(&format!("{object}.{member}"))
    }

    /// Unregister and reset the operation named `hint`
    pub fn remove_operation(&self, hint: &str) -> Option<Arc<Operation>> {
        let (_, operation) = self.operations.remove(hint)?;
        operation.reset();
        Some(operation)
    }

    /// Number of registered operations
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    // === Objects ===

    /// Plain copy of every field of `object` as the current context sees it
    ///
    /// The copy is not recorded as a dependency.
    pub fn take_snapshot(&self, object: &ObservableObject) -> Result<BTreeMap<String, Value>> {
        object.snapshot()
    }

    /// Dispose `object` in the current transaction, or in a transaction of
    /// its own when there is none
    ///
    /// Operations registered for its members are unregistered once the
    /// disposal is applied.
    pub fn dispose(&self, object: &ObservableObject) -> Result<()> {
        if context::current_transaction().is_some() {
            return object.dispose();
        }
        let options = TransactionOptions::new(format!("dispose {object}"))
            .isolation(Isolation::DisjoinForInternalDisposal);
        Transaction::run_with(&self.manager, options, || object.dispose())?;
        let prefix = format!("{object}.");
        let members: Vec<String> = self
            .operations
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.key().clone())
            .collect();
        for hint in members {
            self.remove_operation(&hint);
        }
        Ok(())
    }

    // === Diagnostics ===

    /// Full causal chain of why the running operation runs
    pub fn why(&self) -> String {
        describe_cause(true)
    }

    /// Immediate cause of why the running operation runs
    pub fn brief_why(&self) -> String {
        describe_cause(false)
    }

    /// Logging options in effect
    pub fn logging(&self) -> LoggingOptions {
        self.manager.logging()
    }

    /// Change logging options
    pub fn set_logging_mode(&self, options: LoggingOptions) {
        self.manager.set_logging(options);
    }

    /// Profiling options in effect
    pub fn profiling(&self) -> ProfilingOptions {
        self.manager.profiling()
    }

    /// Change profiling options
    pub fn set_profiling_mode(&self, options: ProfilingOptions) {
        self.manager.set_profiling(options);
    }

    /// Collect history no pending changeset can still read
    pub fn collect_garbage(&self) -> usize {
        self.manager.collect_garbage()
    }

    /// Garbage collection counters
    pub fn gc_stats(&self) -> GcStats {
        self.manager.gc_stats()
    }

    /// Run `f` outside of any transaction
    pub fn outside<T>(&self, f: impl FnOnce() -> T) -> T {
        ripple_concurrency::outside(f)
    }
}

impl Default for ReactiveSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReactiveSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveSystem")
            .field("operations", &self.operations.len())
            .field("gc", &self.manager.gc_stats())
            .finish()
    }
}

fn describe_cause(full: bool) -> String {
    let context = context::current();
    let Some(recorder) = context.recorder() else {
        return "no operation is running".to_string();
    };
    let operation = recorder.observer().hint();
    match recorder.cause() {
        Some(cause) if full => format!("{operation}: {cause}"),
        Some(cause) => format!("{operation}: {}", cause.brief()),
        None => format!("{operation}: first run"),
    }
}
