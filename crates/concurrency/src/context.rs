//! Execution context
//!
//! The transaction, the dependency recorder and the inspection and
//! side-effect flags that apply to the code running right now. The context
//! is thread-local: entering one returns a guard that restores the previous
//! context when dropped.
//!
//! Async code keeps its context across suspension points with
//! [`WithContext`], which re-installs the captured context around every poll
//! of the inner future. Other tasks polled on the same thread in between
//! never see it.

use crate::observer::Recorder;
use crate::transaction::Transaction;
use ripple_core::{Error, Result};
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

/// What the currently running code executes under
#[derive(Clone, Default)]
pub struct Context {
    transaction: Option<Arc<Transaction>>,
    recorder: Option<Arc<Recorder>>,
    inspection: bool,
    side_effects_forbidden_by: Option<Arc<str>>,
}

impl Context {
    /// Context of code running inside `transaction`
    pub fn for_transaction(transaction: Arc<Transaction>, inspection: bool) -> Self {
        Context {
            transaction: Some(transaction),
            recorder: None,
            inspection,
            side_effects_forbidden_by: None,
        }
    }

    /// Same context running inside `transaction`
    ///
    /// The recorder and the side-effect restriction carry over.
    pub fn with_transaction(mut self, transaction: Arc<Transaction>, inspection: bool) -> Self {
        self.transaction = Some(transaction);
        self.inspection = inspection;
        self
    }

    /// Same context with reads recorded into `recorder`
    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Same context with writes forbidden on behalf of `operation`
    pub fn without_side_effects(mut self, operation: &str) -> Self {
        self.side_effects_forbidden_by = Some(Arc::from(operation));
        self
    }

    /// Current transaction
    pub fn transaction(&self) -> Option<&Arc<Transaction>> {
        self.transaction.as_ref()
    }

    /// Recorder collecting dependencies of the running operation
    pub fn recorder(&self) -> Option<&Arc<Recorder>> {
        self.recorder.as_ref()
    }

    /// Whether writes are rejected because a transaction is being inspected
    pub fn is_inspection(&self) -> bool {
        self.inspection
    }

    /// Operation forbidding side effects, if any
    pub fn side_effects_forbidden_by(&self) -> Option<&str> {
        self.side_effects_forbidden_by.as_deref()
    }
}

thread_local! {
    static CURRENT: RefCell<Context> = RefCell::new(Context::default());
}

/// Snapshot of the current context
pub fn current() -> Context {
    CURRENT.with(|c| c.borrow().clone())
}

/// Current transaction, if any
pub fn current_transaction() -> Option<Arc<Transaction>> {
    CURRENT.with(|c| c.borrow().transaction.clone())
}

/// Restores the previous context on drop
#[must_use = "the context is left as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Option<Context>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            CURRENT.with(|c| *c.borrow_mut() = previous);
        }
    }
}

/// Install `context` until the returned guard is dropped
pub fn enter(context: Context) -> ContextGuard {
    let previous = CURRENT.with(|c| std::mem::replace(&mut *c.borrow_mut(), context));
    ContextGuard {
        previous: Some(previous),
        _not_send: PhantomData,
    }
}

/// Run `f` under `context`
pub fn with<T>(context: Context, f: impl FnOnce() -> T) -> T {
    let _guard = enter(context);
    f()
}

/// Check that the current code may write, returning its transaction
///
/// `target` describes what is being written, for the error message.
pub fn writable_transaction(target: impl FnOnce() -> String) -> Result<Arc<Transaction>> {
    let context = current();
    if context.inspection {
        return Err(Error::InspectionMode { target: target() });
    }
    if let Some(operation) = context.side_effects_forbidden_by {
        return Err(Error::SideEffect {
            operation: operation.to_string(),
            target: target(),
        });
    }
    match context.transaction {
        Some(transaction) => Ok(transaction),
        None => Err(Error::OutsideTransaction {
            action: format!("changing {}", target()),
        }),
    }
}

/// Future that runs every poll of `inner` under a captured context
pub struct WithContext<F> {
    context: Context,
    inner: Pin<Box<F>>,
}

impl<F: Future> WithContext<F> {
    /// Wrap `inner` so it always runs under `context`
    pub fn new(context: Context, inner: F) -> Self {
        WithContext {
            context,
            inner: Box::pin(inner),
        }
    }
}

impl<F: Future> Future for WithContext<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _guard = enter(this.context.clone());
        this.inner.as_mut().poll(cx)
    }
}
