//! Observer graph
//!
//! An `Observer` is the identity of one observing operation (cached or
//! reactive). Each completed invocation produces a `Launch`: the result plus
//! every observable it read. Launches subscribe to what they read, so a
//! change to any of it marks them obsolete and propagates to the launches
//! that read them in turn.
//!
//! ```text
//! FieldVersion ──subscribers──> Launch(cached) ──subscribers──> Launch(reactive)
//!                                                                    │
//!                                         obsolete + applied ──> reaction queue
//! ```
//!
//! Reactive observers whose applied launch goes obsolete are queued and
//! re-run after the transaction that caused it has finished, in ascending
//! `order`, outside of any transaction.

use crate::changeset::Changeset;
use crate::context::{self, Context};
use crate::manager::ChangesetManager;
use crate::version::{ChangesetInfo, FieldVersion, ObjectHandle};
use parking_lot::{Mutex, RwLock};
use ripple_core::{
    ChangesetId, FieldKey, Kind, ObjectId, ObserverId, Result, Stamp, Value, BOOT_STAMP,
};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

// ============================================================================
// Causes
// ============================================================================

/// Why a launch became obsolete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObsoleteCause {
    /// A field it read was changed
    FieldChanged {
        /// Object display name
        object: String,
        /// Changed field
        field: FieldKey,
        /// Changeset that applied the change
        changeset: String,
    },
    /// An object it read was disposed
    Disposed {
        /// Object display name
        object: String,
        /// Changeset that applied the disposal
        changeset: String,
    },
    /// A cached operation it read became obsolete
    OperationObsolete {
        /// Obsolete operation
        operation: String,
        /// Why that operation became obsolete
        cause: Box<ObsoleteCause>,
    },
    /// A field it read changed before the result could be applied
    Stale {
        /// Object display name
        object: String,
        /// Field read
        field: FieldKey,
    },
}

impl ObsoleteCause {
    /// The immediate cause only
    pub fn brief(&self) -> String {
        match self {
            ObsoleteCause::FieldChanged {
                object,
                field,
                changeset,
            } => format!("{object}.{field} changed by {changeset}"),
            ObsoleteCause::Disposed { object, changeset } => {
                format!("{object} disposed by {changeset}")
            }
            ObsoleteCause::OperationObsolete { operation, .. } => {
                format!("{operation} became obsolete")
            }
            ObsoleteCause::Stale { object, field } => {
                format!("{object}.{field} changed while computing")
            }
        }
    }

    /// Every cause from this one down to the root change
    pub fn chain(&self) -> Vec<String> {
        let mut chain = vec![self.brief()];
        let mut cause = self;
        while let ObsoleteCause::OperationObsolete { cause: inner, .. } = cause {
            chain.push(inner.brief());
            cause = inner;
        }
        chain
    }
}

impl fmt::Display for ObsoleteCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.chain().join(" <- "))
    }
}

// ============================================================================
// Observables
// ============================================================================

/// Something a launch read
#[derive(Clone)]
pub enum Observable {
    /// A field version of an observable object
    Field {
        /// Object
        handle: Arc<ObjectHandle>,
        /// Field name
        key: FieldKey,
        /// Exact version read
        version: Arc<FieldVersion>,
    },
    /// The result of a cached operation
    Launch(Arc<Launch>),
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observable::Field { handle, key, .. } => write!(f, "{handle}.{key}"),
            Observable::Launch(launch) => write!(f, "{}()", launch.observer.hint),
        }
    }
}

// ============================================================================
// Observer
// ============================================================================

/// Re-run hook of a reactive observer
pub trait Reaction: Send + Sync {
    /// Re-run the operation because its applied launch is obsolete
    fn react(&self);
}

/// Identity of one observing operation
pub struct Observer {
    id: ObserverId,
    hint: String,
    kind: Kind,
    order: AtomicI32,
    applied: Mutex<Option<Arc<Launch>>>,
    reaction: RwLock<Option<Weak<dyn Reaction>>>,
}

impl Observer {
    /// Create an observer
    pub fn new(id: ObserverId, hint: impl Into<String>, kind: Kind, order: i32) -> Arc<Self> {
        Arc::new(Self {
            id,
            hint: hint.into(),
            kind,
            order: AtomicI32::new(order),
            applied: Mutex::new(None),
            reaction: RwLock::new(None),
        })
    }

    /// Observer id
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Operation name
    pub fn hint(&self) -> &str {
        &self.hint
    }

    /// Operation kind
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Position among reactions of the same round (ascending)
    pub fn order(&self) -> i32 {
        self.order.load(Ordering::Relaxed)
    }

    /// Change the reaction order
    pub fn set_order(&self, order: i32) {
        self.order.store(order, Ordering::Relaxed);
    }

    /// Attach the hook that re-runs this observer
    pub fn set_reaction(&self, reaction: Weak<dyn Reaction>) {
        *self.reaction.write() = Some(reaction);
    }

    /// Launch visible to everyone outside of transactions
    pub fn applied_launch(&self) -> Option<Arc<Launch>> {
        self.applied.lock().clone()
    }

    /// Whether the applied launch exists and is not obsolete
    pub fn is_up_to_date(&self) -> bool {
        self.applied_launch().map_or(false, |l| !l.is_obsolete())
    }

    /// Drop the applied launch and its subscriptions
    pub fn reset(&self) {
        if let Some(launch) = self.applied.lock().take() {
            launch.unsubscribe();
        }
    }

    fn is_applied(&self, launch: &Launch) -> bool {
        self.applied
            .lock()
            .as_ref()
            .map_or(false, |a| std::ptr::eq(Arc::as_ptr(a), launch))
    }

    pub(crate) fn react(&self) {
        let reaction = self.reaction.read().as_ref().and_then(Weak::upgrade);
        if let Some(reaction) = reaction {
            reaction.react();
        }
    }

    /// Make `launch` the applied one
    ///
    /// A launch that is already obsolete, or that read something the applied
    /// state no longer holds, is marked obsolete right away so a reactive
    /// observer runs again.
    pub(crate) fn install(
        self: &Arc<Self>,
        launch: Arc<Launch>,
        since: Stamp,
        origin: Option<ChangesetId>,
        reactions: &mut Vec<Arc<Observer>>,
    ) {
        *self.applied.lock() = Some(launch.clone());
        if launch.is_obsolete() {
            if self.kind == Kind::Reactive {
                push_unique(reactions, self);
            }
        } else if let Some(cause) = launch.stale_cause(origin) {
            launch.mark_obsolete(since, cause, None, reactions);
        } else {
            launch.follow_own_writes(origin);
        }
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id)
            .field("hint", &self.hint)
            .field("kind", &self.kind)
            .field("order", &self.order())
            .finish()
    }
}

fn push_unique(reactions: &mut Vec<Arc<Observer>>, observer: &Arc<Observer>) {
    if !reactions.iter().any(|o| Arc::ptr_eq(o, observer)) {
        reactions.push(observer.clone());
    }
}

// ============================================================================
// Launch
// ============================================================================

#[derive(Default)]
struct LaunchState {
    obsolete: Option<(Stamp, ObsoleteCause)>,
    subscribers: Vec<Weak<Launch>>,
}

/// One completed invocation of an observer
pub struct Launch {
    observer: Arc<Observer>,
    changeset: Option<Arc<ChangesetInfo>>,
    args: Vec<Value>,
    result: Result<Value>,
    observables: Vec<Observable>,
    cause: Option<ObsoleteCause>,
    state: Mutex<LaunchState>,
}

impl Launch {
    /// Observer this launch belongs to
    pub fn observer(&self) -> &Arc<Observer> {
        &self.observer
    }

    /// Arguments of the invocation
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Result of the invocation
    pub fn result(&self) -> Result<Value> {
        self.result.clone()
    }

    /// Everything the invocation read
    pub fn observables(&self) -> &[Observable] {
        &self.observables
    }

    /// Why the invocation ran (the obsolescence of the previous launch)
    pub fn cause(&self) -> Option<&ObsoleteCause> {
        self.cause.as_ref()
    }

    /// Changeset the invocation ran in
    pub fn changeset_id(&self) -> Option<ChangesetId> {
        self.changeset.as_ref().map(|c| c.id())
    }

    /// Whether something it read has changed
    pub fn is_obsolete(&self) -> bool {
        self.state.lock().obsolete.is_some()
    }

    /// Stamp of the change that made it obsolete
    pub fn obsolete_since(&self) -> Option<Stamp> {
        self.state.lock().obsolete.as_ref().map(|(since, _)| *since)
    }

    /// Why it became obsolete
    pub fn obsolete_cause(&self) -> Option<ObsoleteCause> {
        self.state.lock().obsolete.as_ref().map(|(_, c)| c.clone())
    }

    /// Number of live launches that read this one
    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub(crate) fn subscribe(self: &Arc<Self>) {
        for observable in &self.observables {
            match observable {
                Observable::Field { version, .. } => version.subscribe(self),
                Observable::Launch(inner) => inner.add_subscriber(self),
            }
        }
    }

    pub(crate) fn unsubscribe(&self) {
        for observable in &self.observables {
            match observable {
                Observable::Field { version, .. } => version.unsubscribe(self),
                Observable::Launch(inner) => inner.remove_subscriber(self),
            }
        }
    }

    fn add_subscriber(&self, launch: &Arc<Launch>) {
        let mut state = self.state.lock();
        state.subscribers.retain(|w| w.strong_count() > 0);
        let weak = Arc::downgrade(launch);
        if !state.subscribers.iter().any(|w| Weak::ptr_eq(w, &weak)) {
            state.subscribers.push(weak);
        }
    }

    fn remove_subscriber(&self, launch: &Launch) {
        self.state
            .lock()
            .subscribers
            .retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), launch));
    }

    /// Mark obsolete and propagate to every launch that read this one
    ///
    /// Launches made by `origin` itself are skipped: they already saw the
    /// change. Reactive observers whose applied launch this is are queued.
    pub(crate) fn mark_obsolete(
        self: &Arc<Self>,
        since: Stamp,
        cause: ObsoleteCause,
        origin: Option<ChangesetId>,
        reactions: &mut Vec<Arc<Observer>>,
    ) {
        if origin.is_some() && self.changeset_id() == origin {
            return;
        }
        let subscribers = {
            let mut state = self.state.lock();
            if state.obsolete.is_some() {
                return;
            }
            state.obsolete = Some((since, cause.clone()));
            std::mem::take(&mut state.subscribers)
        };
        self.unsubscribe();

        let propagated = ObsoleteCause::OperationObsolete {
            operation: self.observer.hint.clone(),
            cause: Box::new(cause),
        };
        for subscriber in subscribers.iter().filter_map(Weak::upgrade) {
            subscriber.mark_obsolete(since, propagated.clone(), origin, reactions);
        }
        if self.observer.kind == Kind::Reactive && self.observer.is_applied(self) {
            push_unique(reactions, &self.observer);
        }
    }

    /// Whether this launch can serve a read by `reader` with `args`
    ///
    /// `reader` is the changeset of the reading transaction, `None` for
    /// reads of the applied state.
    pub fn is_valid_for(&self, reader: Option<&Changeset>, args: &[Value]) -> bool {
        if self.args.as_slice() != args {
            return false;
        }
        let since = self.obsolete_since();
        let reader = match (reader, since) {
            (None, None) => return true,
            (None, Some(_)) => return false,
            (Some(reader), Some(since)) if reader.timestamp() >= since => return false,
            (Some(reader), _) => reader,
        };
        self.observables.iter().all(|observable| match observable {
            Observable::Field {
                handle,
                key,
                version,
            } => match reader.lookup(handle) {
                Ok(visible) if !visible.is_disposed() => visible
                    .field(key)
                    .map_or(false, |f| Arc::ptr_eq(&f, version)),
                _ => false,
            },
            Observable::Launch(inner) => inner.is_valid_for(Some(reader), inner.args()),
        })
    }

    /// Subscribe to fields `origin` overwrote after they were read
    ///
    /// The read versions are replaced by the launch's own changeset, so the
    /// launch must follow the applied ones to notice later changes.
    fn follow_own_writes(self: &Arc<Self>, origin: Option<ChangesetId>) {
        if self.observer.kind != Kind::Reactive || origin.is_none() {
            return;
        }
        for observable in &self.observables {
            if let Observable::Field {
                handle,
                key,
                version,
            } = observable
            {
                if let Some(current) = handle.applied().field(key) {
                    if !Arc::ptr_eq(&current, version) && Some(current.editor()) == origin {
                        current.subscribe(self);
                    }
                }
            }
        }
    }

    /// First read that the applied state no longer holds
    fn stale_cause(&self, origin: Option<ChangesetId>) -> Option<ObsoleteCause> {
        for observable in &self.observables {
            match observable {
                Observable::Field {
                    handle,
                    key,
                    version,
                } => {
                    let applied = handle.applied();
                    if applied.is_disposed() {
                        return Some(ObsoleteCause::Disposed {
                            object: handle.to_string(),
                            changeset: applied.changeset().to_string(),
                        });
                    }
                    match applied.field(key) {
                        Some(current) if Arc::ptr_eq(&current, version) => {}
                        Some(current)
                            if self.observer.kind == Kind::Reactive
                                && Some(current.editor()) == origin => {}
                        _ => {
                            return Some(ObsoleteCause::Stale {
                                object: handle.to_string(),
                                field: key.clone(),
                            })
                        }
                    }
                }
                Observable::Launch(inner) => {
                    if let Some(cause) = inner.obsolete_cause() {
                        return Some(ObsoleteCause::OperationObsolete {
                            operation: inner.observer.hint.clone(),
                            cause: Box::new(cause),
                        });
                    }
                }
            }
        }
        None
    }
}

impl fmt::Debug for Launch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Launch")
            .field("observer", &self.observer.hint)
            .field("changeset", &self.changeset_id())
            .field("args", &self.args)
            .field("observables", &self.observables)
            .field("obsolete", &self.obsolete_since())
            .finish()
    }
}

// ============================================================================
// Recorder
// ============================================================================

#[derive(Default)]
struct RecorderState {
    observables: Vec<Observable>,
    usage: FxHashMap<(ObjectId, FieldKey), usize>,
}

/// Collects what one running invocation reads
pub struct Recorder {
    observer: Arc<Observer>,
    cause: Option<ObsoleteCause>,
    repetitive_usage_threshold: Option<usize>,
    state: Mutex<RecorderState>,
}

impl Recorder {
    /// Start recording for `observer`
    ///
    /// `cause` is why it runs again; `repetitive_usage_threshold` enables a
    /// warning when one field is read more often than that.
    pub fn new(
        observer: Arc<Observer>,
        cause: Option<ObsoleteCause>,
        repetitive_usage_threshold: Option<usize>,
    ) -> Arc<Self> {
        Arc::new(Self {
            observer,
            cause,
            repetitive_usage_threshold,
            state: Mutex::new(RecorderState::default()),
        })
    }

    /// Observer being recorded
    pub fn observer(&self) -> &Arc<Observer> {
        &self.observer
    }

    /// Why this invocation runs, `None` for a first run
    pub fn cause(&self) -> Option<&ObsoleteCause> {
        self.cause.as_ref()
    }

    pub(crate) fn record_field(
        &self,
        handle: &Arc<ObjectHandle>,
        key: &FieldKey,
        version: &Arc<FieldVersion>,
    ) {
        let mut state = self.state.lock();
        let count = {
            let count = state.usage.entry((handle.id(), key.clone())).or_insert(0);
            *count += 1;
            *count
        };
        if count == 1 {
            state.observables.push(Observable::Field {
                handle: handle.clone(),
                key: key.clone(),
                version: version.clone(),
            });
        } else if Some(count) == self.repetitive_usage_threshold.map(|t| t + 1) {
            warn!(
                operation = %self.observer.hint,
                object = %handle,
                field = %key,
                count = count,
                "field is read repeatedly by the same operation"
            );
        }
    }

    /// Record a read of a cached operation's result
    pub fn record_launch(&self, launch: &Arc<Launch>) {
        let mut state = self.state.lock();
        let seen = state
            .observables
            .iter()
            .any(|o| matches!(o, Observable::Launch(l) if Arc::ptr_eq(l, launch)));
        if !seen {
            state.observables.push(Observable::Launch(launch.clone()));
        }
    }

    /// Number of distinct observables read so far
    pub fn observable_count(&self) -> usize {
        self.state.lock().observables.len()
    }

    /// Turn what was recorded into a subscribed launch
    ///
    /// Inside a transaction the launch stays provisional in its changeset and
    /// is installed when the changeset applies. Outside of one it is
    /// installed right away.
    pub fn complete(
        &self,
        changeset: Option<&Arc<Changeset>>,
        args: Vec<Value>,
        result: Result<Value>,
    ) -> Arc<Launch> {
        let observables = std::mem::take(&mut self.state.lock().observables);
        let launch = Arc::new(Launch {
            observer: self.observer.clone(),
            changeset: changeset.map(|c| c.info().clone()),
            args,
            result,
            observables,
            cause: self.cause.clone(),
            state: Mutex::new(LaunchState::default()),
        });
        launch.subscribe();
        match changeset {
            Some(changeset) => changeset.record_launch(launch.clone()),
            None => {
                let mut reactions = Vec::new();
                self.observer
                    .install(launch.clone(), BOOT_STAMP, None, &mut reactions);
            }
        }
        launch
    }
}

// ============================================================================
// Reaction loop
// ============================================================================

#[derive(Default)]
struct ReactionQueue {
    draining: bool,
    queued: Vec<Arc<Observer>>,
}

thread_local! {
    static REACTIONS: RefCell<ReactionQueue> = RefCell::new(ReactionQueue::default());
}

struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        REACTIONS.with(|q| {
            let mut queue = q.borrow_mut();
            queue.draining = false;
            queue.queued.clear();
        });
    }
}

/// Queue reactions and, unless a drain is already running on this thread,
/// run rounds until the queue is empty
///
/// Reactions triggered while draining join the next round. The number of
/// rounds is bounded by the manager's `max_reaction_rounds`.
pub(crate) fn run_reactions(manager: &ChangesetManager, reactions: Vec<Arc<Observer>>) {
    if reactions.is_empty() {
        return;
    }
    let start = REACTIONS.with(|q| {
        let mut queue = q.borrow_mut();
        for observer in &reactions {
            push_unique(&mut queue.queued, observer);
        }
        if queue.draining {
            false
        } else {
            queue.draining = true;
            true
        }
    });
    if !start {
        return;
    }
    let _guard = DrainGuard;
    let max_rounds = manager.max_reaction_rounds();
    let mut rounds = 0;
    loop {
        let mut batch = REACTIONS.with(|q| std::mem::take(&mut q.borrow_mut().queued));
        if batch.is_empty() {
            break;
        }
        rounds += 1;
        if rounds > max_rounds {
            warn!(
                rounds = max_rounds,
                dropped = batch.len(),
                "reaction loop stopped: reactions keep making each other obsolete"
            );
            break;
        }
        batch.sort_by_key(|o| o.order());
        if manager.log_reactions() {
            debug!(
                round = rounds,
                reactions = ?batch.iter().map(|o| o.hint()).collect::<Vec<_>>(),
                "running reactions"
            );
        }
        context::with(Context::default(), || {
            for observer in &batch {
                observer.react();
            }
        });
    }
}
