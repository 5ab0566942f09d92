//! Field versions, object versions and object handles
//!
//! - `FieldVersion`: immutable content cell of one field, tracks subscribers
//! - `ObjectVersion`: one object's fields at one changeset, linked to the
//!   version it was derived from (`former`)
//! - `ObjectHandle`: identity of a logical object; points at the applied
//!   version and at the version currently being edited
//!
//! The chain `applied -> former -> former ...` is what readers with older
//! snapshots walk. It ends at the shared empty sentinel, either because the
//! object was created there or because garbage collection unlinked the rest.

use crate::observer::Launch;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use ripple_core::{ChangesetId, FieldKey, ObjectId, Stamp, Value, BOOT_STAMP};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

// ============================================================================
// Changeset info
// ============================================================================

/// Identity, timestamp and seal state of a changeset
///
/// Shared between a changeset and the object versions it owns so that a
/// version can be filtered by timestamp without holding the changeset.
#[derive(Debug)]
pub struct ChangesetInfo {
    id: ChangesetId,
    hint: String,
    timestamp: AtomicU64,
    sealed: AtomicBool,
}

impl ChangesetInfo {
    pub(crate) fn new(id: ChangesetId, hint: String, timestamp: Stamp) -> Self {
        Self {
            id,
            hint,
            timestamp: AtomicU64::new(timestamp),
            sealed: AtomicBool::new(false),
        }
    }

    /// Changeset id
    pub fn id(&self) -> ChangesetId {
        self.id
    }

    /// Hint given by the transaction
    pub fn hint(&self) -> &str {
        &self.hint
    }

    /// Current revision timestamp
    pub fn timestamp(&self) -> Stamp {
        self.timestamp.load(Ordering::SeqCst)
    }

    pub(crate) fn set_timestamp(&self, stamp: Stamp) {
        self.timestamp.store(stamp, Ordering::SeqCst);
    }

    /// Whether the versions of this changeset are frozen
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }
}

impl fmt::Display for ChangesetInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.id, self.hint)
    }
}

static BOOT: Lazy<Arc<ChangesetInfo>> = Lazy::new(|| {
    let info = ChangesetInfo::new(ChangesetId::new(0), "boot".to_string(), BOOT_STAMP);
    info.seal();
    Arc::new(info)
});

static EMPTY: Lazy<Arc<ObjectVersion>> = Lazy::new(|| {
    Arc::new(ObjectVersion::new(
        BOOT.clone(),
        None,
        BTreeMap::new(),
        0,
    ))
});

/// The empty sentinel every version chain ends at
pub fn empty_version() -> Arc<ObjectVersion> {
    EMPTY.clone()
}

// ============================================================================
// FieldVersion
// ============================================================================

/// Immutable content of one field, written by one changeset
pub struct FieldVersion {
    content: Value,
    editor: ChangesetId,
    subscribers: Mutex<Vec<Weak<Launch>>>,
}

impl FieldVersion {
    /// Create a field version written by `editor`
    pub fn new(content: Value, editor: ChangesetId) -> Self {
        Self {
            content,
            editor,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Field content
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Changeset that wrote this content
    pub fn editor(&self) -> ChangesetId {
        self.editor
    }

    pub(crate) fn subscribe(&self, launch: &Arc<Launch>) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|w| w.strong_count() > 0);
        let weak = Arc::downgrade(launch);
        if !subscribers.iter().any(|w| Weak::ptr_eq(w, &weak)) {
            subscribers.push(weak);
        }
    }

    pub(crate) fn unsubscribe(&self, launch: &Launch) {
        self.subscribers
            .lock()
            .retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), launch));
    }

    /// Live subscribers
    pub fn subscribers(&self) -> Vec<Arc<Launch>> {
        self.subscribers
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

impl fmt::Debug for FieldVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldVersion")
            .field("content", &self.content)
            .field("editor", &self.editor)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// ObjectVersion
// ============================================================================

struct VersionState {
    former: Option<Arc<ObjectVersion>>,
    data: BTreeMap<FieldKey, Arc<FieldVersion>>,
    changes: BTreeSet<FieldKey>,
    conflicts: Vec<Option<FieldKey>>,
    revision: i64,
}

/// One object's fields as seen by one changeset
///
/// Mutable only while its changeset is open. `revision` counts edits and is
/// negative once the object is disposed.
pub struct ObjectVersion {
    changeset: Arc<ChangesetInfo>,
    state: RwLock<VersionState>,
}

impl ObjectVersion {
    pub(crate) fn new(
        changeset: Arc<ChangesetInfo>,
        former: Option<Arc<ObjectVersion>>,
        data: BTreeMap<FieldKey, Arc<FieldVersion>>,
        revision: i64,
    ) -> Self {
        Self {
            changeset,
            state: RwLock::new(VersionState {
                former,
                data,
                changes: BTreeSet::new(),
                conflicts: Vec::new(),
                revision,
            }),
        }
    }

    /// Owning changeset
    pub fn changeset(&self) -> &Arc<ChangesetInfo> {
        &self.changeset
    }

    /// Timestamp of the owning changeset
    pub fn timestamp(&self) -> Stamp {
        self.changeset.timestamp()
    }

    /// Whether this is the empty sentinel
    pub fn is_empty_sentinel(&self) -> bool {
        std::ptr::eq(self, Arc::as_ptr(&EMPTY))
    }

    /// Version this one was derived from (the empty sentinel when unlinked)
    pub fn former(&self) -> Arc<ObjectVersion> {
        self.state.read().former.clone().unwrap_or_else(empty_version)
    }

    pub(crate) fn set_former(&self, former: Option<Arc<ObjectVersion>>) {
        self.state.write().former = former;
    }

    /// Whether `former` points at a real version
    pub fn has_former(&self) -> bool {
        self.state
            .read()
            .former
            .as_ref()
            .map_or(false, |f| !f.is_empty_sentinel())
    }

    /// Field version for `key`
    pub fn field<Q>(&self, key: &Q) -> Option<Arc<FieldVersion>>
    where
        FieldKey: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.state.read().data.get(key).cloned()
    }

    /// All field versions
    pub fn fields(&self) -> BTreeMap<FieldKey, Arc<FieldVersion>> {
        self.state.read().data.clone()
    }

    /// Field names, in key order
    pub fn keys(&self) -> Vec<FieldKey> {
        self.state.read().data.keys().cloned().collect()
    }

    /// Fields changed by the owning changeset
    pub fn changes(&self) -> BTreeSet<FieldKey> {
        self.state.read().changes.clone()
    }

    /// Whether the owning changeset changed `key`
    pub fn is_changed(&self, key: &str) -> bool {
        self.state.read().changes.contains(key)
    }

    /// Conflicts found by the last rebase (`None` = disposal conflict)
    pub fn conflicts(&self) -> Vec<Option<FieldKey>> {
        self.state.read().conflicts.clone()
    }

    /// Edit counter, negative once disposed
    pub fn revision(&self) -> i64 {
        self.state.read().revision
    }

    /// Whether the object is disposed in this version
    pub fn is_disposed(&self) -> bool {
        self.state.read().revision < 0
    }

    pub(crate) fn put_field(&self, key: FieldKey, field: Arc<FieldVersion>) {
        let mut state = self.state.write();
        state.changes.insert(key.clone());
        state.data.insert(key, field);
    }

    /// Restore the former field version, dropping the change mark
    pub(crate) fn restore_field(&self, key: &FieldKey, field: Option<Arc<FieldVersion>>) {
        let mut state = self.state.write();
        state.changes.remove(key);
        match field {
            Some(field) => {
                state.data.insert(key.clone(), field);
            }
            None => {
                state.data.remove(key);
            }
        }
    }

    pub(crate) fn mark_all_changed(&self) {
        let mut state = self.state.write();
        let keys: Vec<FieldKey> = state.data.keys().cloned().collect();
        state.changes.extend(keys);
    }

    pub(crate) fn mark_changed(&self, keys: impl IntoIterator<Item = FieldKey>) {
        self.state.write().changes.extend(keys);
    }

    pub(crate) fn mark_disposed(&self) {
        let mut state = self.state.write();
        if state.revision > 0 {
            state.revision = -state.revision;
        }
    }

    /// Replace everything rebase recomputes in one step
    pub(crate) fn rebased(
        &self,
        former: Arc<ObjectVersion>,
        data: BTreeMap<FieldKey, Arc<FieldVersion>>,
        conflicts: Vec<Option<FieldKey>>,
    ) {
        let disposed = self.is_disposed();
        let base = former.revision().abs() + 1;
        let mut state = self.state.write();
        state.former = Some(former);
        state.data = data;
        state.conflicts = conflicts;
        state.revision = if disposed { -base } else { base };
    }
}

impl fmt::Debug for ObjectVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("ObjectVersion")
            .field("changeset", &self.changeset.id())
            .field("timestamp", &self.changeset.timestamp())
            .field("revision", &state.revision)
            .field("fields", &state.data.len())
            .field("changes", &state.changes)
            .finish()
    }
}

// ============================================================================
// ObjectHandle
// ============================================================================

struct HandleState {
    applied: Arc<ObjectVersion>,
    editing: Option<Arc<ObjectVersion>>,
    editors: usize,
}

/// Identity of one logical object
pub struct ObjectHandle {
    id: ObjectId,
    hint: String,
    observable: bool,
    raw_fields: BTreeSet<FieldKey>,
    state: Mutex<HandleState>,
}

impl ObjectHandle {
    pub(crate) fn new(
        id: ObjectId,
        hint: String,
        observable: bool,
        raw_fields: BTreeSet<FieldKey>,
    ) -> Self {
        Self {
            id,
            hint,
            observable,
            raw_fields,
            state: Mutex::new(HandleState {
                applied: empty_version(),
                editing: None,
                editors: 0,
            }),
        }
    }

    /// Object id
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Hint (usually the type name)
    pub fn hint(&self) -> &str {
        &self.hint
    }

    /// Whether reads of this object are recorded as dependencies
    pub fn is_observable(&self) -> bool {
        self.observable
    }

    /// Whether reads of `key` are recorded as dependencies
    pub fn is_tracked(&self, key: &str) -> bool {
        self.observable && !self.raw_fields.contains(key)
    }

    /// Currently applied version
    pub fn applied(&self) -> Arc<ObjectVersion> {
        self.state.lock().applied.clone()
    }

    /// Most recent version being edited, if any
    pub fn editing(&self) -> Option<Arc<ObjectVersion>> {
        self.state.lock().editing.clone()
    }

    /// Number of changesets currently editing this object
    pub fn editors(&self) -> usize {
        self.state.lock().editors
    }

    /// Number of versions reachable from the applied one (sentinel excluded)
    pub fn history_depth(&self) -> usize {
        let mut depth = 0;
        let mut version = self.applied();
        while !version.is_empty_sentinel() {
            depth += 1;
            version = version.former();
        }
        depth
    }

    pub(crate) fn begin_edit(&self, version: &Arc<ObjectVersion>) {
        let mut state = self.state.lock();
        state.editing = Some(version.clone());
        state.editors += 1;
    }

    pub(crate) fn end_edit(&self, version: &Arc<ObjectVersion>) {
        let mut state = self.state.lock();
        state.editors = state.editors.saturating_sub(1);
        let owned = state
            .editing
            .as_ref()
            .map_or(false, |e| Arc::ptr_eq(e, version));
        if state.editors == 0 || owned {
            state.editing = None;
        }
    }

    pub(crate) fn set_applied(&self, version: Arc<ObjectVersion>) {
        self.state.lock().applied = version;
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.hint, self.id)
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("id", &self.id)
            .field("hint", &self.hint)
            .field("observable", &self.observable)
            .field("editors", &self.editors())
            .finish()
    }
}
