//! Changesets: isolated sets of object versions
//!
//! A changeset reads a consistent snapshot (every applied version stamped
//! at or before its timestamp) and keeps its own writable version of every
//! object it edits. Nested changesets read through their parent.
//!
//! ## Lifecycle
//!
//! ```text
//! acquire ─> edit ... ─> seal ─> rebase ─┬─> apply              (top level)
//!                                         ├─> migrate_into_parent (nested)
//!                                         └─> discard            (canceled / conflicts)
//! ```
//!
//! Rebase moves every version onto the latest one (applied, or the parent's
//! for nested changesets). Fields both sides changed to different content are
//! conflicts. Apply assigns the final stamp, publishes the versions, marks
//! the launches that read replaced field versions obsolete and installs the
//! launches computed inside the changeset.

use crate::manager::ChangesetManager;
use crate::observer::{Launch, Observer, ObsoleteCause};
use crate::patch::PatchSet;
use crate::version::{ChangesetInfo, FieldVersion, ObjectHandle, ObjectVersion};
use parking_lot::Mutex;
use ripple_core::{
    ChangesetId, ContentEquality, Error, FieldConflict, FieldKey, ObjectId, ObserverId, Result,
    Stamp, Value, BOOT_STAMP,
};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

struct ChangesetState {
    items: BTreeMap<ObjectId, (Arc<ObjectHandle>, Arc<ObjectVersion>)>,
    bumper: Stamp,
    finished: bool,
    ignore_conflicts: bool,
    launches: FxHashMap<ObserverId, Arc<Launch>>,
}

/// Isolated set of object versions owned by one transaction
pub struct Changeset {
    info: Arc<ChangesetInfo>,
    manager: Arc<ChangesetManager>,
    parent: Option<Arc<Changeset>>,
    state: Mutex<ChangesetState>,
}

impl Changeset {
    /// Acquire a changeset reading at the manager's current stamp
    ///
    /// The changeset is registered as pending until garbage collection
    /// drops it.
    pub fn acquire(
        manager: &Arc<ChangesetManager>,
        hint: impl Into<String>,
        parent: Option<Arc<Changeset>>,
    ) -> Arc<Self> {
        let revision = match &parent {
            Some(parent) => parent.timestamp(),
            None => {
                let _commit = manager.commit_lock();
                manager.current_stamp()
            }
        };
        let changeset = Arc::new(Self {
            info: Arc::new(ChangesetInfo::new(
                manager.next_changeset_id(),
                hint.into(),
                revision,
            )),
            manager: manager.clone(),
            parent,
            state: Mutex::new(ChangesetState {
                items: BTreeMap::new(),
                bumper: BOOT_STAMP,
                finished: false,
                ignore_conflicts: false,
                launches: FxHashMap::default(),
            }),
        });
        manager.register_pending(changeset.clone());
        changeset
    }

    /// Changeset id
    pub fn id(&self) -> ChangesetId {
        self.info.id()
    }

    /// Hint given by the transaction
    pub fn hint(&self) -> &str {
        self.info.hint()
    }

    /// Identity shared with the versions this changeset owns
    pub fn info(&self) -> &Arc<ChangesetInfo> {
        &self.info
    }

    /// Revision stamp (read snapshot until applied, final stamp after)
    pub fn timestamp(&self) -> Stamp {
        self.info.timestamp()
    }

    /// Whether versions are frozen
    pub fn is_sealed(&self) -> bool {
        self.info.is_sealed()
    }

    /// Whether applied, migrated or discarded
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Parent of a nested changeset
    pub fn parent(&self) -> Option<&Arc<Changeset>> {
        self.parent.as_ref()
    }

    /// Manager that owns this changeset
    pub fn manager(&self) -> &Arc<ChangesetManager> {
        &self.manager
    }

    /// Whether rebase may overwrite concurrent changes silently
    pub fn ignores_conflicts(&self) -> bool {
        self.state.lock().ignore_conflicts
    }

    pub(crate) fn set_ignore_conflicts(&self, ignore: bool) {
        self.state.lock().ignore_conflicts = ignore;
    }

    /// Highest stamp of the versions this changeset is based on
    pub fn bumper(&self) -> Stamp {
        self.state.lock().bumper
    }

    fn bump_by(&self, stamp: Stamp) {
        let mut state = self.state.lock();
        if stamp > state.bumper {
            state.bumper = stamp;
        }
    }

    // === Reading ===

    /// Version this changeset owns for `handle`
    pub fn own_version(&self, handle: &ObjectHandle) -> Option<Arc<ObjectVersion>> {
        self.state
            .lock()
            .items
            .get(&handle.id())
            .map(|(_, v)| v.clone())
    }

    fn find(&self, handle: &ObjectHandle) -> Arc<ObjectVersion> {
        if let Some(editing) = handle.editing() {
            if editing.changeset().id() == self.id() {
                return editing;
            }
        }
        if let Some(own) = self.own_version(handle) {
            return own;
        }
        if let Some(parent) = &self.parent {
            return parent.find(handle);
        }
        let stamp = self.timestamp();
        let mut version = handle.applied();
        while !version.is_empty_sentinel() && version.timestamp() > stamp {
            version = version.former();
        }
        version
    }

    /// Version of `handle` visible to this changeset
    ///
    /// # Errors
    ///
    /// `NotAvailable` when the object did not exist yet at this snapshot.
    pub fn lookup(&self, handle: &ObjectHandle) -> Result<Arc<ObjectVersion>> {
        let version = self.find(handle);
        if version.is_empty_sentinel() {
            let detail = match handle.editing() {
                Some(editing) => format!(" (still held by {})", editing.changeset()),
                None => String::new(),
            };
            return Err(Error::NotAvailable {
                object: handle.to_string(),
                changeset: self.info.to_string(),
                detail,
            });
        }
        Ok(version)
    }

    /// Version of `handle` visible to `reader`, or the applied one
    pub fn visible(reader: Option<&Changeset>, handle: &ObjectHandle) -> Result<Arc<ObjectVersion>> {
        match reader {
            Some(reader) => reader.lookup(handle),
            None => {
                let applied = handle.applied();
                if applied.is_empty_sentinel() {
                    let detail = match handle.editing() {
                        Some(editing) => format!(" (still held by {})", editing.changeset()),
                        None => String::new(),
                    };
                    return Err(Error::NotAvailable {
                        object: handle.to_string(),
                        changeset: "applied state".to_string(),
                        detail,
                    });
                }
                Ok(applied)
            }
        }
    }

    // === Writing ===

    fn ensure_open(&self) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::Sealed {
                transaction: self.info.to_string(),
            });
        }
        Ok(())
    }

    fn adopt(&self, handle: &Arc<ObjectHandle>, version: Arc<ObjectVersion>) {
        handle.begin_edit(&version);
        self.state
            .lock()
            .items
            .insert(handle.id(), (handle.clone(), version));
    }

    /// Register a brand new object with its initial fields
    pub(crate) fn create_object(
        &self,
        handle: &Arc<ObjectHandle>,
        fields: impl IntoIterator<Item = (FieldKey, Value)>,
    ) -> Result<Arc<ObjectVersion>> {
        self.ensure_open()?;
        let data = fields
            .into_iter()
            .map(|(key, value)| (key, Arc::new(FieldVersion::new(value, self.id()))))
            .collect();
        let version = Arc::new(ObjectVersion::new(self.info.clone(), None, data, 1));
        version.mark_all_changed();
        self.adopt(handle, version.clone());
        if self.manager.log_changes() {
            debug!(object = %handle, changeset = %self.info, "object created");
        }
        Ok(version)
    }

    /// Own version of `handle`, derived from the visible one on first edit
    pub(crate) fn get_editable(&self, handle: &Arc<ObjectHandle>) -> Result<Arc<ObjectVersion>> {
        self.ensure_open()?;
        if let Some(own) = self.own_version(handle) {
            return Ok(own);
        }
        let visible = self.lookup(handle)?;
        if visible.is_disposed() {
            return Err(Error::Disposed {
                object: handle.to_string(),
            });
        }
        let version = Arc::new(ObjectVersion::new(
            self.info.clone(),
            Some(visible.clone()),
            visible.fields(),
            visible.revision() + 1,
        ));
        self.bump_by(visible.timestamp());
        self.adopt(handle, version.clone());
        Ok(version)
    }

    /// Write `value` into `key`
    ///
    /// Returns `false` when the visible content already equals `value`.
    /// Writing back the former content restores the former field version and
    /// drops the change mark.
    pub(crate) fn set_field(
        &self,
        handle: &Arc<ObjectHandle>,
        key: FieldKey,
        value: Value,
    ) -> Result<bool> {
        self.ensure_open()?;
        let visible = match self.own_version(handle) {
            Some(own) => own,
            None => self.lookup(handle)?,
        };
        if visible.is_disposed() {
            return Err(Error::Disposed {
                object: handle.to_string(),
            });
        }
        if visible.field(&key).map_or(false, |f| *f.content() == value) {
            return Ok(false);
        }
        let version = self.get_editable(handle)?;
        match version.former().field(&key) {
            Some(former) if *former.content() == value => {
                version.restore_field(&key, Some(former));
            }
            _ => {
                if self.manager.log_changes() {
                    debug!(object = %handle, field = %key, value = %value, changeset = %self.info, "field changed");
                }
                version.put_field(key, Arc::new(FieldVersion::new(value, self.id())));
            }
        }
        Ok(true)
    }

    /// Mark `handle` disposed in this changeset
    pub(crate) fn dispose(&self, handle: &Arc<ObjectHandle>) -> Result<()> {
        self.ensure_open()?;
        if let Some(own) = self.own_version(handle) {
            if own.is_disposed() {
                return Ok(());
            }
        }
        let version = self.get_editable(handle)?;
        version.mark_disposed();
        if self.manager.log_changes() {
            debug!(object = %handle, changeset = %self.info, "object disposed");
        }
        Ok(())
    }

    /// Objects this changeset has versions of
    pub fn changed_objects(&self) -> Vec<Arc<ObjectHandle>> {
        self.state
            .lock()
            .items
            .values()
            .map(|(h, _)| h.clone())
            .collect()
    }

    fn items(&self) -> Vec<(Arc<ObjectHandle>, Arc<ObjectVersion>)> {
        self.state.lock().items.values().cloned().collect()
    }

    // === Launches ===

    /// Keep `launch` provisional until this changeset applies
    pub fn record_launch(&self, launch: Arc<Launch>) {
        let previous = {
            let mut state = self.state.lock();
            if state.finished {
                drop(state);
                launch.unsubscribe();
                return;
            }
            state
                .launches
                .insert(launch.observer().id(), launch.clone())
        };
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &launch) {
                previous.unsubscribe();
            }
        }
    }

    /// Provisional launch of `observer`, searching parents too
    pub fn launch_for(&self, observer: ObserverId) -> Option<Arc<Launch>> {
        if let Some(launch) = self.state.lock().launches.get(&observer) {
            return Some(launch.clone());
        }
        self.parent.as_ref().and_then(|p| p.launch_for(observer))
    }

    /// Drop every provisional launch and its subscriptions
    pub(crate) fn revoke_subscriptions(&self) {
        let launches: Vec<Arc<Launch>> = {
            let mut state = self.state.lock();
            state.launches.drain().map(|(_, l)| l).collect()
        };
        for launch in launches {
            launch.unsubscribe();
        }
    }

    // === Completion ===

    pub(crate) fn seal(&self) {
        self.info.seal();
    }

    /// Move every version onto the latest one and collect conflicts
    pub(crate) fn rebase(&self) -> Vec<FieldConflict> {
        let equality = self.manager.content_equality();
        let ignore = self.ignores_conflicts();
        let mut conflicts = Vec::new();
        for (handle, ours) in self.items() {
            let head = match &self.parent {
                Some(parent) => parent.find(&handle),
                None => handle.applied(),
            };
            if !Arc::ptr_eq(&ours.former(), &head) {
                conflicts.extend(self.merge(&handle, &ours, head, equality, ignore));
            }
        }
        conflicts
    }

    fn merge(
        &self,
        handle: &ObjectHandle,
        ours: &ObjectVersion,
        theirs: Arc<ObjectVersion>,
        equality: ContentEquality,
        ignore_conflicts: bool,
    ) -> Vec<FieldConflict> {
        let base = ours.former();
        let our_data = ours.fields();
        let mut merged = theirs.fields();
        let mut conflicting = Vec::new();
        for key in ours.changes() {
            let our_field = our_data.get(&key).cloned();
            let their_field = theirs.field(&key);
            let base_field = base.field(&key);
            let theirs_changed = match (&their_field, &base_field) {
                (Some(t), Some(b)) => !Arc::ptr_eq(t, b),
                (None, None) => false,
                _ => true,
            };
            if theirs_changed && !ignore_conflicts {
                let same = match (&our_field, &their_field) {
                    (Some(o), Some(t)) => equality(o.content(), t.content()),
                    (None, None) => true,
                    _ => false,
                };
                if !same {
                    conflicting.push(Some(key.clone()));
                }
            }
            match our_field {
                Some(field) => {
                    merged.insert(key, field);
                }
                None => {
                    merged.remove(&key);
                }
            }
        }
        if ours.is_disposed() != theirs.is_disposed() && !ignore_conflicts {
            conflicting.push(None);
        }
        self.bump_by(theirs.timestamp());
        if self.manager.log_transactions() {
            debug!(
                object = %handle,
                changeset = %self.info,
                onto = %theirs.changeset(),
                conflicts = conflicting.len(),
                "rebased object version"
            );
        }
        ours.rebased(theirs, merged, conflicting.clone());
        conflicting
            .into_iter()
            .map(|field| FieldConflict {
                object: handle.id(),
                hint: handle.hint().to_string(),
                field,
            })
            .collect()
    }

    /// Publish every version and return the reactive observers to re-run
    pub(crate) fn apply(&self) -> Vec<Arc<Observer>> {
        let (items, launches, bumper) = {
            let state = self.state.lock();
            (
                state.items.values().cloned().collect::<Vec<_>>(),
                state.launches.values().cloned().collect::<Vec<_>>(),
                state.bumper,
            )
        };
        let stamp = if bumper > BOOT_STAMP {
            self.manager.allocate_stamp()
        } else {
            bumper + 1
        };
        self.info.set_timestamp(stamp);

        let mut reactions = Vec::new();
        for (handle, version) in &items {
            let former = version.former();
            handle.set_applied(version.clone());
            handle.end_edit(version);
            let disposed = version.is_disposed();
            let keys: BTreeSet<FieldKey> = if disposed {
                former.keys().into_iter().chain(version.keys()).collect()
            } else {
                version.changes()
            };
            for key in keys {
                let Some(previous) = former.field(&key) else {
                    continue;
                };
                let replaced = version
                    .field(&key)
                    .map_or(true, |current| !Arc::ptr_eq(&current, &previous));
                if !replaced && !disposed {
                    continue;
                }
                let cause = if disposed {
                    ObsoleteCause::Disposed {
                        object: handle.to_string(),
                        changeset: self.info.to_string(),
                    }
                } else {
                    ObsoleteCause::FieldChanged {
                        object: handle.to_string(),
                        field: key.clone(),
                        changeset: self.info.to_string(),
                    }
                };
                for launch in previous.subscribers() {
                    launch.mark_obsolete(stamp, cause.clone(), Some(self.id()), &mut reactions);
                }
            }
        }
        for launch in launches {
            let observer = launch.observer().clone();
            observer.install(launch, stamp, Some(self.id()), &mut reactions);
        }
        self.state.lock().finished = true;
        if self.manager.log_transactions() {
            debug!(
                changeset = %self.info,
                stamp = stamp,
                objects = items.len(),
                reactions = reactions.len(),
                "changeset applied"
            );
        }
        reactions
    }

    /// Merge every version and launch into the parent changeset
    pub(crate) fn migrate_into_parent(&self) {
        let Some(parent) = self.parent.clone() else {
            return;
        };
        let (items, launches, bumper) = {
            let mut state = self.state.lock();
            (
                state.items.values().cloned().collect::<Vec<_>>(),
                state.launches.drain().map(|(_, l)| l).collect::<Vec<_>>(),
                state.bumper,
            )
        };
        for (handle, ours) in items {
            handle.end_edit(&ours);
            match parent.own_version(&handle) {
                Some(theirs) => {
                    let data = ours.fields();
                    for key in ours.changes() {
                        match data.get(&key) {
                            Some(field) => theirs.put_field(key, field.clone()),
                            None => {
                                theirs.restore_field(&key, None);
                                theirs.mark_changed([key]);
                            }
                        }
                    }
                    if ours.is_disposed() {
                        theirs.mark_disposed();
                    }
                }
                None => {
                    let former = ours.former();
                    let former = if former.is_empty_sentinel() {
                        None
                    } else {
                        Some(former)
                    };
                    let version = Arc::new(ObjectVersion::new(
                        parent.info.clone(),
                        former,
                        ours.fields(),
                        ours.revision(),
                    ));
                    version.mark_changed(ours.changes());
                    parent.adopt(&handle, version);
                }
            }
        }
        parent.bump_by(bumper);
        for launch in launches {
            parent.record_launch(launch);
        }
        self.state.lock().finished = true;
        if self.manager.log_transactions() {
            debug!(changeset = %self.info, parent = %parent.info, "nested changeset merged");
        }
    }

    /// Drop every version and provisional launch
    pub(crate) fn discard(&self) {
        for (handle, version) in self.items() {
            handle.end_edit(&version);
        }
        self.revoke_subscriptions();
        self.state.lock().finished = true;
        if self.manager.log_transactions() {
            debug!(changeset = %self.info, "changeset discarded");
        }
    }

    /// Unlink the history behind every version, returning how many were cut
    pub(crate) fn unlink_history(&self) -> usize {
        let mut unlinked = 0;
        for (_, version) in self.items() {
            if version.has_former() {
                version.set_former(None);
                unlinked += 1;
            }
        }
        unlinked
    }

    /// Field changes of objects that existed before this changeset
    ///
    /// Created and disposed objects are left out.
    pub fn patch_set(&self) -> PatchSet {
        let mut patch = PatchSet::new();
        for (handle, version) in self.items() {
            let former = version.former();
            if former.is_empty_sentinel() || version.is_disposed() {
                continue;
            }
            for key in version.changes() {
                let fresh = version
                    .field(&key)
                    .map(|f| f.content().clone())
                    .unwrap_or_default();
                let previous = former
                    .field(&key)
                    .map(|f| f.content().clone())
                    .unwrap_or_default();
                patch.record(&handle, key, fresh, previous);
            }
        }
        patch
    }
}

impl fmt::Display for Changeset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.info, f)
    }
}

impl fmt::Debug for Changeset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Changeset")
            .field("id", &self.info.id())
            .field("hint", &self.info.hint())
            .field("timestamp", &self.info.timestamp())
            .field("sealed", &self.info.is_sealed())
            .field("finished", &state.finished)
            .field("objects", &state.items.len())
            .field("launches", &state.launches.len())
            .finish()
    }
}
