//! Patch sets: the field changes of one applied transaction
//!
//! Each entry keeps the fresh and the former content of one field, so a
//! patch can be replayed forward (redo) or inverted and replayed backward
//! (undo) through the ordinary write path.

use crate::mvcc::ObservableObject;
use crate::version::ObjectHandle;
use ripple_core::{FieldKey, ObjectId, Result, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Fresh and former content of one field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPatch {
    /// Content after the change
    pub fresh: Value,
    /// Content before the change
    pub former: Value,
}

/// Field changes of one object
#[derive(Debug, Clone)]
pub struct ObjectPatch {
    handle: Arc<ObjectHandle>,
    fields: BTreeMap<FieldKey, FieldPatch>,
}

impl ObjectPatch {
    /// Changed object
    pub fn handle(&self) -> &Arc<ObjectHandle> {
        &self.handle
    }

    /// Changed fields
    pub fn fields(&self) -> &BTreeMap<FieldKey, FieldPatch> {
        &self.fields
    }
}

/// Field changes of several objects
#[derive(Debug, Clone, Default)]
pub struct PatchSet {
    objects: BTreeMap<ObjectId, ObjectPatch>,
}

impl PatchSet {
    /// Empty patch set
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of objects changed
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Record one field change
    pub fn record(&mut self, handle: &Arc<ObjectHandle>, key: FieldKey, fresh: Value, former: Value) {
        self.objects
            .entry(handle.id())
            .or_insert_with(|| ObjectPatch {
                handle: handle.clone(),
                fields: BTreeMap::new(),
            })
            .fields
            .insert(key, FieldPatch { fresh, former });
    }

    /// Recorded change of `key` on `object`
    pub fn get(&self, object: ObjectId, key: &str) -> Option<&FieldPatch> {
        self.objects.get(&object).and_then(|o| o.fields.get(key))
    }

    /// Changed objects in id order
    pub fn objects(&self) -> impl Iterator<Item = &ObjectPatch> {
        self.objects.values()
    }

    /// Patch set that reverts this one
    pub fn inverted(&self) -> PatchSet {
        let objects = self
            .objects
            .iter()
            .map(|(id, patch)| {
                let fields = patch
                    .fields
                    .iter()
                    .map(|(key, field)| {
                        (
                            key.clone(),
                            FieldPatch {
                                fresh: field.former.clone(),
                                former: field.fresh.clone(),
                            },
                        )
                    })
                    .collect();
                (
                    *id,
                    ObjectPatch {
                        handle: patch.handle.clone(),
                        fields,
                    },
                )
            })
            .collect();
        PatchSet { objects }
    }

    /// Write every fresh value in the current transaction
    ///
    /// Disposed objects are skipped.
    ///
    /// # Errors
    ///
    /// Whatever the writes fail with (`OutsideTransaction` in particular).
    pub fn apply(&self) -> Result<()> {
        for patch in self.objects.values() {
            let object = ObservableObject::from_handle(patch.handle.clone());
            if object.is_disposed() {
                continue;
            }
            for (key, field) in &patch.fields {
                object.set(key.as_str(), field.fresh.clone())?;
            }
        }
        Ok(())
    }
}
