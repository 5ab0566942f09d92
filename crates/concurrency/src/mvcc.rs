//! Observable objects
//!
//! `ObservableObject` is the accessor every field read and write goes
//! through. Reads resolve the version visible to the current transaction
//! (or the applied one outside of transactions) and are recorded as
//! dependencies of the running observer. Writes go into the current
//! transaction's changeset.
//!
//! Transactional objects share the same machinery but their reads are never
//! recorded; raw fields of observable objects behave the same way.

use crate::changeset::Changeset;
use crate::context;
use crate::version::{ObjectHandle, ObjectVersion};
use ripple_core::{Error, FieldKey, ObjectId, Result, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Builder for a new object
#[derive(Debug, Clone)]
pub struct ObjectBuilder {
    hint: String,
    observable: bool,
    fields: Vec<(FieldKey, Value)>,
    raw: BTreeSet<FieldKey>,
}

impl ObjectBuilder {
    /// Make the object transactional only: reads are never tracked
    pub fn transactional(mut self) -> Self {
        self.observable = false;
        self
    }

    /// Add a tracked field with its initial value
    pub fn field(mut self, key: impl Into<FieldKey>, value: impl Into<Value>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    /// Add a field whose reads are never tracked
    pub fn raw_field(mut self, key: impl Into<FieldKey>, value: impl Into<Value>) -> Self {
        let key = key.into();
        self.raw.insert(key.clone());
        self.fields.push((key, value.into()));
        self
    }

    /// Create the object in the current transaction
    ///
    /// # Errors
    ///
    /// `OutsideTransaction` when no transaction is current, `SideEffect`
    /// inside a cached operation.
    pub fn build(self) -> Result<ObservableObject> {
        let hint = self.hint;
        let transaction = context::writable_transaction(|| format!("new {hint}"))?;
        let changeset = transaction.changeset();
        let handle = Arc::new(ObjectHandle::new(
            changeset.manager().next_object_id(),
            hint,
            self.observable,
            self.raw,
        ));
        changeset.create_object(&handle, self.fields)?;
        Ok(ObservableObject { handle })
    }
}

/// Accessor for one logical object
#[derive(Clone)]
pub struct ObservableObject {
    handle: Arc<ObjectHandle>,
}

impl ObservableObject {
    /// Start building an observable object
    pub fn builder(hint: impl Into<String>) -> ObjectBuilder {
        ObjectBuilder {
            hint: hint.into(),
            observable: true,
            fields: Vec::new(),
            raw: BTreeSet::new(),
        }
    }

    /// Create an observable object with `fields` in the current transaction
    pub fn new<K, V>(hint: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<FieldKey>,
        V: Into<Value>,
    {
        fields
            .into_iter()
            .fold(Self::builder(hint), |b, (k, v)| b.field(k, v))
            .build()
    }

    /// Create a transactional-only object with `fields` in the current
    /// transaction
    pub fn transactional<K, V>(
        hint: impl Into<String>,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self>
    where
        K: Into<FieldKey>,
        V: Into<Value>,
    {
        fields
            .into_iter()
            .fold(Self::builder(hint).transactional(), |b, (k, v)| b.field(k, v))
            .build()
    }

    /// Accessor for an existing handle
    pub fn from_handle(handle: Arc<ObjectHandle>) -> Self {
        Self { handle }
    }

    /// Object id
    pub fn id(&self) -> ObjectId {
        self.handle.id()
    }

    /// Hint given at creation
    pub fn hint(&self) -> &str {
        self.handle.hint()
    }

    /// Underlying handle
    pub fn handle(&self) -> &Arc<ObjectHandle> {
        &self.handle
    }

    fn visible(&self) -> Result<Arc<ObjectVersion>> {
        let transaction = context::current_transaction();
        Changeset::visible(transaction.as_ref().map(|t| t.changeset().as_ref()), &self.handle)
    }

    fn live(&self) -> Result<Arc<ObjectVersion>> {
        let version = self.visible()?;
        if version.is_disposed() {
            return Err(Error::Disposed {
                object: self.handle.to_string(),
            });
        }
        Ok(version)
    }

    /// Read `key`; missing fields read as `Null`
    ///
    /// The read is recorded as a dependency of the running observer unless
    /// the object or the field is untracked.
    ///
    /// # Errors
    ///
    /// `NotAvailable` when the object is not visible yet, `Disposed` after
    /// disposal.
    pub fn get(&self, key: &str) -> Result<Value> {
        let version = self.live()?;
        let Some(field) = version.field(key) else {
            return Ok(Value::Null);
        };
        if self.handle.is_tracked(key) {
            if let Some(recorder) = context::current().recorder() {
                recorder.record_field(&self.handle, &FieldKey::from(key), &field);
            }
        }
        Ok(field.content().clone())
    }

    /// Write `value` into `key` in the current transaction
    ///
    /// # Errors
    ///
    /// `OutsideTransaction`, `SideEffect`, `InspectionMode`, `Sealed` or
    /// `Disposed`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let transaction = context::writable_transaction(|| format!("{}.{}", self.handle, key))?;
        transaction
            .changeset()
            .set_field(&self.handle, FieldKey::from(key), value.into())?;
        Ok(())
    }

    /// Whether the visible version has `key`
    pub fn has(&self, key: &str) -> Result<bool> {
        Ok(self.live()?.field(key).is_some())
    }

    /// Field names of the visible version
    pub fn keys(&self) -> Result<Vec<FieldKey>> {
        Ok(self.live()?.keys())
    }

    /// Plain copy of every visible field, not recorded as a dependency
    pub fn snapshot(&self) -> Result<BTreeMap<String, Value>> {
        let version = self.live()?;
        Ok(version
            .fields()
            .into_iter()
            .map(|(k, f)| (k.as_str().to_string(), f.content().clone()))
            .collect())
    }

    /// Dispose the object in the current transaction
    pub fn dispose(&self) -> Result<()> {
        let transaction = context::writable_transaction(|| format!("{} (dispose)", self.handle))?;
        transaction.changeset().dispose(&self.handle)
    }

    /// Whether the visible version is disposed
    pub fn is_disposed(&self) -> bool {
        self.visible().map_or(false, |v| v.is_disposed())
    }

    /// Edit counter of the visible version (negative once disposed)
    pub fn revision(&self) -> Result<i64> {
        Ok(self.visible()?.revision())
    }
}

impl PartialEq for ObservableObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl Eq for ObservableObject {}

impl fmt::Display for ObservableObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.handle, f)
    }
}

impl fmt::Debug for ObservableObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObservableObject")
            .field(&self.handle.to_string())
            .finish()
    }
}
