//! Identifiers and stamps
//!
//! - `ObjectId`: identity of one logical observable object
//! - `ChangesetId`: identity of one changeset (and of its transaction)
//! - `ObserverId`: identity of one operation's observer
//! - `FieldKey`: name of a field inside an object
//! - `Stamp`: revision timestamp ordering changesets

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Revision timestamp of a changeset
pub type Stamp = u64;

/// Stamp of the boot changeset that owns the empty sentinel version
pub const BOOT_STAMP: Stamp = 100;

/// First stamp handed out to a freshly acquired changeset
pub const FIRST_STAMP: Stamp = BOOT_STAMP + 1;

/// Stamp of a changeset that has not been acquired yet
pub const UNDEFINED_STAMP: Stamp = u64::MAX;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw id
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw numeric value
            pub const fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

numeric_id!(
    /// Identity of one logical object across its lifetime
    ObjectId,
    "#"
);
numeric_id!(
    /// Identity of a changeset; transactions are named after their changeset
    ChangesetId,
    "T"
);
numeric_id!(
    /// Identity of one operation's observer
    ObserverId,
    "O"
);

/// Name of a field
///
/// Cheap to clone; borrows as `str` so maps keyed by `FieldKey` can be
/// queried with plain string slices.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldKey(Arc<str>);

impl FieldKey {
    /// Create a field key
    pub fn new(name: &str) -> Self {
        FieldKey(Arc::from(name))
    }

    /// Field name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for FieldKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldKey {
    fn from(s: &str) -> Self {
        FieldKey::new(s)
    }
}

impl From<String> for FieldKey {
    fn from(s: String) -> Self {
        FieldKey(Arc::from(s))
    }
}

impl From<&FieldKey> for FieldKey {
    fn from(k: &FieldKey) -> Self {
        k.clone()
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One field (or the disposal state) of one object found in conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldConflict {
    /// Conflicting object
    pub object: ObjectId,
    /// Object hint for diagnostics
    pub hint: String,
    /// Conflicting field, `None` when the sides disagree on disposal
    pub field: Option<FieldKey>,
}

impl fmt::Display for FieldConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(key) => write!(f, "{}{}.{}", self.hint, self.object, key),
            None => write!(f, "{}{} (disposal)", self.hint, self.object),
        }
    }
}
