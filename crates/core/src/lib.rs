//! Core types for ripple
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: content of one field version, also the result of operations
//! - ObjectId / ChangesetId / ObserverId / FieldKey / Stamp: identities
//! - Kind / Isolation / Reentrance / Throttling: operation options
//! - LoggingOptions / ProfilingOptions: diagnostics switches
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod options;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use options::{Isolation, Kind, LoggingOptions, ProfilingOptions, Reentrance, Throttling};
pub use types::{
    ChangesetId, FieldConflict, FieldKey, ObjectId, ObserverId, Stamp, BOOT_STAMP, FIRST_STAMP,
    UNDEFINED_STAMP,
};
pub use value::{structural_equality, ContentEquality, Value};
