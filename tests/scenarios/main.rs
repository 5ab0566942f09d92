//! End-to-End Scenarios
//!
//! Whole-system walkthroughs: the render cache over a person, nested
//! transaction visibility, configuration files and randomized properties.

#[path = "../common/mod.rs"]
mod common;

mod config_file;
mod hello_person;
mod properties;
