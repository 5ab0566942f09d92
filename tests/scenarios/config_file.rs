//! Configuration File Scenario
//!
//! - A system loads `ripple.toml` and applies its sections
//! - A freshly written default file yields the default system
//! - Broken files surface as configuration errors

use crate::common::*;
use ripple::{EngineConfig, CONFIG_FILE_NAME};
use tempfile::TempDir;

#[test]
fn system_applies_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        "[logging]\nenabled = true\nchanges = true\n\n[reactions]\nmax_rounds = 7\n",
    )
    .unwrap();

    let system = ReactiveSystem::from_config_file(&path).unwrap();
    assert!(system.logging().enabled);
    assert!(system.logging().changes);
    assert!(!system.profiling().enabled);
    assert_eq!(system.config().reactions.max_rounds, 7);

    // logging on does not change behaviour
    let p = person(&system, "John", 38);
    write(&system, &p, "age", 39);
    assert_eq!(int(&p, "age"), 39);
}

#[test]
fn default_file_gives_default_system() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    EngineConfig::write_default_if_missing(&path).unwrap();

    let system = ReactiveSystem::from_config_file(&path).unwrap();
    assert_eq!(system.config(), EngineConfig::default());
}

#[test]
fn saved_config_round_trips_through_system() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);

    let system = ReactiveSystem::new();
    let mut profiling = system.profiling();
    profiling.enabled = true;
    profiling.async_action_duration_warning_threshold_ms = 1000;
    system.set_profiling_mode(profiling);
    system.config().write_to_file(&path).unwrap();

    let reloaded = ReactiveSystem::from_config_file(&path).unwrap();
    assert_eq!(reloaded.config(), system.config());
    assert_eq!(reloaded.profiling().async_action_duration_warning_threshold_ms, 1000);
}

#[test]
fn broken_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "[logging\nenabled = yes").unwrap();

    let err = ReactiveSystem::from_config_file(&path).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains(CONFIG_FILE_NAME));
}
