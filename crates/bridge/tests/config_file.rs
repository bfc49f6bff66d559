//! Loading bridge configuration from disk

mod common;

use stackbridge::{Bridge, BridgeConfig, ConfigError, GuestStack, HostValue, SequenceBase, Vm};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_config_file() {
    common::init_tracing();
    let file = write_config("max_depth = 8\nsequence_base = \"zero\"\narena_limit = 65536\n");
    let config = BridgeConfig::load(file.path()).unwrap();
    assert_eq!(config.max_depth, 8);
    assert_eq!(config.sequence_base, SequenceBase::Zero);
    assert_eq!(config.arena_limit, Some(65536));
    assert!(config.cycle_guard);
}

#[test]
fn test_bridge_uses_loaded_config() {
    common::init_tracing();
    let file = write_config("sequence_base = \"zero\"\nnumbers = \"float\"\n");
    let bridge = Bridge::from_config_file(file.path()).unwrap();
    let mut vm = Vm::new();
    bridge
        .push(&mut vm, &HostValue::from(vec!["first"]))
        .unwrap();
    let value = bridge.extract(&mut vm, -1).unwrap();
    let map = value.as_map().unwrap();
    let (key, _) = map.iter().next().unwrap();
    assert!(matches!(key, HostValue::Float(f) if *f == 0.0));
    assert_eq!(vm.top(), 1);
}

#[test]
fn test_invalid_config_file() {
    common::init_tracing();
    let file = write_config("max_depth = \"deep\"\n");
    assert!(matches!(
        BridgeConfig::load(file.path()),
        Err(ConfigError::Parse(_))
    ));

    let file = write_config("max_depth = 0\n");
    let err = Bridge::from_config_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert_eq!(err.to_string(), "invalid config: max_depth must be at least 1");
}
