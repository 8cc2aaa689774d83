//! # Configuration Tests
//!
//! Defaults, partial JSON deserialization, file loading, and validation errors.

use std::io::Write;

use coherence_core::common::ConfigError;
use coherence_core::config::*;
use rstest::rstest;

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.general.line_bytes, 64);
    assert_eq!(config.protocol.num_sharers_bits, 2);
    assert_eq!(config.protocol.sharer_slots(), 4);
    assert_eq!(config.protocol.active_reqs, 4);
    assert_eq!(config.protocol.opcode_bits, 4);
    assert!(config.node.collision_guard);
    assert!(!config.node.upper_level_inclusion);
    assert!(config.validate().is_ok());
}

#[test]
fn test_memory_config_defaults() {
    let memory = MemoryConfig::default();
    assert_eq!(memory.controller, MemoryController::Simple);
    assert_eq!(memory.latency, 10);
    assert_eq!(memory.t_cas, 14);
    assert_eq!(memory.t_ras, 14);
    assert_eq!(memory.t_pre, 14);
}

#[test]
fn test_empty_json_takes_defaults() {
    let config = Config::from_json_str("{}").unwrap();
    assert_eq!(config.directory.sets, 64);
    assert_eq!(config.directory.ways, 4);
    assert_eq!(config.node.count, 4);
    assert_eq!(config.network.hop_latency, 2);
}

#[test]
fn test_enum_aliases() {
    let json = r#"{
        "directory": { "policy": "RANDOM" },
        "node": { "policy": "Lru" },
        "memory": { "controller": "DRAM" }
    }"#;
    let config = Config::from_json_str(json).unwrap();
    assert_eq!(config.directory.policy, ReplacementPolicy::Random);
    assert_eq!(config.node.policy, ReplacementPolicy::Lru);
    assert_eq!(config.memory.controller, MemoryController::Dram);
}

#[test]
fn test_malformed_json_is_parse_error() {
    let err = Config::from_json_str("{ \"protocol\": ").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "protocol": {{ "num_sharers_bits": 3 }} }}"#).unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.protocol.sharer_slots(), 8);
}

#[test]
fn test_from_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::from_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[rstest]
#[case::line_bytes(r#"{ "general": { "line_bytes": 48 } }"#, "general.line_bytes")]
#[case::dir_sets(r#"{ "directory": { "sets": 3 } }"#, "directory.sets")]
#[case::dir_ways(r#"{ "directory": { "ways": 0 } }"#, "directory.ways")]
#[case::node_sets(r#"{ "node": { "sets": 0 } }"#, "node.sets")]
#[case::node_queue(r#"{ "node": { "request_queue": 0 } }"#, "node.request_queue")]
#[case::dir_outbound(r#"{ "directory": { "outbound_queue": 0 } }"#, "directory.outbound_queue")]
fn test_geometry_rejected(#[case] json: &str, #[case] expected: &str) {
    match Config::from_json_str(json) {
        Err(ConfigError::Geometry { field, .. }) => assert_eq!(field, expected),
        other => panic!("expected geometry error for {expected}, got {other:?}"),
    }
}

#[rstest]
#[case::sharer_bits(r#"{ "protocol": { "num_sharers_bits": 7 } }"#, "protocol.num_sharers_bits")]
#[case::active_reqs(r#"{ "protocol": { "active_reqs": 0 } }"#, "protocol.active_reqs")]
#[case::opcode_narrow(r#"{ "protocol": { "opcode_bits": 3 } }"#, "protocol.opcode_bits")]
#[case::opcode_wide(r#"{ "protocol": { "opcode_bits": 9 } }"#, "protocol.opcode_bits")]
#[case::no_nodes(r#"{ "node": { "count": 0 } }"#, "node.count")]
fn test_out_of_range_rejected(#[case] json: &str, #[case] expected: &str) {
    match Config::from_json_str(json) {
        Err(ConfigError::OutOfRange { field, .. }) => assert_eq!(field, expected),
        other => panic!("expected range error for {expected}, got {other:?}"),
    }
}

#[test]
fn test_single_sharer_slot_is_valid() {
    let config = Config::from_json_str(r#"{ "protocol": { "num_sharers_bits": 0 } }"#).unwrap();
    assert_eq!(config.protocol.sharer_slots(), 1);
}
