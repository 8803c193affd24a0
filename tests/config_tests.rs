// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use frame_fanout::constants;
use frame_fanout::gpu::software::SoftwareDriver;
use frame_fanout::{ContextFlags, EngineConfig, EngineError, RendererHolder};
use std::io::Write;

#[test]
fn test_config_default() {
    let config = EngineConfig::default();
    assert_eq!((config.width, config.height), (640, 480));
    assert_eq!(config.max_client_version, constants::MAX_CLIENT_VERSION);
    assert_eq!(
        config.flags,
        ContextFlags::from_bits(constants::flags::RECORDABLE),
        "Only the recordable flag should be set by default"
    );
    assert_eq!(config.thread_name, "RendererHolder");
}

#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "width": 1280, "height": 720, "max_client_version": 2, "thread_name": "fanout" }}"#
    )
    .unwrap();

    let config = EngineConfig::from_json_file(file.path()).unwrap();
    assert_eq!((config.width, config.height), (1280, 720));
    assert_eq!(config.max_client_version, 2);
    assert_eq!(config.thread_name, "fanout");
    // Missing fields keep their defaults
    assert_eq!(
        config.command_queue_capacity,
        constants::DEFAULT_QUEUE_CAPACITY
    );
}

#[test]
fn test_config_out_of_range_values_normalized() {
    let config = EngineConfig::from_json_str(
        r#"{ "width": 0, "height": 100, "max_client_version": 9, "capture_poll_ms": 0 }"#,
    )
    .unwrap();
    assert_eq!((config.width, config.height), (640, 480));
    assert_eq!(config.max_client_version, 3);
    assert_eq!(config.capture_poll(), constants::CAPTURE_POLL_INTERVAL);
}

#[test]
fn test_config_invalid_json() {
    assert!(matches!(
        EngineConfig::from_json_str("{ width: "),
        Err(EngineError::InvalidArgument(_))
    ));
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        EngineConfig::from_json_file(dir.path().join("missing.json")),
        Err(EngineError::InvalidArgument(_))
    ));
}

#[test]
fn test_config_round_trip_through_json() {
    let mut config = EngineConfig::default();
    config.flags = ContextFlags::from_bits(
        constants::flags::DEPTH_BUFFER | constants::flags::STENCIL_8BIT,
    );
    let json = config.to_json_pretty().unwrap();
    let parsed = EngineConfig::from_json_str(&json).unwrap();
    assert_eq!(parsed.flags.bits(), 0x21);
    assert_eq!(parsed.flags.stencil_bits(), 8);
}

#[test]
fn test_engine_uses_configured_size() {
    let config = EngineConfig::from_json_str(r#"{ "width": 320, "height": 200 }"#).unwrap();
    let holder = RendererHolder::builder(SoftwareDriver::new())
        .config(config)
        .build()
        .unwrap();
    assert_eq!(holder.size(), (320, 200));
    assert_eq!(holder.input_surface().unwrap().default_size(), (320, 200));
    assert_eq!(holder.config().thread_name, "RendererHolder");
    holder.release();
}

#[test]
fn test_capture_quality_clamped() {
    assert_eq!(constants::clamp_capture_quality(50), 50);
    assert_eq!(constants::clamp_capture_quality(0), 90);
    assert_eq!(constants::clamp_capture_quality(100), 90);
}
