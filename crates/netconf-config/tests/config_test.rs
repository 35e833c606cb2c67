#![allow(clippy::unwrap_used)]

use std::time::Duration;

use netconf_config::{
    Config, ConfigError, DeviceProfile, load_config_from, resolve_address, save_config_to,
};
use netconf_proto::ProtocolCapability;
use pretty_assertions::assert_eq;

const SAMPLE: &str = r#"
default_device = "edge"

[defaults]
request_timeout = 15

[devices.edge]
host = "127.0.0.1"
port = 2830
lock = false
capabilities = ["urn:ietf:params:netconf:capability:notification:1.0"]

[devices.core]
host = "127.0.0.2"
base_1_1 = false
request_timeout = 90
"#;

fn write_sample(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();
    path
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&dir.path().join("absent.toml")).unwrap();

    assert!(config.devices.is_empty());
    assert_eq!(config.defaults.port, 830);
    assert_eq!(config.defaults.request_timeout, 60);
    assert!(config.defaults.lock);
}

#[test]
fn test_default_profile_resolves_with_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&write_sample(&dir)).unwrap();

    let resolved = config.resolve(None).unwrap();
    assert_eq!(resolved.id.name(), "edge");
    assert_eq!(resolved.id.address(), "127.0.0.1:2830".parse().unwrap());
    assert_eq!(resolved.session.request_timeout, Duration::from_secs(15));
    assert_eq!(resolved.session.negotiation_timeout, Duration::from_secs(20));
    assert!(resolved.session.capabilities.supports(ProtocolCapability::Base11));
    assert!(
        resolved
            .session
            .capabilities
            .supports(ProtocolCapability::Notification)
    );
    assert!(!resolved.device.lock_allowed);
    assert!(resolved.device.validate_before_commit);
}

#[test]
fn test_named_profile_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&write_sample(&dir)).unwrap();

    let resolved = config.resolve(Some("core")).unwrap();
    assert_eq!(resolved.id.address().port(), 830);
    assert_eq!(resolved.session.request_timeout, Duration::from_secs(90));
    assert!(!resolved.session.capabilities.supports(ProtocolCapability::Base11));
    assert!(resolved.device.lock_allowed);
}

#[test]
fn test_unknown_and_missing_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&write_sample(&dir)).unwrap();
    assert!(matches!(
        config.resolve(Some("nope")),
        Err(ConfigError::UnknownProfile { .. })
    ));

    let empty = Config::default();
    assert!(matches!(empty.resolve(None), Err(ConfigError::NoDevice)));
}

#[test]
fn test_invalid_capability_is_rejected() {
    let mut config = Config::default();
    config.devices.insert(
        "bad".into(),
        DeviceProfile {
            host: "127.0.0.1".into(),
            capabilities: vec!["urn:with space".into()],
            ..DeviceProfile::default()
        },
    );
    let err = config.resolve(Some("bad")).unwrap_err();
    assert!(matches!(err, ConfigError::Validation { ref field, .. } if field.contains("capabilities")));
}

#[test]
fn test_empty_host_is_rejected() {
    assert!(matches!(
        resolve_address("  ", 830),
        Err(ConfigError::Validation { .. })
    ));
    assert_eq!(
        resolve_address("127.0.0.1", 22).unwrap(),
        "127.0.0.1:22".parse().unwrap()
    );
}

#[test]
fn test_saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config {
        default_device: Some("lab".into()),
        ..Config::default()
    };
    config.devices.insert(
        "lab".into(),
        DeviceProfile {
            host: "127.0.0.1".into(),
            port: Some(10830),
            validate: Some(false),
            ..DeviceProfile::default()
        },
    );
    save_config_to(&config, &path).unwrap();

    let loaded = load_config_from(&path).unwrap();
    let resolved = loaded.resolve(None).unwrap();
    assert_eq!(resolved.id.address().port(), 10830);
    assert!(!resolved.device.validate_before_commit);
}
