//! Device profiles for NETCONF tools.
//!
//! A TOML file of named `[devices.<name>]` profiles, merged with
//! defaults and `NETCONF_`-prefixed environment variables, resolved
//! into the runtime types of `netconf_core`.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use netconf_core::{DeviceConfig, RemoteDeviceId, SessionConfig};
use netconf_proto::{Capability, CapabilitySet, FramingLimits, ProtocolCapability};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no device profile named '{profile}'")]
    UnknownProfile { profile: String },

    #[error("no device selected and no default_device configured")]
    NoDevice,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_device: Option<String>,

    /// Values every profile inherits.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named device profiles.
    #[serde(default)]
    pub devices: HashMap<String, DeviceProfile>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds to wait for the peer's hello.
    #[serde(default = "default_negotiation_timeout")]
    pub negotiation_timeout: u64,

    /// Seconds a single RPC may wait for its reply.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Seconds a proxied request waits for the mount point owner.
    #[serde(default = "default_ask_timeout")]
    pub ask_timeout: u64,

    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Advertise base:1.1 (chunked framing).
    #[serde(default = "default_true")]
    pub base_1_1: bool,

    #[serde(default = "default_true")]
    pub lock: bool,

    #[serde(default = "default_true")]
    pub validate: bool,

    #[serde(default = "default_true")]
    pub rollback_on_error: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            port: default_port(),
            negotiation_timeout: default_negotiation_timeout(),
            request_timeout: default_request_timeout(),
            ask_timeout: default_ask_timeout(),
            max_message_size: default_max_message_size(),
            chunk_size: default_chunk_size(),
            base_1_1: true,
            lock: true,
            validate: true,
            rollback_on_error: true,
        }
    }
}

fn default_port() -> u16 {
    830
}
fn default_negotiation_timeout() -> u64 {
    20
}
fn default_request_timeout() -> u64 {
    60
}
fn default_ask_timeout() -> u64 {
    10
}
fn default_max_message_size() -> usize {
    FramingLimits::default().max_message_size
}
fn default_chunk_size() -> usize {
    FramingLimits::default().chunk_size
}
fn default_true() -> bool {
    true
}

/// One device. Unset fields fall back to [`Defaults`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceProfile {
    /// Host name or IP address.
    pub host: String,

    pub port: Option<u16>,

    pub negotiation_timeout: Option<u64>,

    pub request_timeout: Option<u64>,

    pub ask_timeout: Option<u64>,

    pub base_1_1: Option<bool>,

    /// Set to `false` for devices that reject `<lock>`.
    pub lock: Option<bool>,

    pub validate: Option<bool>,

    pub rollback_on_error: Option<bool>,

    /// Extra capability URIs to advertise in our hello.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

/// A profile turned into what `netconf_core` needs to connect.
#[derive(Debug, Clone)]
pub struct ResolvedDevice {
    pub id: RemoteDeviceId,
    pub session: SessionConfig,
    pub device: DeviceConfig,
}

impl Config {
    /// Pick `name`, or the configured default profile.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &DeviceProfile), ConfigError> {
        let name = name
            .or(self.default_device.as_deref())
            .ok_or(ConfigError::NoDevice)?;
        self.devices
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }

    /// Resolve a named profile against the defaults.
    pub fn resolve(&self, name: Option<&str>) -> Result<ResolvedDevice, ConfigError> {
        let (name, profile) = self.profile(name)?;
        resolve_profile(name, profile, &self.defaults)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "netconf", "netconf").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("netconf");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file and the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path`, then apply `NETCONF_` variables on top.
///
/// Nested keys are separated by a double underscore:
/// `NETCONF_DEFAULTS__REQUEST_TIMEOUT=30`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("NETCONF_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile resolution ──────────────────────────────────────────────

/// Build runtime settings from a profile, no command-line overrides.
pub fn resolve_profile(
    name: &str,
    profile: &DeviceProfile,
    defaults: &Defaults,
) -> Result<ResolvedDevice, ConfigError> {
    let port = profile.port.unwrap_or(defaults.port);
    let address = resolve_address(&profile.host, port)?;
    let id = RemoteDeviceId::new(name, address).map_err(|e| ConfigError::Validation {
        field: "device name".into(),
        reason: e.to_string(),
    })?;

    let mut capabilities = CapabilitySet::new();
    capabilities.insert(ProtocolCapability::Base10);
    if profile.base_1_1.unwrap_or(defaults.base_1_1) {
        capabilities.insert(ProtocolCapability::Base11);
    }
    for uri in &profile.capabilities {
        let capability = Capability::parse(uri).map_err(|e| ConfigError::Validation {
            field: format!("devices.{name}.capabilities"),
            reason: e.to_string(),
        })?;
        capabilities.insert(capability);
    }

    if defaults.chunk_size == 0 || defaults.max_message_size == 0 {
        return Err(ConfigError::Validation {
            field: "defaults".into(),
            reason: "chunk_size and max_message_size must be positive".into(),
        });
    }

    let session = SessionConfig {
        capabilities,
        negotiation_timeout: Duration::from_secs(
            profile
                .negotiation_timeout
                .unwrap_or(defaults.negotiation_timeout),
        ),
        request_timeout: Duration::from_secs(
            profile.request_timeout.unwrap_or(defaults.request_timeout),
        ),
        framing: FramingLimits {
            max_message_size: defaults.max_message_size,
            chunk_size: defaults.chunk_size,
        },
        additional_header: None,
    };

    let device = DeviceConfig {
        lock_allowed: profile.lock.unwrap_or(defaults.lock),
        validate_before_commit: profile.validate.unwrap_or(defaults.validate),
        rollback_on_error: profile
            .rollback_on_error
            .unwrap_or(defaults.rollback_on_error),
        ask_timeout: Duration::from_secs(profile.ask_timeout.unwrap_or(defaults.ask_timeout)),
    };

    Ok(ResolvedDevice {
        id,
        session,
        device,
    })
}

/// First socket address of `host:port`; may hit DNS.
pub fn resolve_address(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    if host.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: "must not be empty".into(),
        });
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|e| ConfigError::Validation {
            field: "host".into(),
            reason: format!("cannot resolve '{host}': {e}"),
        })?
        .next()
        .ok_or_else(|| ConfigError::Validation {
            field: "host".into(),
            reason: format!("'{host}' resolved to no address"),
        })
}
