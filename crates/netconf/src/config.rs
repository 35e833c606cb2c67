//! Device selection: config profile plus command-line overrides.

use std::time::Duration;

use netconf_config::{Config, DeviceProfile, ResolvedDevice, config_path, resolve_profile};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The profile name in effect: `--profile`, then the configured default.
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> Option<String> {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_device.clone())
}

/// Resolve the target device from the config file and CLI flags.
pub fn resolve_device(global: &GlobalOpts, cfg: &Config) -> Result<ResolvedDevice, CliError> {
    let name = active_profile_name(global, cfg);

    let (name, mut profile) = match name.as_deref().and_then(|n| cfg.devices.get(n).map(|p| (n, p))) {
        Some((name, profile)) => (name.to_owned(), profile.clone()),
        None => {
            // An explicitly named profile must exist.
            if let Some(name) = global.profile.as_deref() {
                if global.host.is_none() {
                    return Err(CliError::ProfileNotFound {
                        name: name.into(),
                        available: available_profiles(cfg),
                    });
                }
            }
            let host = global.host.clone().ok_or_else(|| CliError::NoDevice {
                path: config_path().display().to_string(),
            })?;
            (
                host.clone(),
                DeviceProfile {
                    host,
                    ..DeviceProfile::default()
                },
            )
        }
    };

    if let Some(host) = &global.host {
        profile.host.clone_from(host);
    }
    if let Some(port) = global.port {
        profile.port = Some(port);
    }

    let mut resolved = resolve_profile(&name, &profile, &cfg.defaults)?;
    if let Some(secs) = global.timeout {
        resolved.session.request_timeout = Duration::from_secs(secs);
    }
    Ok(resolved)
}

fn available_profiles(cfg: &Config) -> String {
    let mut names: Vec<&str> = cfg.devices.keys().map(String::as_str).collect();
    if names.is_empty() {
        return "(none)".into();
    }
    names.sort_unstable();
    names.join(", ")
}
