//! CLI error types with miette diagnostics.
//!
//! Maps `NetconfError` and `ConfigError` into user-facing errors with
//! actionable help text and a process exit code.

use miette::Diagnostic;
use thiserror::Error;

use netconf_config::ConfigError;
use netconf_core::NetconfError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONNECTION: i32 = 3;
    pub const TIMEOUT: i32 = 4;
    pub const REJECTED: i32 = 5;
    pub const CONFLICT: i32 = 6;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {device}")]
    #[diagnostic(
        code(netconf::connection_failed),
        help("Check that the device is reachable and serving NETCONF over TCP on that port.")
    )]
    ConnectionFailed {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Session with {device} failed: {reason}")]
    #[diagnostic(
        code(netconf::negotiation),
        help("The peer did not complete the hello exchange. Is this a NETCONF endpoint?")
    )]
    Negotiation { device: String, reason: String },

    #[error("Session with {device} dropped: {reason}")]
    #[diagnostic(code(netconf::session_down))]
    SessionDown { device: String, reason: String },

    // ── Device answers ───────────────────────────────────────────────
    #[error("Datastore is locked: {message}")]
    #[diagnostic(
        code(netconf::lock_denied),
        help("Another session holds the lock (session {holder}). Retry once it is released.")
    )]
    LockDenied { message: String, holder: String },

    #[error("Device rejected the request: {message}")]
    #[diagnostic(code(netconf::rejected))]
    Rejected { message: String },

    #[error("Timed out: {message}")]
    #[diagnostic(
        code(netconf::timeout),
        help("Increase the timeout with --timeout or check the device's responsiveness.")
    )]
    Timeout { message: String },

    #[error(transparent)]
    #[diagnostic(code(netconf::device))]
    Device(NetconfError),

    // ── Configuration ────────────────────────────────────────────────
    #[error("No device selected")]
    #[diagnostic(
        code(netconf::no_device),
        help(
            "Pass --host, or add a [devices.<name>] profile and select it with --profile.\n\
             Expected config at: {path}"
        )
    )]
    NoDevice { path: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(code(netconf::profile_not_found), help("Available profiles: {available}"))]
    ProfileNotFound { name: String, available: String },

    #[error(transparent)]
    #[diagnostic(code(netconf::config))]
    Config(ConfigError),

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(netconf::validation))]
    Validation { field: String, reason: String },

    #[error("Could not read XML from {path}: {reason}")]
    #[diagnostic(code(netconf::xml), help("The file must hold one well-formed XML element."))]
    Xml { path: String, reason: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(netconf::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Negotiation { .. } | Self::SessionDown { .. } => {
                exit_code::CONNECTION
            }
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::LockDenied { .. } => exit_code::CONFLICT,
            Self::Validation { .. }
            | Self::Xml { .. }
            | Self::NoDevice { .. }
            | Self::ProfileNotFound { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── NetconfError → CliError mapping ──────────────────────────────────

impl From<NetconfError> for CliError {
    fn from(err: NetconfError) -> Self {
        let device = err.device().to_string();
        match err {
            NetconfError::Negotiation { reason, .. } => CliError::Negotiation { device, reason },

            NetconfError::NegotiationTimeout { timeout, .. } => CliError::Negotiation {
                device,
                reason: format!("no hello within {timeout:?}"),
            },

            NetconfError::SessionDown { reason, .. } => CliError::SessionDown { device, reason },

            NetconfError::RpcTimeout { .. } | NetconfError::OwnerUnreachable { .. } => {
                CliError::Timeout {
                    message: err.to_string(),
                }
            }

            NetconfError::Lock { ref errors, .. } => CliError::LockDenied {
                holder: errors
                    .iter()
                    .find_map(netconf_proto::RpcError::session_id)
                    .map_or_else(|| "unknown".into(), |id| id.to_string()),
                message: err.to_string(),
            },

            NetconfError::Edit { .. }
            | NetconfError::Commit { .. }
            | NetconfError::Validation { .. }
            | NetconfError::Rpc { .. } => CliError::Rejected {
                message: err.to_string(),
            },

            NetconfError::Codec { reason, .. } => CliError::Validation {
                field: "payload".into(),
                reason,
            },

            other => CliError::Device(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}
