// ── Runtime session and device configuration ──
//
// These types describe *how* to talk to one NETCONF device: what we
// advertise, how long we wait, and which write safeguards to use.
// They never touch disk. `netconf-config` (or a test) builds them.

use std::time::Duration;

use netconf_proto::{AdditionalHeader, CapabilitySet, FramingLimits};

/// Per-session settings for negotiation and RPC exchange.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capabilities advertised in our hello.
    pub capabilities: CapabilitySet,
    /// How long to wait for the peer's hello.
    pub negotiation_timeout: Duration,
    /// How long a single RPC may wait for its reply.
    pub request_timeout: Duration,
    /// Frame codec limits.
    pub framing: FramingLimits,
    /// Optional header line sent ahead of our hello.
    pub additional_header: Option<AdditionalHeader>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capabilities: CapabilitySet::client_defaults(),
            negotiation_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(60),
            framing: FramingLimits::default(),
            additional_header: None,
        }
    }
}

/// Write behaviour for one mounted device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Take datastore locks around write transactions.
    ///
    /// Some devices reject `<lock>` outright; turning this off skips both
    /// the lock and the unlock.
    pub lock_allowed: bool,
    /// Issue `<validate>` before `<commit>` when the device supports it.
    pub validate_before_commit: bool,
    /// Request `rollback-on-error` when the device supports it.
    pub rollback_on_error: bool,
    /// Bound on one proxied request to the mount point owner.
    pub ask_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            lock_allowed: true,
            validate_before_commit: true,
            rollback_on_error: true,
            ask_timeout: Duration::from_secs(10),
        }
    }
}
