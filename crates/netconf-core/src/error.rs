// ── Core error types ──
//
// Every failure names the device it concerns. Device-side rejections
// carry the raw rpc-error list so callers can tell "device said no"
// apart from "connection lost". The type is `Clone`: a single lock
// failure is handed to every edit queued behind it.

use std::time::Duration;

use netconf_proto::{Datastore, ModifyAction, RpcError};
use thiserror::Error;

use crate::device_id::RemoteDeviceId;
use crate::tx::Store;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum NetconfError {
    // ── Negotiation errors ───────────────────────────────────────────
    #[error("{device}: session negotiation failed: {reason}")]
    Negotiation {
        device: RemoteDeviceId,
        reason: String,
    },

    #[error("{device}: no hello from peer within {timeout:?}")]
    NegotiationTimeout {
        device: RemoteDeviceId,
        timeout: Duration,
    },

    // ── Device rejections ────────────────────────────────────────────
    #[error("{device}: lock on {datastore} refused: {}", summarize(.errors))]
    Lock {
        device: RemoteDeviceId,
        datastore: Datastore,
        errors: Vec<RpcError>,
    },

    #[error("{device}: {operation} at {path} failed: {}", summarize(.errors))]
    Edit {
        device: RemoteDeviceId,
        path: String,
        operation: ModifyAction,
        errors: Vec<RpcError>,
    },

    #[error("{device}: commit failed: {}", summarize(.errors))]
    Commit {
        device: RemoteDeviceId,
        errors: Vec<RpcError>,
    },

    #[error("{device}: validation failed: {}", summarize(.errors))]
    Validation {
        device: RemoteDeviceId,
        errors: Vec<RpcError>,
    },

    #[error("{device}: {operation} failed: {}", summarize(.errors))]
    Rpc {
        device: RemoteDeviceId,
        operation: String,
        errors: Vec<RpcError>,
    },

    // ── Transport errors ─────────────────────────────────────────────
    #[error("{device}: session down: {reason}")]
    SessionDown {
        device: RemoteDeviceId,
        reason: String,
    },

    #[error("{device}: no reply to {operation} within {timeout:?}")]
    RpcTimeout {
        device: RemoteDeviceId,
        operation: String,
        timeout: Duration,
    },

    #[error("{device}: mount point owner did not answer within {timeout:?}")]
    OwnerUnreachable {
        device: RemoteDeviceId,
        timeout: Duration,
    },

    #[error("{device}: protocol violation: {reason}")]
    Protocol {
        device: RemoteDeviceId,
        reason: String,
    },

    // ── Usage errors ─────────────────────────────────────────────────
    #[error("{device}: transaction already committed or cancelled")]
    TransactionClosed { device: RemoteDeviceId },

    #[error("{device}: {store} store does not accept writes")]
    UnsupportedStore {
        device: RemoteDeviceId,
        store: Store,
    },

    #[error("{device}: device advertises neither :candidate nor :writable-running")]
    NoWriteStrategy { device: RemoteDeviceId },

    #[error("{device}: payload codec: {reason}")]
    Codec {
        device: RemoteDeviceId,
        reason: String,
    },
}

impl NetconfError {
    pub fn device(&self) -> &RemoteDeviceId {
        match self {
            Self::Negotiation { device, .. }
            | Self::NegotiationTimeout { device, .. }
            | Self::Lock { device, .. }
            | Self::Edit { device, .. }
            | Self::Commit { device, .. }
            | Self::Validation { device, .. }
            | Self::Rpc { device, .. }
            | Self::SessionDown { device, .. }
            | Self::RpcTimeout { device, .. }
            | Self::OwnerUnreachable { device, .. }
            | Self::Protocol { device, .. }
            | Self::TransactionClosed { device }
            | Self::UnsupportedStore { device, .. }
            | Self::NoWriteStrategy { device }
            | Self::Codec { device, .. } => device,
        }
    }

    /// The channel to the device is gone.
    pub fn is_session_down(&self) -> bool {
        matches!(self, Self::SessionDown { .. })
    }

    /// The device answered and refused the request.
    pub fn is_device_rejection(&self) -> bool {
        !self.rpc_errors().is_empty()
    }

    /// The raw device-reported errors, empty when none were received.
    pub fn rpc_errors(&self) -> &[RpcError] {
        match self {
            Self::Lock { errors, .. }
            | Self::Edit { errors, .. }
            | Self::Commit { errors, .. }
            | Self::Validation { errors, .. }
            | Self::Rpc { errors, .. } => errors,
            _ => &[],
        }
    }

    pub(crate) fn session_down(device: &RemoteDeviceId, reason: impl Into<String>) -> Self {
        Self::SessionDown {
            device: device.clone(),
            reason: reason.into(),
        }
    }
}

fn summarize(errors: &[RpcError]) -> String {
    if errors.is_empty() {
        return "no error details".into();
    }
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<(RemoteDeviceId, netconf_proto::Error)> for NetconfError {
    fn from((device, err): (RemoteDeviceId, netconf_proto::Error)) -> Self {
        use netconf_proto::Error as E;
        match err {
            E::Io(_) | E::TruncatedFrame { .. } => Self::SessionDown {
                device,
                reason: err.to_string(),
            },
            E::MalformedHello(reason) => Self::Negotiation { device, reason },
            other => Self::Protocol {
                device,
                reason: other.to_string(),
            },
        }
    }
}

/// Attach a device to a wire-layer result.
pub trait WithDevice<T> {
    fn with_device(self, device: &RemoteDeviceId) -> Result<T, NetconfError>;
}

impl<T> WithDevice<T> for Result<T, netconf_proto::Error> {
    fn with_device(self, device: &RemoteDeviceId) -> Result<T, NetconfError> {
        self.map_err(|e| NetconfError::from((device.clone(), e)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use netconf_proto::{ErrorTag, ErrorType};

    fn device() -> RemoteDeviceId {
        RemoteDeviceId::new("r1", "127.0.0.1:830".parse().unwrap()).unwrap()
    }

    #[test]
    fn io_errors_become_session_down() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = NetconfError::from((device(), netconf_proto::Error::Io(io)));
        assert!(err.is_session_down());
        assert!(!err.is_device_rejection());
    }

    #[test]
    fn framing_errors_are_protocol_violations() {
        let err = NetconfError::from((
            device(),
            netconf_proto::Error::ChunkSizeOutOfRange { size: 0 },
        ));
        assert!(matches!(err, NetconfError::Protocol { .. }));
    }

    #[test]
    fn edit_error_names_device_path_and_tag() {
        let err = NetconfError::Edit {
            device: device(),
            path: "/top/a".into(),
            operation: ModifyAction::Replace,
            errors: vec![
                RpcError::new(ErrorType::Application, ErrorTag::DataExists).with_message("a exists"),
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("r1 (127.0.0.1:830): replace at /top/a failed"));
        assert!(text.contains("data-exists"));
        assert!(err.is_device_rejection());
        assert_eq!(err.device().name(), "r1");
    }
}
