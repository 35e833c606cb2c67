// ── Remote device identity ──
//
// The name is the identity; the address is informational. Two ids with
// the same name compare equal and hash alike even if the device moved.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("device name must not be empty")]
pub struct EmptyDeviceName;

/// Identity of a managed NETCONF endpoint.
#[derive(Debug, Clone)]
pub struct RemoteDeviceId {
    name: Arc<str>,
    address: SocketAddr,
}

impl RemoteDeviceId {
    pub fn new(name: impl AsRef<str>, address: SocketAddr) -> Result<Self, EmptyDeviceName> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(EmptyDeviceName);
        }
        Ok(Self {
            name: Arc::from(name),
            address,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

impl PartialEq for RemoteDeviceId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for RemoteDeviceId {}

impl Hash for RemoteDeviceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for RemoteDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn equality_ignores_address() {
        let a = RemoteDeviceId::new("edge-1", addr("10.0.0.1:830")).unwrap();
        let b = RemoteDeviceId::new("edge-1", addr("10.9.9.9:2022")).unwrap();
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn rejects_blank_names() {
        assert_eq!(
            RemoteDeviceId::new("  ", addr("127.0.0.1:830")).unwrap_err(),
            EmptyDeviceName
        );
    }

    #[test]
    fn display_includes_address() {
        let id = RemoteDeviceId::new("core", addr("[::1]:830")).unwrap();
        assert_eq!(id.to_string(), "core ([::1]:830)");
    }
}
