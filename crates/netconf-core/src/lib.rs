// netconf-core: Sessions, write transactions and the device connector on top of netconf-proto.

pub mod codec;
pub mod config;
pub mod device;
pub mod device_id;
pub mod error;
pub mod proxy;
pub mod server;
pub mod session;
pub mod tx;

// ── Primary re-exports ──────────────────────────────────────────────
pub use codec::{CodecError, NodePath, PathArg, PayloadCodec, XmlPayloadCodec};
pub use config::{DeviceConfig, SessionConfig};
pub use device::NetconfDevice;
pub use device_id::{EmptyDeviceName, RemoteDeviceId};
pub use error::{NetconfError, WithDevice};
pub use proxy::{FacadeRequest, FacadeResponse, MountPoint, RemoteOwner, TransactionFacade, spawn_owner};
pub use server::{ListKeys, MemoryServer, ServerConfig};
pub use session::{
    CapabilityCache, NegotiationState, Negotiated, Role, RpcService, Session, SessionNegotiator,
    SessionState, negotiate,
};
pub use tx::{
    EditKind, EditOperation, LockState, Store, Strategy, TransactionProvider, WriteTransaction,
};
