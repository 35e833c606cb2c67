// netconf-proto: NETCONF wire layer (RFC 6241 / 6242 / 5277)

pub mod capability;
pub mod error;
pub mod filter;
pub mod framing;
pub mod hello;
pub mod notification;
pub mod rpc;
pub mod xml;

pub use capability::{
    Capability, CapabilitySet, ExiCapability, ExiSchemaMode, InvalidCapability, OtherCapability,
    ProtocolCapability, YangModuleCapability,
};
pub use error::Error;
pub use filter::{
    MatchResult, NotificationFilterResult, apply_notification_filter, apply_rpc_filter,
    filter_subtree,
};
pub use framing::{FramingLimits, FramingMode, NetconfCodec};
pub use hello::{AdditionalHeader, HelloMessage};
pub use notification::Notification;
pub use rpc::{
    Datastore, DefaultOperation, ErrorOption, ErrorSeverity, ErrorTag, ErrorType, ModifyAction,
    Rpc, RpcError, RpcReply, RpcRequest,
};
pub use xml::{NETCONF_BASE_NS, QName, XmlElement, XmlNode};
