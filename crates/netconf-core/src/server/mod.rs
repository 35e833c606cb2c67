// ── In-memory NETCONF server ──
//
// A device simulator: negotiates in server role, then answers each
// `<rpc>` against shared in-memory datastores. Subtree filters on
// get/get-config are applied to the reply before it is sent.

mod datastore;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures_util::{SinkExt, StreamExt};
use netconf_proto::{
    CapabilitySet, ErrorTag, ErrorType, NetconfCodec, ProtocolCapability, Rpc, RpcError, RpcReply,
    RpcRequest, XmlElement, apply_rpc_filter,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace};

pub use datastore::{Datastores, ListKeys, apply_edit};

use crate::config::SessionConfig;
use crate::device_id::RemoteDeviceId;
use crate::error::{NetconfError, WithDevice};
use crate::session::{CapabilityCache, Role, SessionNegotiator, negotiate};

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Offer `:candidate`. Without it the server offers
    /// `:writable-running` instead.
    pub candidate: bool,
    /// Negotiation timeout and framing limits. The advertised
    /// capabilities are derived from `candidate`.
    pub session: SessionConfig,
    pub list_keys: ListKeys,
}

/// Shared datastores served to any number of client sessions.
#[derive(Clone)]
pub struct MemoryServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: ServerConfig,
    capabilities: CapabilitySet,
    stores: Mutex<Datastores>,
    next_session_id: AtomicU32,
}

impl MemoryServer {
    pub fn new(config: ServerConfig) -> Self {
        let mut capabilities = CapabilitySet::new();
        capabilities.insert(ProtocolCapability::Base10);
        capabilities.insert(ProtocolCapability::Base11);
        capabilities.insert(ProtocolCapability::RollbackOnError);
        if config.candidate {
            capabilities.insert(ProtocolCapability::Candidate);
            capabilities.insert(ProtocolCapability::Validate11);
        } else {
            capabilities.insert(ProtocolCapability::WritableRunning);
        }

        let stores = Datastores::new(config.candidate, config.list_keys.clone());
        Self {
            inner: Arc::new(ServerInner {
                config,
                capabilities,
                stores: Mutex::new(stores),
                next_session_id: AtomicU32::new(1),
            }),
        }
    }

    /// Start from `data`'s children in both running and candidate.
    pub async fn seed(&self, data: &XmlElement) {
        self.inner.stores.lock().await.seed(data);
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.inner.capabilities
    }

    /// Snapshot of `<running>` as a `<data>` element.
    pub async fn running(&self) -> XmlElement {
        self.inner.stores.lock().await.running().clone()
    }

    pub async fn candidate(&self) -> XmlElement {
        self.inner.stores.lock().await.candidate().clone()
    }

    /// Serve one client connection until it closes or sends
    /// `<close-session>`. Locks held by the session are released on exit.
    pub async fn serve<T>(&self, io: T, peer: RemoteDeviceId) -> Result<(), NetconfError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let session_id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let mut session = self.inner.config.session.clone();
        session.capabilities = self.inner.capabilities.clone();

        let mut framed = Framed::new(io, NetconfCodec::new(session.framing));
        let negotiator = SessionNegotiator::new(peer.clone(), Role::Server { session_id }, &session);
        let negotiated = negotiate(&mut framed, negotiator, CapabilityCache::global()).await?;
        info!(peer = %peer, session_id, framing = %negotiated.framing, "client session established");

        let result = self.request_loop(&mut framed, session_id, &peer).await;
        self.inner.stores.lock().await.release_session(session_id);
        debug!(peer = %peer, session_id, "client session ended");
        result
    }

    async fn request_loop<T>(
        &self,
        framed: &mut Framed<T, NetconfCodec>,
        session_id: u32,
        peer: &RemoteDeviceId,
    ) -> Result<(), NetconfError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(frame) = framed.next().await {
            let frame = frame.with_device(peer)?;
            trace!(peer = %peer, payload = %String::from_utf8_lossy(&frame), "request");

            let (reply, close) = self.respond(session_id, &frame).await;
            trace!(peer = %peer, payload = %reply, "reply");
            framed.send(reply).await.with_device(peer)?;
            if close {
                break;
            }
        }
        Ok(())
    }

    /// Answer one framed request. The flag is set after `<close-session>`.
    async fn respond(&self, session_id: u32, frame: &[u8]) -> (String, bool) {
        let doc = match XmlElement::parse_bytes(frame) {
            Ok(doc) => doc,
            Err(e) => {
                let error = RpcError::new(ErrorType::Rpc, ErrorTag::MalformedMessage)
                    .with_message(e.to_string());
                return (RpcReply::with_errors(None, vec![error]).encode(), false);
            }
        };
        let request = match RpcRequest::parse(&doc) {
            Ok(request) => request,
            Err(rejected) => {
                let reply = RpcReply::with_errors(rejected.message_id, vec![rejected.error]);
                return (reply.encode(), false);
            }
        };
        debug!(session_id, message_id = %request.message_id, operation = request.rpc.operation(), "executing");

        let close = matches!(request.rpc, Rpc::CloseSession);
        let outcome = self.inner.stores.lock().await.execute(session_id, &request.rpc);
        let reply = match outcome {
            Ok(Some(data)) => RpcReply::with_data(request.message_id, data),
            Ok(None) => RpcReply::ok(request.message_id),
            Err(error) => RpcReply::with_errors(Some(request.message_id), vec![error]),
        };

        let reply = reply.to_element();
        (apply_rpc_filter(&doc, &reply).to_xml(), close)
    }
}

impl std::fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryServer")
            .field("candidate", &self.inner.config.candidate)
            .finish_non_exhaustive()
    }
}
