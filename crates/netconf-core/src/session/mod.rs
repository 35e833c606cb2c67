// ── Live NETCONF session ──
//
// After the hello exchange a session runs two background tasks: a
// writer draining an outbound queue into the framed sink, and a reader
// routing each inbound document to the waiting RPC (by message-id) or
// to notification subscribers. Requests are queued synchronously, so
// calls made in sequence reach the device in that order.

pub mod cache;
pub mod negotiator;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use netconf_proto::{
    CapabilitySet, FramingMode, NetconfCodec, Notification, Rpc, RpcReply, XmlElement,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::codec::Framed;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace, warn};

pub use cache::CapabilityCache;
pub use negotiator::{NegotiationState, Negotiated, Role, SessionNegotiator, negotiate};

use crate::config::SessionConfig;
use crate::device_id::RemoteDeviceId;
use crate::error::NetconfError;

const NOTIFICATION_CAPACITY: usize = 256;

type ReplySender = oneshot::Sender<Result<RpcReply, NetconfError>>;

/// Request/reply transport to one device.
///
/// `Session` is the production implementation; transaction tests plug in
/// scripted services.
pub trait RpcService: Send + Sync {
    fn device(&self) -> &RemoteDeviceId;

    /// Capabilities the device advertised.
    fn capabilities(&self) -> &CapabilitySet;

    /// Send `rpc` and resolve with its reply.
    ///
    /// The request must be queued for the wire before this returns; the
    /// future only waits for the answer. A reply carrying `rpc-error`s
    /// is still `Ok`.
    fn invoke(&self, rpc: Rpc) -> BoxFuture<'static, Result<RpcReply, NetconfError>>;
}

/// Connection state, observable through a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Up,
    Down { reason: String },
}

/// A negotiated client session. Cheap to clone; the channel closes
/// when the last clone is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
    _close_on_drop: Arc<DropGuard>,
}

struct SessionInner {
    device: RemoteDeviceId,
    session_id: u32,
    local_capabilities: Arc<CapabilitySet>,
    peer_capabilities: Arc<CapabilitySet>,
    framing: FramingMode,
    request_timeout: Duration,
    outbound: mpsc::UnboundedSender<Bytes>,
    pending: DashMap<String, ReplySender>,
    next_message_id: AtomicU64,
    notifications: broadcast::Sender<Arc<Notification>>,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
}

impl Session {
    /// Negotiate as a client over `io` and start the session tasks.
    pub async fn connect<T>(
        io: T,
        device: RemoteDeviceId,
        config: &SessionConfig,
    ) -> Result<Self, NetconfError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut framed = Framed::new(io, NetconfCodec::new(config.framing));
        let negotiator = SessionNegotiator::new(device.clone(), Role::Client, config);
        let negotiated = negotiate(&mut framed, negotiator, CapabilityCache::global()).await?;
        Ok(Self::start(framed, device, negotiated, config.request_timeout))
    }

    /// Start the reader and writer tasks on an already negotiated channel.
    pub fn start<T>(
        framed: Framed<T, NetconfCodec>,
        device: RemoteDeviceId,
        negotiated: Negotiated,
        request_timeout: Duration,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (sink, stream) = framed.split::<Bytes>();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (state, _) = watch::channel(SessionState::Up);
        let cancel = CancellationToken::new();

        let inner = Arc::new(SessionInner {
            device,
            session_id: negotiated.session_id,
            local_capabilities: negotiated.local_capabilities,
            peer_capabilities: negotiated.peer_capabilities,
            framing: negotiated.framing,
            request_timeout,
            outbound,
            pending: DashMap::new(),
            next_message_id: AtomicU64::new(1),
            notifications,
            state,
            cancel: cancel.clone(),
        });

        tokio::spawn(writer_task(sink, outbound_rx, Arc::clone(&inner)));
        tokio::spawn(reader_task(stream, Arc::clone(&inner)));

        Self {
            inner,
            _close_on_drop: Arc::new(cancel.drop_guard()),
        }
    }

    pub fn session_id(&self) -> u32 {
        self.inner.session_id
    }

    pub fn framing(&self) -> FramingMode {
        self.inner.framing
    }

    pub fn local_capabilities(&self) -> &CapabilitySet {
        &self.inner.local_capabilities
    }

    pub fn peer_capabilities(&self) -> &CapabilitySet {
        &self.inner.peer_capabilities
    }

    pub fn is_up(&self) -> bool {
        self.inner.is_up()
    }

    /// Watch the session go down.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to notifications received from now on.
    pub fn notifications(&self) -> broadcast::Receiver<Arc<Notification>> {
        self.inner.notifications.subscribe()
    }

    /// Send `<close-session>` and stop the session tasks.
    pub async fn close(&self) -> Result<(), NetconfError> {
        if !self.is_up() {
            return Ok(());
        }
        let result = self.invoke(Rpc::CloseSession).await;
        self.inner.mark_down("session closed".into());

        match result {
            Ok(reply) => reply.into_result().map(drop).map_err(|errors| NetconfError::Rpc {
                device: self.inner.device.clone(),
                operation: "close-session".into(),
                errors,
            }),
            Err(e) if e.is_session_down() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl RpcService for Session {
    fn device(&self) -> &RemoteDeviceId {
        &self.inner.device
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.inner.peer_capabilities
    }

    fn invoke(&self, rpc: Rpc) -> BoxFuture<'static, Result<RpcReply, NetconfError>> {
        let inner = Arc::clone(&self.inner);
        let message_id = format!(
            "m-{}",
            inner.next_message_id.fetch_add(1, Ordering::Relaxed)
        );
        let operation = rpc.operation().to_owned();
        let queued = inner.enqueue(&message_id, &rpc).map(|reply| {
            let slot = PendingSlot {
                inner: Arc::clone(&inner),
                message_id: message_id.clone(),
            };
            (reply, slot)
        });

        Box::pin(async move {
            let (reply, _slot) = match queued {
                Ok(queued) => queued,
                Err(e) => return Err(e),
            };
            match tokio::time::timeout(inner.request_timeout, reply).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(inner.down_error()),
                Err(_) => {
                    warn!(device = %inner.device, %message_id, %operation, "rpc timed out");
                    Err(NetconfError::RpcTimeout {
                        device: inner.device.clone(),
                        operation,
                        timeout: inner.request_timeout,
                    })
                }
            }
        })
    }
}

/// Unregisters a request when its caller stops waiting, whether the
/// future completed, timed out or was dropped unpolled.
struct PendingSlot {
    inner: Arc<SessionInner>,
    message_id: String,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.inner.pending.remove(&self.message_id);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.inner.device)
            .field("session_id", &self.inner.session_id)
            .field("framing", &self.inner.framing)
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    fn is_up(&self) -> bool {
        matches!(*self.state.borrow(), SessionState::Up)
    }

    fn down_error(&self) -> NetconfError {
        let reason = match &*self.state.borrow() {
            SessionState::Down { reason } => reason.clone(),
            SessionState::Up => "session closed".into(),
        };
        NetconfError::session_down(&self.device, reason)
    }

    fn enqueue(
        &self,
        message_id: &str,
        rpc: &Rpc,
    ) -> Result<oneshot::Receiver<Result<RpcReply, NetconfError>>, NetconfError> {
        if !self.is_up() {
            return Err(self.down_error());
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(message_id.to_owned(), tx);

        let payload = rpc.encode(message_id);
        debug!(device = %self.device, %message_id, operation = rpc.operation(), "sending rpc");
        trace!(device = %self.device, %message_id, %payload, "rpc payload");

        // Registered before the state check: either we see Down here or
        // the reader's drain sees our entry.
        if self.outbound.send(Bytes::from(payload)).is_err() || !self.is_up() {
            self.pending.remove(message_id);
            return Err(self.down_error());
        }
        Ok(rx)
    }

    fn dispatch(&self, payload: &[u8]) {
        trace!(device = %self.device, payload = %String::from_utf8_lossy(payload), "received");

        let doc = match XmlElement::parse_bytes(payload) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(device = %self.device, error = %e, "dropping unparseable message");
                return;
            }
        };

        if Notification::is_notification(&doc) {
            match Notification::parse(&doc) {
                Ok(n) => {
                    // No subscribers is fine.
                    let _ = self.notifications.send(Arc::new(n));
                }
                Err(e) => warn!(device = %self.device, error = %e, "dropping notification"),
            }
            return;
        }

        let reply = match RpcReply::parse(&doc) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(device = %self.device, error = %e, "dropping unexpected message");
                return;
            }
        };
        let Some(message_id) = reply.message_id.clone() else {
            warn!(device = %self.device, errors = reply.errors.len(), "rpc-reply without message-id");
            return;
        };
        match self.pending.remove(&message_id) {
            Some((_, tx)) => {
                let _ = tx.send(Ok(reply));
            }
            None => debug!(device = %self.device, %message_id, "reply for abandoned request"),
        }
    }

    fn mark_down(&self, reason: String) {
        let changed = self.state.send_if_modified(|state| {
            if matches!(state, SessionState::Up) {
                *state = SessionState::Down {
                    reason: reason.clone(),
                };
                true
            } else {
                false
            }
        });
        if changed {
            debug!(device = %self.device, %reason, "session down");
        }

        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(NetconfError::session_down(&self.device, reason.clone())));
            }
        }
        self.cancel.cancel();
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn writer_task<K>(
    mut sink: K,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    inner: Arc<SessionInner>,
) where
    K: Sink<Bytes, Error = netconf_proto::Error> + Unpin,
{
    let cancel = inner.cancel.clone();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = outbound.recv() => {
                let Some(message) = message else { break };
                if let Err(e) = sink.send(message).await {
                    warn!(device = %inner.device, error = %e, "write failed");
                    inner.mark_down(format!("write failed: {e}"));
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

async fn reader_task<S>(mut stream: S, inner: Arc<SessionInner>)
where
    S: Stream<Item = Result<Bytes, netconf_proto::Error>> + Unpin,
{
    let cancel = inner.cancel.clone();
    let reason = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break "session closed".to_owned(),
            frame = stream.next() => match frame {
                Some(Ok(payload)) => inner.dispatch(&payload),
                Some(Err(e)) => {
                    warn!(device = %inner.device, error = %e, "read failed");
                    break e.to_string();
                }
                None => break "channel closed by peer".to_owned(),
            }
        }
    };
    inner.mark_down(reason);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn negotiated() -> Negotiated {
        Negotiated {
            session_id: 1,
            local_capabilities: Arc::new(CapabilitySet::client_defaults()),
            peer_capabilities: Arc::new(CapabilitySet::client_defaults()),
            framing: FramingMode::EndOfMessage,
            peer_header: None,
        }
    }

    fn start_session() -> (Session, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let framed = Framed::new(client, NetconfCodec::new(SessionConfig::default().framing));
        let device = RemoteDeviceId::new("dut", "127.0.0.1:830".parse().unwrap()).unwrap();
        let session = Session::start(framed, device, negotiated(), Duration::from_secs(60));
        (session, server)
    }

    #[tokio::test]
    async fn dropped_request_releases_its_slot() {
        let (session, _peer) = start_session();

        let unpolled = session.invoke(Rpc::Get { filter: None });
        assert_eq!(session.inner.pending.len(), 1);
        drop(unpolled);
        assert!(session.inner.pending.is_empty());
    }

    #[tokio::test]
    async fn abandoned_request_releases_its_slot() {
        let (session, _peer) = start_session();

        let waiting = session.invoke(Rpc::Get { filter: None });
        let abandoned = tokio::time::timeout(Duration::from_millis(20), waiting).await;
        assert!(abandoned.is_err());
        assert!(session.inner.pending.is_empty());
        assert!(session.is_up());
    }
}
