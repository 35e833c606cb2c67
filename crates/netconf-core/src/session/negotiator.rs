// ── Hello exchange ──
//
// `SessionNegotiator` is the state machine; it never touches the
// channel. `negotiate` drives it over a framed channel with a deadline.
// Whichever of "peer hello arrived" and "deadline passed" is observed
// first resolves the negotiation; the other becomes a no-op.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use netconf_proto::{AdditionalHeader, CapabilitySet, FramingMode, HelloMessage, NetconfCodec};
use strum::Display;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use super::cache::CapabilityCache;
use crate::config::SessionConfig;
use crate::device_id::RemoteDeviceId;
use crate::error::NetconfError;

/// Which side of the hello exchange we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    /// Servers assign the session id carried in their hello.
    Server { session_id: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum NegotiationState {
    Start,
    HelloSent,
    AwaitingPeerHello,
    Established,
    Failed,
}

/// Outcome of a successful hello exchange.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub session_id: u32,
    pub local_capabilities: Arc<CapabilitySet>,
    pub peer_capabilities: Arc<CapabilitySet>,
    pub framing: FramingMode,
    pub peer_header: Option<AdditionalHeader>,
}

/// Sans-IO hello exchange for one channel.
#[derive(Debug)]
pub struct SessionNegotiator {
    device: RemoteDeviceId,
    role: Role,
    hello: HelloMessage,
    timeout: Duration,
    state: NegotiationState,
    failure: Option<NetconfError>,
}

impl SessionNegotiator {
    pub fn new(device: RemoteDeviceId, role: Role, config: &SessionConfig) -> Self {
        let mut hello = match role {
            Role::Client => HelloMessage::client(config.capabilities.clone()),
            Role::Server { session_id } => {
                HelloMessage::server(config.capabilities.clone(), session_id)
            }
        };
        hello.additional_header.clone_from(&config.additional_header);

        Self {
            device,
            role,
            hello,
            timeout: config.negotiation_timeout,
            state: NegotiationState::Start,
            failure: None,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn device(&self) -> &RemoteDeviceId {
        &self.device
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// START → HELLO_SENT. Returns our encoded hello.
    pub fn start(&mut self) -> Result<String, NetconfError> {
        if self.state != NegotiationState::Start {
            return Err(self.violation(format!("start called in state {}", self.state)));
        }
        self.state = NegotiationState::HelloSent;
        Ok(self.hello.encode())
    }

    /// HELLO_SENT → AWAITING_PEER_HELLO once our hello is on the wire.
    pub fn hello_flushed(&mut self) {
        if self.state == NegotiationState::HelloSent {
            self.state = NegotiationState::AwaitingPeerHello;
        }
    }

    /// Feed the first framed message received from the peer.
    pub fn on_message(
        &mut self,
        payload: &[u8],
        cache: &CapabilityCache,
    ) -> Result<Negotiated, NetconfError> {
        match self.state {
            // Both sides send hello at once; the peer's may beat our flush.
            NegotiationState::HelloSent | NegotiationState::AwaitingPeerHello => {}
            NegotiationState::Failed => return Err(self.failed()),
            state => return Err(self.violation(format!("unexpected message in state {state}"))),
        }

        let peer = match HelloMessage::decode(payload) {
            Ok(hello) => hello,
            Err(e) => return Err(self.reject(e.to_string())),
        };

        let session_id = match (self.role, peer.session_id) {
            (Role::Client, Some(id)) => id,
            (Role::Client, None) => return Err(self.reject("server hello carries no session-id")),
            (Role::Server { .. }, Some(id)) => {
                return Err(self.reject(format!("client hello carries session-id {id}")));
            }
            (Role::Server { session_id }, None) => session_id,
        };

        let Some(framing) = self.hello.capabilities.negotiate_framing(&peer.capabilities) else {
            return Err(self.reject("no common NETCONF base version"));
        };

        self.state = NegotiationState::Established;
        debug!(
            device = %self.device,
            session_id,
            %framing,
            peer_capabilities = peer.capabilities.len(),
            "hello exchange complete"
        );

        Ok(Negotiated {
            session_id,
            local_capabilities: cache.intern(self.hello.capabilities.clone()),
            peer_capabilities: cache.intern(peer.capabilities),
            framing,
            peer_header: peer.additional_header,
        })
    }

    /// The deadline passed. `None` if negotiation already resolved.
    pub fn on_timeout(&mut self) -> Option<NetconfError> {
        if matches!(
            self.state,
            NegotiationState::Established | NegotiationState::Failed
        ) {
            return None;
        }
        Some(self.fail(NetconfError::NegotiationTimeout {
            device: self.device.clone(),
            timeout: self.timeout,
        }))
    }

    /// The channel failed or closed before the exchange finished.
    pub fn on_channel_error(&mut self, err: NetconfError) -> NetconfError {
        if self.state == NegotiationState::Failed {
            return self.failed();
        }
        self.fail(err)
    }

    fn reject(&mut self, reason: impl Into<String>) -> NetconfError {
        self.fail(NetconfError::Negotiation {
            device: self.device.clone(),
            reason: reason.into(),
        })
    }

    fn violation(&mut self, reason: String) -> NetconfError {
        self.fail(NetconfError::Protocol {
            device: self.device.clone(),
            reason,
        })
    }

    fn fail(&mut self, err: NetconfError) -> NetconfError {
        self.state = NegotiationState::Failed;
        self.failure = Some(err.clone());
        err
    }

    fn failed(&self) -> NetconfError {
        self.failure.clone().unwrap_or_else(|| NetconfError::Negotiation {
            device: self.device.clone(),
            reason: "negotiation already failed".into(),
        })
    }
}

// ── Driver ───────────────────────────────────────────────────────────

/// Run the hello exchange on `framed`.
///
/// On success the codec has already been switched to chunked framing if
/// negotiated, so the next frame read or written uses the new mode. On
/// failure the write half of the channel has been shut down.
pub async fn negotiate<T>(
    framed: &mut Framed<T, NetconfCodec>,
    mut negotiator: SessionNegotiator,
    cache: &CapabilityCache,
) -> Result<Negotiated, NetconfError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let device = negotiator.device().clone();
    let deadline = Instant::now() + negotiator.timeout();

    let outcome = async {
        let hello = match negotiator.start() {
            Ok(hello) => hello,
            Err(e) => return Err(e),
        };
        trace!(device = %device, payload = %hello, "sending hello");

        match tokio::time::timeout_at(deadline, framed.send(hello)).await {
            Ok(Ok(())) => negotiator.hello_flushed(),
            Ok(Err(e)) => return Err(negotiator.on_channel_error((device.clone(), e).into())),
            Err(_) => return Err(timed_out(&mut negotiator)),
        }

        tokio::select! {
            biased;
            frame = framed.next() => match frame {
                Some(Ok(payload)) => {
                    trace!(device = %device, payload = %String::from_utf8_lossy(&payload), "received hello");
                    negotiator.on_message(&payload, cache)
                }
                Some(Err(e)) => Err(negotiator.on_channel_error((device.clone(), e).into())),
                None => Err(negotiator.on_channel_error(NetconfError::session_down(
                    &device,
                    "channel closed during hello exchange",
                ))),
            },
            () = tokio::time::sleep_until(deadline) => Err(timed_out(&mut negotiator)),
        }
    }
    .await;

    match outcome {
        Ok(negotiated) => {
            if negotiated.framing == FramingMode::Chunked {
                framed.codec_mut().enable_chunked();
            }
            Ok(negotiated)
        }
        Err(err) => {
            warn!(device = %device, error = %err, "negotiation failed, closing channel");
            let _ = framed.get_mut().shutdown().await;
            Err(err)
        }
    }
}

fn timed_out(negotiator: &mut SessionNegotiator) -> NetconfError {
    let device = negotiator.device().clone();
    negotiator
        .on_timeout()
        .unwrap_or_else(|| NetconfError::Protocol {
            device,
            reason: "negotiation deadline observed after resolution".into(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use netconf_proto::{Capability, ProtocolCapability};

    fn device() -> RemoteDeviceId {
        RemoteDeviceId::new("dut", "127.0.0.1:830".parse().unwrap()).unwrap()
    }

    fn hello_with(bases: &[ProtocolCapability], session_id: Option<u32>) -> String {
        let caps: CapabilitySet = bases.iter().copied().map(Capability::Protocol).collect();
        let mut hello = HelloMessage::client(caps);
        hello.session_id = session_id;
        hello.encode()
    }

    fn server_hello(base11: bool, session_id: Option<u32>) -> String {
        if base11 {
            hello_with(&[ProtocolCapability::Base10, ProtocolCapability::Base11], session_id)
        } else {
            hello_with(&[ProtocolCapability::Base10], session_id)
        }
    }

    fn started(role: Role) -> SessionNegotiator {
        let mut n = SessionNegotiator::new(device(), role, &SessionConfig::default());
        n.start().unwrap();
        n.hello_flushed();
        n
    }

    #[test]
    fn walks_states_to_established() {
        let mut n = SessionNegotiator::new(device(), Role::Client, &SessionConfig::default());
        assert_eq!(n.state(), NegotiationState::Start);
        let hello = n.start().unwrap();
        assert!(hello.contains("<hello"));
        assert!(!hello.contains("session-id"));
        assert_eq!(n.state(), NegotiationState::HelloSent);
        n.hello_flushed();
        assert_eq!(n.state(), NegotiationState::AwaitingPeerHello);

        let negotiated = n
            .on_message(server_hello(true, Some(7)).as_bytes(), &CapabilityCache::new())
            .unwrap();
        assert_eq!(n.state(), NegotiationState::Established);
        assert_eq!(negotiated.session_id, 7);
        assert_eq!(negotiated.framing, FramingMode::Chunked);
    }

    #[test]
    fn keeps_end_of_message_framing_when_peer_lacks_base_1_1() {
        let mut n = started(Role::Client);
        let negotiated = n
            .on_message(server_hello(false, Some(1)).as_bytes(), &CapabilityCache::new())
            .unwrap();
        assert_eq!(negotiated.framing, FramingMode::EndOfMessage);
    }

    #[test]
    fn disjoint_base_versions_fail_negotiation() {
        let config = SessionConfig {
            capabilities: [Capability::Protocol(ProtocolCapability::Base10)]
                .into_iter()
                .collect(),
            ..SessionConfig::default()
        };
        let mut n = SessionNegotiator::new(device(), Role::Client, &config);
        n.start().unwrap();
        n.hello_flushed();

        let err = n
            .on_message(
                hello_with(&[ProtocolCapability::Base11], Some(1)).as_bytes(),
                &CapabilityCache::new(),
            )
            .unwrap_err();
        assert!(matches!(err, NetconfError::Negotiation { .. }));
        assert_eq!(n.state(), NegotiationState::Failed);
    }

    #[test]
    fn non_hello_first_message_fails() {
        let mut n = started(Role::Client);
        let err = n
            .on_message(
                br#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="1"><ok/></rpc-reply>"#,
                &CapabilityCache::new(),
            )
            .unwrap_err();
        assert!(matches!(err, NetconfError::Negotiation { .. }));
        assert_eq!(n.state(), NegotiationState::Failed);
    }

    #[test]
    fn client_requires_session_id_and_server_forbids_it() {
        let mut client = started(Role::Client);
        assert!(client
            .on_message(server_hello(true, None).as_bytes(), &CapabilityCache::new())
            .is_err());

        let mut server = started(Role::Server { session_id: 4 });
        assert!(server
            .on_message(server_hello(true, Some(9)).as_bytes(), &CapabilityCache::new())
            .is_err());
    }

    #[test]
    fn timeout_after_success_is_ignored() {
        let mut n = started(Role::Client);
        n.on_message(server_hello(true, Some(3)).as_bytes(), &CapabilityCache::new())
            .unwrap();
        assert!(n.on_timeout().is_none());
        assert_eq!(n.state(), NegotiationState::Established);
    }

    #[test]
    fn message_after_timeout_reports_the_timeout() {
        let mut n = started(Role::Client);
        assert!(matches!(
            n.on_timeout(),
            Some(NetconfError::NegotiationTimeout { .. })
        ));
        let late = n
            .on_message(server_hello(true, Some(3)).as_bytes(), &CapabilityCache::new())
            .unwrap_err();
        assert!(matches!(late, NetconfError::NegotiationTimeout { .. }));
    }
}
