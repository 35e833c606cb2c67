// ── Mount point facade ──
//
// One node owns the device session; every other node reaches the device
// through the owner. Both sides expose the same `TransactionFacade`.
// Proxied calls travel as `FacadeRequest`s and wait at most the ask
// timeout for the owner to answer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netconf_proto::XmlElement;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::NodePath;
use crate::device::NetconfDevice;
use crate::device_id::RemoteDeviceId;
use crate::error::NetconfError;
use crate::tx::Store;

const REQUEST_CHANNEL_SIZE: usize = 64;

/// The transaction contract shared by owner and proxy.
#[async_trait]
pub trait TransactionFacade: Send + Sync {
    fn device(&self) -> &RemoteDeviceId;
    async fn read(&self, store: Store, path: NodePath) -> Result<Option<XmlElement>, NetconfError>;
    async fn exists(&self, store: Store, path: NodePath) -> Result<bool, NetconfError>;
    async fn put(&self, store: Store, path: NodePath, data: XmlElement) -> Result<(), NetconfError>;
    async fn merge(
        &self,
        store: Store,
        path: NodePath,
        data: XmlElement,
    ) -> Result<(), NetconfError>;
    async fn delete(&self, store: Store, path: NodePath) -> Result<(), NetconfError>;
    async fn commit(&self) -> Result<(), NetconfError>;
    /// `Ok(false)` when there was nothing to cancel.
    async fn cancel(&self) -> Result<bool, NetconfError>;
}

#[async_trait]
impl TransactionFacade for NetconfDevice {
    fn device(&self) -> &RemoteDeviceId {
        self.id()
    }

    async fn read(&self, store: Store, path: NodePath) -> Result<Option<XmlElement>, NetconfError> {
        NetconfDevice::read(self, store, &path).await
    }

    async fn exists(&self, store: Store, path: NodePath) -> Result<bool, NetconfError> {
        NetconfDevice::exists(self, store, &path).await
    }

    async fn put(&self, store: Store, path: NodePath, data: XmlElement) -> Result<(), NetconfError> {
        NetconfDevice::put(self, store, path, data).await
    }

    async fn merge(
        &self,
        store: Store,
        path: NodePath,
        data: XmlElement,
    ) -> Result<(), NetconfError> {
        NetconfDevice::merge(self, store, path, data).await
    }

    async fn delete(&self, store: Store, path: NodePath) -> Result<(), NetconfError> {
        NetconfDevice::delete(self, store, path).await
    }

    async fn commit(&self) -> Result<(), NetconfError> {
        NetconfDevice::commit(self).await
    }

    async fn cancel(&self) -> Result<bool, NetconfError> {
        Ok(NetconfDevice::cancel(self).await)
    }
}

// ── Messages ─────────────────────────────────────────────────────────

/// A proxied transaction call.
#[derive(Debug, Clone)]
pub enum FacadeRequest {
    Read { store: Store, path: NodePath },
    Exists { store: Store, path: NodePath },
    Put { store: Store, path: NodePath, data: XmlElement },
    Merge { store: Store, path: NodePath, data: XmlElement },
    Delete { store: Store, path: NodePath },
    Commit,
    Cancel,
}

/// The owner's answer to a [`FacadeRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FacadeResponse {
    Data(Option<XmlElement>),
    Exists(bool),
    Done,
    Cancelled(bool),
}

pub(crate) struct FacadeEnvelope {
    pub request: FacadeRequest,
    pub response_tx: oneshot::Sender<Result<FacadeResponse, NetconfError>>,
}

// ── Owner side ───────────────────────────────────────────────────────

/// Serve proxied requests against `device` until `cancel` fires or
/// every proxy handle is dropped.
pub fn spawn_owner(
    device: Arc<NetconfDevice>,
    cancel: CancellationToken,
) -> (RemoteOwner, JoinHandle<()>) {
    let (requests, requests_rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
    let remote = RemoteOwner {
        device: device.id().clone(),
        requests,
        ask_timeout: device.config().ask_timeout,
    };
    let handle = tokio::spawn(owner_task(device, requests_rx, cancel));
    (remote, handle)
}

async fn owner_task(
    device: Arc<NetconfDevice>,
    mut requests: mpsc::Receiver<FacadeEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = requests.recv() => {
                let Some(envelope) = envelope else { break };
                let result = dispatch(&device, envelope.request).await;
                // The asker may have timed out and gone away.
                let _ = envelope.response_tx.send(result);
            }
        }
    }
    debug!(device = %device.id(), "mount point owner stopped");
}

async fn dispatch(
    device: &NetconfDevice,
    request: FacadeRequest,
) -> Result<FacadeResponse, NetconfError> {
    match request {
        FacadeRequest::Read { store, path } => {
            device.read(store, &path).await.map(FacadeResponse::Data)
        }
        FacadeRequest::Exists { store, path } => {
            device.exists(store, &path).await.map(FacadeResponse::Exists)
        }
        FacadeRequest::Put { store, path, data } => {
            device.put(store, path, data).await.map(|()| FacadeResponse::Done)
        }
        FacadeRequest::Merge { store, path, data } => {
            device.merge(store, path, data).await.map(|()| FacadeResponse::Done)
        }
        FacadeRequest::Delete { store, path } => {
            device.delete(store, path).await.map(|()| FacadeResponse::Done)
        }
        FacadeRequest::Commit => device.commit().await.map(|()| FacadeResponse::Done),
        FacadeRequest::Cancel => Ok(FacadeResponse::Cancelled(device.cancel().await)),
    }
}

// ── Proxy side ───────────────────────────────────────────────────────

/// Handle on a mount point owned elsewhere.
#[derive(Debug, Clone)]
pub struct RemoteOwner {
    device: RemoteDeviceId,
    requests: mpsc::Sender<FacadeEnvelope>,
    ask_timeout: Duration,
}

impl RemoteOwner {
    /// Send one request and wait for the owner's answer.
    pub async fn ask(&self, request: FacadeRequest) -> Result<FacadeResponse, NetconfError> {
        let (response_tx, response_rx) = oneshot::channel();
        let envelope = FacadeEnvelope {
            request,
            response_tx,
        };

        let exchange = async {
            self.requests.send(envelope).await.ok()?;
            response_rx.await.ok()
        };
        match tokio::time::timeout(self.ask_timeout, exchange).await {
            Ok(Some(result)) => result,
            Ok(None) | Err(_) => {
                warn!(device = %self.device, timeout = ?self.ask_timeout, "mount point owner unreachable");
                Err(NetconfError::OwnerUnreachable {
                    device: self.device.clone(),
                    timeout: self.ask_timeout,
                })
            }
        }
    }

    fn unexpected(&self, response: &FacadeResponse) -> NetconfError {
        NetconfError::Protocol {
            device: self.device.clone(),
            reason: format!("owner sent unexpected response {response:?}"),
        }
    }

    async fn ask_done(&self, request: FacadeRequest) -> Result<(), NetconfError> {
        match self.ask(request).await? {
            FacadeResponse::Done => Ok(()),
            other => Err(self.unexpected(&other)),
        }
    }
}

#[async_trait]
impl TransactionFacade for RemoteOwner {
    fn device(&self) -> &RemoteDeviceId {
        &self.device
    }

    async fn read(&self, store: Store, path: NodePath) -> Result<Option<XmlElement>, NetconfError> {
        match self.ask(FacadeRequest::Read { store, path }).await? {
            FacadeResponse::Data(data) => Ok(data),
            other => Err(self.unexpected(&other)),
        }
    }

    async fn exists(&self, store: Store, path: NodePath) -> Result<bool, NetconfError> {
        match self.ask(FacadeRequest::Exists { store, path }).await? {
            FacadeResponse::Exists(found) => Ok(found),
            other => Err(self.unexpected(&other)),
        }
    }

    async fn put(&self, store: Store, path: NodePath, data: XmlElement) -> Result<(), NetconfError> {
        self.ask_done(FacadeRequest::Put { store, path, data }).await
    }

    async fn merge(
        &self,
        store: Store,
        path: NodePath,
        data: XmlElement,
    ) -> Result<(), NetconfError> {
        self.ask_done(FacadeRequest::Merge { store, path, data }).await
    }

    async fn delete(&self, store: Store, path: NodePath) -> Result<(), NetconfError> {
        self.ask_done(FacadeRequest::Delete { store, path }).await
    }

    async fn commit(&self) -> Result<(), NetconfError> {
        self.ask_done(FacadeRequest::Commit).await
    }

    async fn cancel(&self) -> Result<bool, NetconfError> {
        match self.ask(FacadeRequest::Cancel).await? {
            FacadeResponse::Cancelled(cancelled) => Ok(cancelled),
            other => Err(self.unexpected(&other)),
        }
    }
}

// ── Role ─────────────────────────────────────────────────────────────

/// This node's role for one mounted device.
#[derive(Debug, Clone)]
pub enum MountPoint {
    /// The device session lives here.
    Owner { device: Arc<NetconfDevice> },
    /// Another node owns the session.
    Proxy { remote: RemoteOwner },
}

impl MountPoint {
    pub fn is_owner(&self) -> bool {
        matches!(self, Self::Owner { .. })
    }

    pub fn facade(&self) -> &dyn TransactionFacade {
        match self {
            Self::Owner { device } => device.as_ref(),
            Self::Proxy { remote } => remote,
        }
    }
}
