// ── Device connector ──
//
// Binds one device's RPC service to a payload codec. Reads go straight
// to the device; writes go through the shared write transaction.

use std::sync::Arc;

use netconf_proto::{CapabilitySet, Datastore, Rpc, XmlElement};
use tracing::{debug, info};

use crate::codec::{CodecError, NodePath, PayloadCodec};
use crate::config::DeviceConfig;
use crate::device_id::RemoteDeviceId;
use crate::error::NetconfError;
use crate::session::RpcService;
use crate::tx::{Store, Strategy, TransactionProvider, WriteTransaction};

pub struct NetconfDevice {
    service: Arc<dyn RpcService>,
    codec: Arc<dyn PayloadCodec>,
    config: DeviceConfig,
    transactions: TransactionProvider,
}

impl NetconfDevice {
    pub fn new(
        service: Arc<dyn RpcService>,
        codec: Arc<dyn PayloadCodec>,
        config: DeviceConfig,
    ) -> Self {
        let transactions =
            TransactionProvider::new(Arc::clone(&service), Arc::clone(&codec), config.clone());
        Self {
            service,
            codec,
            config,
            transactions,
        }
    }

    pub fn id(&self) -> &RemoteDeviceId {
        self.service.device()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        self.service.capabilities()
    }

    pub fn write_strategy(&self) -> Result<Strategy, NetconfError> {
        self.transactions.strategy()
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Fetch the node at `path`. Configuration reads use `<running>`.
    pub async fn read(
        &self,
        store: Store,
        path: &NodePath,
    ) -> Result<Option<XmlElement>, NetconfError> {
        let filter = self.codec.filter_for(path).map_err(|e| self.codec_error(&e))?;
        let rpc = match store {
            Store::Configuration => Rpc::GetConfig {
                source: Datastore::Running,
                filter,
            },
            Store::Operational => Rpc::Get { filter },
        };
        let operation = rpc.operation().to_owned();
        debug!(device = %self.id(), %store, %path, "read");

        let reply = self
            .service
            .invoke(rpc)
            .await?
            .into_result()
            .map_err(|errors| NetconfError::Rpc {
                device: self.id().clone(),
                operation: operation.clone(),
                errors,
            })?;
        let data = reply.data.ok_or_else(|| NetconfError::Protocol {
            device: self.id().clone(),
            reason: format!("{operation} reply carries no <data>"),
        })?;

        self.codec
            .parse_data(path, &data)
            .map_err(|e| self.codec_error(&e))
    }

    pub async fn exists(&self, store: Store, path: &NodePath) -> Result<bool, NetconfError> {
        Ok(self.read(store, path).await?.is_some())
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// The open write transaction, created on first use.
    pub async fn transaction(&self) -> Result<WriteTransaction, NetconfError> {
        self.transactions.get_or_create().await
    }

    pub async fn put(
        &self,
        store: Store,
        path: NodePath,
        data: XmlElement,
    ) -> Result<(), NetconfError> {
        self.transaction().await?.put(store, path, data).await
    }

    pub async fn merge(
        &self,
        store: Store,
        path: NodePath,
        data: XmlElement,
    ) -> Result<(), NetconfError> {
        self.transaction().await?.merge(store, path, data).await
    }

    pub async fn delete(&self, store: Store, path: NodePath) -> Result<(), NetconfError> {
        self.transaction().await?.delete(store, path).await
    }

    pub async fn commit(&self) -> Result<(), NetconfError> {
        self.transaction().await?.commit().await
    }

    pub async fn cancel(&self) -> bool {
        self.transactions.cancel_open().await
    }

    /// Cancel any open transaction; its cleanup runs in the background.
    pub async fn shutdown(&self) {
        if self.cancel().await {
            info!(device = %self.id(), "cancelled open transaction on shutdown");
        }
    }

    fn codec_error(&self, err: &CodecError) -> NetconfError {
        NetconfError::Codec {
            device: self.id().clone(),
            reason: err.to_string(),
        }
    }
}

impl std::fmt::Debug for NetconfDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetconfDevice")
            .field("id", self.id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
