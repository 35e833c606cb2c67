use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use super::{Strategy, WriteTransaction};
use crate::codec::PayloadCodec;
use crate::config::DeviceConfig;
use crate::error::NetconfError;
use crate::session::RpcService;

/// Hands out the device's single open write transaction.
///
/// Concurrent writers share one transaction until it is committed or
/// cancelled; the next call then opens a fresh one, which starts only
/// after the previous one has finished its cleanup.
pub struct TransactionProvider {
    service: Arc<dyn RpcService>,
    codec: Arc<dyn PayloadCodec>,
    config: DeviceConfig,
    strategy: Option<Strategy>,
    current: Mutex<Option<WriteTransaction>>,
}

impl TransactionProvider {
    pub fn new(
        service: Arc<dyn RpcService>,
        codec: Arc<dyn PayloadCodec>,
        config: DeviceConfig,
    ) -> Self {
        let strategy = Strategy::select(service.capabilities());
        Self {
            service,
            codec,
            config,
            strategy,
            current: Mutex::new(None),
        }
    }

    pub fn strategy(&self) -> Result<Strategy, NetconfError> {
        self.strategy.ok_or_else(|| NetconfError::NoWriteStrategy {
            device: self.service.device().clone(),
        })
    }

    /// The open transaction, or a new one.
    pub async fn get_or_create(&self) -> Result<WriteTransaction, NetconfError> {
        let strategy = self.strategy()?;
        let mut current = self.current.lock().await;

        if let Some(tx) = current.as_ref() {
            if tx.is_open().await {
                return Ok(tx.clone());
            }
        }

        let previous = current
            .as_ref()
            .filter(|tx| !tx.is_finished())
            .map(WriteTransaction::finished_signal);
        let tx = WriteTransaction::open(
            strategy,
            Arc::clone(&self.service),
            Arc::clone(&self.codec),
            &self.config,
            previous,
        );
        debug!(device = %self.service.device(), %strategy, "new write transaction");
        *current = Some(tx.clone());
        Ok(tx)
    }

    /// Cancel the open transaction, if any.
    pub async fn cancel_open(&self) -> bool {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some(tx) => tx.cancel().await,
            None => false,
        }
    }
}
