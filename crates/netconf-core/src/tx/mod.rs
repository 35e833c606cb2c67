// ── Write transactions ──
//
// A `WriteTransaction` is a handle onto one actor task. Edits, commit
// and cancel are commands on an ordered queue; the actor owns the lock
// state and the in-flight replies and hands them to a strategy
// (candidate or running). Edits reach the device in submission order
// because the actor invokes them in the order it dequeues them.
//
// Nothing here blocks: each RPC round-trip is an await on the actor
// task, never on the session's reader.

mod candidate;
mod provider;
mod running;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use netconf_proto::{
    Datastore, DefaultOperation, ErrorOption, ModifyAction, ProtocolCapability, Rpc, RpcReply,
    XmlElement,
};
use strum::{Display, EnumString};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, warn};

pub use provider::TransactionProvider;

use crate::codec::{NodePath, PayloadCodec};
use crate::config::DeviceConfig;
use crate::device_id::RemoteDeviceId;
use crate::error::NetconfError;
use crate::session::RpcService;

use candidate::CandidateWrite;
use running::RunningWrite;

// ── Vocabulary ───────────────────────────────────────────────────────

/// Logical data store addressed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Store {
    Configuration,
    Operational,
}

/// How writes reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Strategy {
    /// Stage in `<candidate>`, then `<commit>`.
    Candidate,
    /// Edit `<running>` directly.
    Running,
}

impl Strategy {
    /// Pick the strategy the device's capabilities allow.
    pub fn select(capabilities: &netconf_proto::CapabilitySet) -> Option<Self> {
        if capabilities.supports(ProtocolCapability::Candidate) {
            Some(Self::Candidate)
        } else if capabilities.supports(ProtocolCapability::WritableRunning) {
            Some(Self::Running)
        } else {
            None
        }
    }

    pub fn datastore(self) -> Datastore {
        match self {
            Self::Candidate => Datastore::Candidate,
            Self::Running => Datastore::Running,
        }
    }
}

/// Which transaction call produced an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EditKind {
    Put,
    Merge,
    Delete,
}

impl EditKind {
    pub fn action(self) -> ModifyAction {
        match self {
            Self::Put => ModifyAction::Replace,
            Self::Merge => ModifyAction::Merge,
            Self::Delete => ModifyAction::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LockState {
    Unlocked,
    Locking,
    Locked,
    Failed,
}

/// One queued edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOperation {
    pub store: Datastore,
    pub path: NodePath,
    pub data: Option<XmlElement>,
    pub action: ModifyAction,
    pub kind: EditKind,
}

// ── Actor protocol ───────────────────────────────────────────────────

pub(crate) struct QueuedEdit {
    pub op: EditOperation,
    /// `<config>` body produced by the payload codec.
    pub config: XmlElement,
}

pub(crate) enum TxCommand {
    Edit(QueuedEdit),
    Commit(oneshot::Sender<Result<(), NetconfError>>),
    Cancel,
}

/// The strategy-specific half of a transaction.
#[async_trait]
pub(crate) trait WriteStrategy: Send {
    async fn init(&mut self);
    fn edit(&mut self, edit: QueuedEdit);
    async fn commit(&mut self) -> Result<(), NetconfError>;
    /// Failure cleanup after cancel or when every handle is dropped.
    async fn abort(&mut self);
}

/// An edit whose reply has not been examined yet.
pub(crate) struct PendingEdit {
    op: EditOperation,
    reply: BoxFuture<'static, Result<RpcReply, NetconfError>>,
}

impl PendingEdit {
    async fn settle(self, device: &RemoteDeviceId) -> Result<(), NetconfError> {
        let reply = self.reply.await?;
        reply.into_result().map(drop).map_err(|errors| NetconfError::Edit {
            device: device.clone(),
            path: self.op.path.to_string(),
            operation: self.op.action,
            errors,
        })
    }
}

/// What both strategies share: the device, its RPC service and the
/// write options resolved against its capabilities.
pub(crate) struct TxContext {
    device: RemoteDeviceId,
    service: Arc<dyn RpcService>,
    lock_allowed: bool,
    rollback: bool,
    validate: bool,
    lock_state: LockStateSender,
}

/// Publishes lock transitions; clones may outlive the strategy call
/// that made them.
#[derive(Clone)]
pub(crate) struct LockStateSender {
    device: RemoteDeviceId,
    sender: Arc<watch::Sender<LockState>>,
}

impl LockStateSender {
    fn set(&self, state: LockState) {
        debug!(device = %self.device, lock = %state, "lock state");
        self.sender.send_replace(state);
    }
}

impl TxContext {
    fn set_lock_state(&self, state: LockState) {
        self.lock_state.set(state);
    }

    /// Put and merge rely on the default `merge` so missing ancestors
    /// are created; a delete must not create the parents it walks.
    fn edit_rpc(&self, target: Datastore, edit: &QueuedEdit) -> Rpc {
        let default_operation = match edit.op.kind {
            EditKind::Delete => Some(DefaultOperation::None),
            EditKind::Put | EditKind::Merge => None,
        };
        Rpc::EditConfig {
            target,
            default_operation,
            error_option: self.rollback.then_some(ErrorOption::RollbackOnError),
            config: edit.config.clone(),
        }
    }

    fn send_edit(&self, target: Datastore, edit: QueuedEdit) -> PendingEdit {
        debug!(
            device = %self.device,
            datastore = %target,
            operation = %edit.op.action,
            path = %edit.op.path,
            "queueing edit-config"
        );
        let reply = self.service.invoke(self.edit_rpc(target, &edit));
        PendingEdit { op: edit.op, reply }
    }

    fn send_lock(&self, datastore: Datastore) -> BoxFuture<'static, Result<(), NetconfError>> {
        let reply = self.service.invoke(Rpc::Lock { target: datastore });
        let device = self.device.clone();
        Box::pin(async move {
            let reply = reply.await?;
            reply.into_result().map(drop).map_err(|errors| NetconfError::Lock {
                device,
                datastore,
                errors,
            })
        })
    }

    /// Send `rpc`; device-reported errors are mapped with `reject`.
    async fn call(
        &self,
        rpc: Rpc,
        reject: impl FnOnce(RemoteDeviceId, Vec<netconf_proto::RpcError>) -> NetconfError,
    ) -> Result<(), NetconfError> {
        let reply = self.service.invoke(rpc).await?;
        reply
            .into_result()
            .map(drop)
            .map_err(|errors| reject(self.device.clone(), errors))
    }

    /// Issue cleanup RPCs in order without waiting for them. Failures
    /// are logged; the caller already holds the error that matters.
    fn fire_and_forget(&self, rpcs: Vec<Rpc>) {
        let calls: Vec<_> = rpcs
            .into_iter()
            .map(|rpc| (rpc.operation().to_owned(), self.service.invoke(rpc)))
            .collect();
        let device = self.device.clone();

        tokio::spawn(async move {
            for (operation, call) in calls {
                match call.await {
                    Ok(reply) if reply.is_success() => {
                        debug!(device = %device, %operation, "cleanup done");
                    }
                    Ok(reply) => {
                        let errors: Vec<String> = reply.errors.iter().map(ToString::to_string).collect();
                        warn!(device = %device, %operation, ?errors, "cleanup rejected by device");
                    }
                    Err(e) => warn!(device = %device, %operation, error = %e, "cleanup failed"),
                }
            }
        });
    }
}

async fn drive(
    mut strategy: Box<dyn WriteStrategy>,
    mut commands: mpsc::UnboundedReceiver<TxCommand>,
    previous: Option<watch::Receiver<bool>>,
    finished: watch::Sender<bool>,
) {
    // Transactions on one device run back to back, never overlapping.
    if let Some(mut previous) = previous {
        let _ = previous.wait_for(|done| *done).await;
    }

    strategy.init().await;
    let mut terminated = false;
    while let Some(command) = commands.recv().await {
        match command {
            TxCommand::Edit(edit) => strategy.edit(edit),
            TxCommand::Commit(reply) => {
                let _ = reply.send(strategy.commit().await);
                terminated = true;
                break;
            }
            TxCommand::Cancel => break,
        }
    }
    if !terminated {
        strategy.abort().await;
    }
    finished.send_replace(true);
}

// ── Handle ───────────────────────────────────────────────────────────

/// Caller handle on a device write transaction. Clones share the same
/// transaction.
#[derive(Clone)]
pub struct WriteTransaction {
    inner: Arc<TxInner>,
}

struct TxInner {
    device: RemoteDeviceId,
    strategy: Strategy,
    codec: Arc<dyn PayloadCodec>,
    /// `true` while edits are accepted. Held across the enqueue so no
    /// edit can slip in behind a commit.
    open: Mutex<bool>,
    commands: mpsc::UnboundedSender<TxCommand>,
    lock_state: watch::Receiver<LockState>,
    finished: watch::Receiver<bool>,
}

impl WriteTransaction {
    /// Spawn the actor. It waits for `previous` to finish before locking.
    pub(crate) fn open(
        strategy: Strategy,
        service: Arc<dyn RpcService>,
        codec: Arc<dyn PayloadCodec>,
        config: &DeviceConfig,
        previous: Option<watch::Receiver<bool>>,
    ) -> Self {
        let device = service.device().clone();
        let capabilities = service.capabilities();
        let rollback =
            config.rollback_on_error && capabilities.supports(ProtocolCapability::RollbackOnError);
        let validate = config.validate_before_commit
            && (capabilities.supports(ProtocolCapability::Validate11)
                || capabilities.supports(ProtocolCapability::Validate10));

        let (lock_tx, lock_state) = watch::channel(LockState::Unlocked);
        let (finished_tx, finished) = watch::channel(false);
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let ctx = TxContext {
            device: device.clone(),
            service,
            lock_allowed: config.lock_allowed,
            rollback,
            validate,
            lock_state: LockStateSender {
                device: device.clone(),
                sender: Arc::new(lock_tx),
            },
        };
        let actor: Box<dyn WriteStrategy> = match strategy {
            Strategy::Candidate => Box::new(CandidateWrite::new(ctx)),
            Strategy::Running => Box::new(RunningWrite::new(ctx)),
        };
        debug!(device = %device, %strategy, rollback, validate, "opening write transaction");
        tokio::spawn(drive(actor, commands_rx, previous, finished_tx));

        Self {
            inner: Arc::new(TxInner {
                device,
                strategy,
                codec,
                open: Mutex::new(true),
                commands,
                lock_state,
                finished,
            }),
        }
    }

    pub fn device(&self) -> &RemoteDeviceId {
        &self.inner.device
    }

    pub fn strategy(&self) -> Strategy {
        self.inner.strategy
    }

    pub fn lock_state(&self) -> LockState {
        *self.inner.lock_state.borrow()
    }

    pub fn watch_lock_state(&self) -> watch::Receiver<LockState> {
        self.inner.lock_state.clone()
    }

    /// Whether edits are still accepted.
    pub async fn is_open(&self) -> bool {
        *self.inner.open.lock().await
    }

    /// Whether the actor has finished commit or cleanup.
    pub fn is_finished(&self) -> bool {
        *self.inner.finished.borrow()
    }

    pub(crate) fn finished_signal(&self) -> watch::Receiver<bool> {
        self.inner.finished.clone()
    }

    /// Replace the node at `path` with `data`.
    pub async fn put(
        &self,
        store: Store,
        path: NodePath,
        data: XmlElement,
    ) -> Result<(), NetconfError> {
        self.submit(EditKind::Put, store, path, Some(data)).await
    }

    /// Merge `data` into the node at `path`.
    pub async fn merge(
        &self,
        store: Store,
        path: NodePath,
        data: XmlElement,
    ) -> Result<(), NetconfError> {
        self.submit(EditKind::Merge, store, path, Some(data)).await
    }

    /// Delete the node at `path`; the device rejects a missing node.
    pub async fn delete(&self, store: Store, path: NodePath) -> Result<(), NetconfError> {
        self.submit(EditKind::Delete, store, path, None).await
    }

    /// Apply every queued edit. Resolves with the first failure.
    pub async fn commit(&self) -> Result<(), NetconfError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.close_with(TxCommand::Commit(reply_tx)).await?;
        reply_rx
            .await
            .unwrap_or_else(|_| Err(self.closed_error()))
    }

    /// Abandon the transaction. Returns `false` if it was already
    /// committed or cancelled.
    pub async fn cancel(&self) -> bool {
        self.close_with(TxCommand::Cancel).await.is_ok()
    }

    async fn submit(
        &self,
        kind: EditKind,
        store: Store,
        path: NodePath,
        data: Option<XmlElement>,
    ) -> Result<(), NetconfError> {
        if store != Store::Configuration {
            return Err(NetconfError::UnsupportedStore {
                device: self.inner.device.clone(),
                store,
            });
        }
        let action = kind.action();
        let config = self
            .inner
            .codec
            .edit_structure(&path, data.as_ref(), action)
            .map_err(|e| NetconfError::Codec {
                device: self.inner.device.clone(),
                reason: e.to_string(),
            })?;
        let edit = QueuedEdit {
            op: EditOperation {
                store: self.inner.strategy.datastore(),
                path,
                data,
                action,
                kind,
            },
            config,
        };

        let open = self.inner.open.lock().await;
        if !*open || self.inner.commands.send(TxCommand::Edit(edit)).is_err() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    async fn close_with(&self, command: TxCommand) -> Result<(), NetconfError> {
        let mut open = self.inner.open.lock().await;
        if !*open {
            return Err(self.closed_error());
        }
        *open = false;
        self.inner
            .commands
            .send(command)
            .map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> NetconfError {
        NetconfError::TransactionClosed {
            device: self.inner.device.clone(),
        }
    }
}

impl std::fmt::Debug for WriteTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("device", &self.inner.device)
            .field("strategy", &self.inner.strategy)
            .field("lock_state", &self.lock_state())
            .finish_non_exhaustive()
    }
}
