// Running strategy: lock <running>, edit it directly, unlock on commit.
// Nothing is gated on the lock reply; the commit result aggregates it.
// The lock state still tracks the reply as soon as it arrives.

use async_trait::async_trait;
use netconf_proto::{Datastore, Rpc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{LockState, PendingEdit, QueuedEdit, TxContext, WriteStrategy};
use crate::error::NetconfError;

pub(crate) struct RunningWrite {
    ctx: TxContext,
    lock: Option<JoinHandle<Result<(), NetconfError>>>,
    pending: Vec<PendingEdit>,
}

impl RunningWrite {
    pub(crate) fn new(ctx: TxContext) -> Self {
        Self {
            ctx,
            lock: None,
            pending: Vec::new(),
        }
    }

    fn unlock(&self) {
        if self.ctx.lock_allowed {
            self.ctx.fire_and_forget(vec![Rpc::Unlock {
                target: Datastore::Running,
            }]);
            self.ctx.set_lock_state(LockState::Unlocked);
        }
    }
}

#[async_trait]
impl WriteStrategy for RunningWrite {
    async fn init(&mut self) {
        if !self.ctx.lock_allowed {
            debug!(device = %self.ctx.device, "locking disabled, skipping running lock");
            return;
        }
        self.ctx.set_lock_state(LockState::Locking);
        let reply = self.ctx.send_lock(Datastore::Running);
        let lock_state = self.ctx.lock_state.clone();
        let device = self.ctx.device.clone();
        self.lock = Some(tokio::spawn(async move {
            let result = reply.await;
            match &result {
                Ok(()) => lock_state.set(LockState::Locked),
                Err(e) => {
                    warn!(device = %device, error = %e, "running lock failed");
                    lock_state.set(LockState::Failed);
                }
            }
            result
        }));
    }

    fn edit(&mut self, edit: QueuedEdit) {
        let pending = self.ctx.send_edit(Datastore::Running, edit);
        self.pending.push(pending);
    }

    async fn commit(&mut self) -> Result<(), NetconfError> {
        // Unlock goes out behind every edit, whatever their outcome.
        let lock = self.lock.take();
        let pending = std::mem::take(&mut self.pending);
        let lock_allowed = self.ctx.lock_allowed;
        if lock_allowed {
            self.ctx.fire_and_forget(vec![Rpc::Unlock {
                target: Datastore::Running,
            }]);
        }

        let mut first_error = None;
        let mut locked = false;
        if let Some(lock) = lock {
            match lock.await {
                Ok(Ok(())) => locked = true,
                Ok(Err(e)) => first_error = Some(e),
                Err(join) => {
                    self.ctx.set_lock_state(LockState::Failed);
                    first_error = Some(NetconfError::Protocol {
                        device: self.ctx.device.clone(),
                        reason: format!("lock reply lost: {join}"),
                    });
                }
            }
        }
        for edit in pending {
            if let Err(e) = edit.settle(&self.ctx.device).await {
                warn!(device = %self.ctx.device, error = %e, "edit on running failed");
                first_error.get_or_insert(e);
            }
        }
        if locked {
            self.ctx.set_lock_state(LockState::Unlocked);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(device = %self.ctx.device, "running edits applied");
                Ok(())
            }
        }
    }

    async fn abort(&mut self) {
        self.pending.clear();
        if let Some(lock) = self.lock.take() {
            lock.abort();
            let _ = lock.await;
        }
        debug!(device = %self.ctx.device, "transaction cancelled, releasing running");
        self.unlock();
    }
}
