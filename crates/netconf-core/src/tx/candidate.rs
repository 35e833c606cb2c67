// Candidate strategy: lock <candidate>, stage edits, validate, commit,
// unlock. Any failure after the lock discards the candidate and unlocks.

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future;
use netconf_proto::{Datastore, Rpc};
use tracing::{debug, warn};

use super::{LockState, PendingEdit, QueuedEdit, TxContext, WriteStrategy};
use crate::error::NetconfError;

pub(crate) struct CandidateWrite {
    ctx: TxContext,
    /// Outcome of `init`. Edits are only sent once this is `Ok`.
    lock: Result<(), NetconfError>,
    pending: Vec<PendingEdit>,
}

impl CandidateWrite {
    pub(crate) fn new(ctx: TxContext) -> Self {
        Self {
            ctx,
            lock: Ok(()),
            pending: Vec::new(),
        }
    }

    /// Discard staged changes and release the lock.
    fn cleanup_failure(&self) {
        let mut rpcs = vec![Rpc::DiscardChanges];
        if self.ctx.lock_allowed {
            rpcs.push(Rpc::Unlock {
                target: Datastore::Candidate,
            });
            self.ctx.set_lock_state(LockState::Unlocked);
        }
        self.ctx.fire_and_forget(rpcs);
    }

    fn cleanup_success(&self) {
        if self.ctx.lock_allowed {
            self.ctx.fire_and_forget(vec![Rpc::Unlock {
                target: Datastore::Candidate,
            }]);
            self.ctx.set_lock_state(LockState::Unlocked);
        }
    }
}

#[async_trait]
impl WriteStrategy for CandidateWrite {
    async fn init(&mut self) {
        if !self.ctx.lock_allowed {
            debug!(device = %self.ctx.device, "locking disabled, skipping candidate lock");
            return;
        }

        self.ctx.set_lock_state(LockState::Locking);
        let Err(first) = self.ctx.send_lock(Datastore::Candidate).await else {
            self.ctx.set_lock_state(LockState::Locked);
            return;
        };

        // A dirty candidate left by another session blocks the lock.
        warn!(device = %self.ctx.device, error = %first, "candidate lock failed, discarding and retrying");
        if let Err(e) = self
            .ctx
            .call(Rpc::DiscardChanges, |device, errors| NetconfError::Rpc {
                device,
                operation: "discard-changes".into(),
                errors,
            })
            .await
        {
            warn!(device = %self.ctx.device, error = %e, "discard-changes before lock retry failed");
        }

        match self.ctx.send_lock(Datastore::Candidate).await {
            Ok(()) => self.ctx.set_lock_state(LockState::Locked),
            Err(retry) => {
                warn!(device = %self.ctx.device, error = %retry, "candidate lock retry failed");
                self.ctx.set_lock_state(LockState::Failed);
                self.lock = Err(first);
            }
        }
    }

    fn edit(&mut self, edit: QueuedEdit) {
        let pending = match &self.lock {
            Ok(()) => self.ctx.send_edit(Datastore::Candidate, edit),
            Err(e) => PendingEdit {
                op: edit.op,
                reply: future::ready(Err(e.clone())).boxed(),
            },
        };
        self.pending.push(pending);
    }

    async fn commit(&mut self) -> Result<(), NetconfError> {
        if let Err(e) = &self.lock {
            return Err(e.clone());
        }

        // Stop at the first failed edit; dropping the rest discards
        // replies that are still in flight.
        for pending in std::mem::take(&mut self.pending) {
            if let Err(e) = pending.settle(&self.ctx.device).await {
                warn!(device = %self.ctx.device, error = %e, "edit failed, discarding candidate");
                self.cleanup_failure();
                return Err(e);
            }
        }

        if self.ctx.validate {
            let validated = self
                .ctx
                .call(
                    Rpc::Validate {
                        source: Datastore::Candidate,
                    },
                    |device, errors| NetconfError::Validation { device, errors },
                )
                .await;
            if let Err(e) = validated {
                warn!(device = %self.ctx.device, error = %e, "candidate validation failed");
                self.cleanup_failure();
                return Err(e);
            }
        }

        let committed = self
            .ctx
            .call(Rpc::Commit, |device, errors| NetconfError::Commit {
                device,
                errors,
            })
            .await;
        match committed {
            Ok(()) => {
                debug!(device = %self.ctx.device, "candidate committed");
                self.cleanup_success();
                Ok(())
            }
            Err(e) => {
                warn!(device = %self.ctx.device, error = %e, "commit failed");
                self.cleanup_failure();
                Err(e)
            }
        }
    }

    async fn abort(&mut self) {
        self.pending.clear();
        if self.lock.is_ok() {
            debug!(device = %self.ctx.device, "transaction cancelled, discarding candidate");
            self.cleanup_failure();
        }
    }
}
