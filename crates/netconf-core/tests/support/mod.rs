// Shared helpers for netconf-core integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Mutex;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use netconf_core::{NetconfError, NodePath, RemoteDeviceId, RpcService, WriteTransaction};
use netconf_proto::{
    CapabilitySet, ErrorTag, ErrorType, NETCONF_BASE_NS, ProtocolCapability, QName, Rpc, RpcError,
    RpcReply, XmlElement,
};

pub const NS: &str = "urn:example:test";

pub fn device_id(name: &str) -> RemoteDeviceId {
    RemoteDeviceId::new(name, "127.0.0.1:830".parse().unwrap()).unwrap()
}

/// `/{urn:example:test}<local>`
pub fn path(local: &str) -> NodePath {
    format!("/{{{NS}}}{local}").parse().unwrap()
}

pub fn leaf(local: &str, value: &str) -> XmlElement {
    XmlElement::new(QName::new(NS, local)).with_text(value)
}

pub fn caps(protocols: &[ProtocolCapability]) -> CapabilitySet {
    let mut set = CapabilitySet::new();
    set.insert(ProtocolCapability::Base10);
    for p in protocols {
        set.insert(*p);
    }
    set
}

/// Wait until the transaction actor has finished commit or cleanup.
pub async fn wait_finished(tx: &WriteTransaction) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !tx.is_finished() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

// ── Scripted RPC service ────────────────────────────────────────────

/// How the scripted device answers.
#[derive(Debug, Default)]
pub struct Script {
    /// Fail this many `<lock>` calls before granting one.
    pub lock_failures: usize,
    /// 1-based edit-config calls answered with an rpc-error.
    pub failing_edits: Vec<usize>,
    /// 1-based edit-config calls that never get an answer.
    pub hanging_edits: Vec<usize>,
    pub fail_validate: bool,
    pub fail_commit: bool,
    /// `<data>` returned by get and get-config.
    pub data: Option<XmlElement>,
    /// get and get-config never get an answer.
    pub hang_reads: bool,
    edits_seen: usize,
    locks_seen: usize,
}

/// Records every RPC and answers from a [`Script`].
pub struct ScriptedService {
    device: RemoteDeviceId,
    capabilities: CapabilitySet,
    script: Mutex<Script>,
    log: Mutex<Vec<Rpc>>,
}

impl ScriptedService {
    pub fn new(capabilities: CapabilitySet) -> Self {
        Self {
            device: device_id("scripted"),
            capabilities,
            script: Mutex::new(Script::default()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// A device with `:candidate`, `:validate:1.1` and `:rollback-on-error`.
    pub fn candidate() -> Self {
        Self::new(caps(&[
            ProtocolCapability::Candidate,
            ProtocolCapability::Validate11,
            ProtocolCapability::RollbackOnError,
        ]))
    }

    /// A device with `:writable-running` only.
    pub fn running() -> Self {
        Self::new(caps(&[ProtocolCapability::WritableRunning]))
    }

    pub fn script(self, edit: impl FnOnce(&mut Script)) -> Self {
        edit(&mut self.script.lock().unwrap());
        self
    }

    pub fn calls(&self) -> Vec<Rpc> {
        self.log.lock().unwrap().clone()
    }

    pub fn operations(&self) -> Vec<String> {
        self.calls().iter().map(|rpc| rpc.operation().to_owned()).collect()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.operations().iter().filter(|op| *op == operation).count()
    }

    /// The `nc:operation` of every edit-config, in send order.
    pub fn edit_actions(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|rpc| match rpc {
                Rpc::EditConfig { config, .. } => find_operation(config),
                _ => None,
            })
            .collect()
    }

    fn answer(&self, rpc: &Rpc) -> Option<RpcReply> {
        let mut script = self.script.lock().unwrap();
        let refuse = |tag: ErrorTag| {
            Some(RpcReply::with_errors(
                Some("1".into()),
                vec![RpcError::new(ErrorType::Application, tag).with_message("scripted failure")],
            ))
        };

        match rpc {
            Rpc::Lock { .. } => {
                script.locks_seen += 1;
                if script.locks_seen <= script.lock_failures {
                    return Some(RpcReply::with_errors(
                        Some("1".into()),
                        vec![RpcError::new(ErrorType::Protocol, ErrorTag::LockDenied)
                            .with_info(XmlElement::netconf("session-id").with_text("99"))],
                    ));
                }
                Some(RpcReply::ok("1"))
            }
            Rpc::EditConfig { .. } => {
                script.edits_seen += 1;
                let n = script.edits_seen;
                if script.hanging_edits.contains(&n) {
                    return None;
                }
                if script.failing_edits.contains(&n) {
                    return refuse(ErrorTag::InvalidValue);
                }
                Some(RpcReply::ok("1"))
            }
            Rpc::Validate { .. } if script.fail_validate => refuse(ErrorTag::OperationFailed),
            Rpc::Commit if script.fail_commit => refuse(ErrorTag::OperationFailed),
            Rpc::Get { .. } | Rpc::GetConfig { .. } => {
                if script.hang_reads {
                    return None;
                }
                let data = script
                    .data
                    .clone()
                    .unwrap_or_else(|| XmlElement::netconf("data"));
                Some(RpcReply::with_data("1", data))
            }
            _ => Some(RpcReply::ok("1")),
        }
    }
}

impl RpcService for ScriptedService {
    fn device(&self) -> &RemoteDeviceId {
        &self.device
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    fn invoke(&self, rpc: Rpc) -> BoxFuture<'static, Result<RpcReply, NetconfError>> {
        let answer = self.answer(&rpc);
        self.log.lock().unwrap().push(rpc);
        match answer {
            Some(reply) => future::ready(Ok(reply)).boxed(),
            None => future::pending().boxed(),
        }
    }
}

fn find_operation(el: &XmlElement) -> Option<String> {
    if let Some(op) = el.attribute(&QName::new(NETCONF_BASE_NS, "operation")) {
        return Some(op.to_owned());
    }
    el.child_elements().find_map(find_operation)
}
