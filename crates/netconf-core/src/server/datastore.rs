// ── In-memory datastores ──
//
// Running and candidate trees, per-session locks, and edit-config
// application. Every operation is all-or-nothing: edits run against a
// copy that replaces the datastore only when the whole edit succeeded.

use std::collections::HashMap;
use std::str::FromStr;

use netconf_proto::filter::is_subtree_filter;
use netconf_proto::{
    Datastore, DefaultOperation, ErrorTag, ErrorType, ModifyAction, NETCONF_BASE_NS, QName, Rpc,
    RpcError, XmlElement, XmlNode,
};

/// List element name to key leaf names.
///
/// The store has no schema. Elements named here are matched against
/// existing siblings by their key leaves; every other element is
/// matched by name alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListKeys(HashMap<QName, Vec<QName>>);

impl ListKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list(mut self, list: QName, keys: impl IntoIterator<Item = QName>) -> Self {
        self.0.insert(list, keys.into_iter().collect());
        self
    }

    fn keys_for(&self, name: &QName) -> &[QName] {
        self.0.get(name).map_or(&[], Vec::as_slice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditOp {
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
    None,
}

impl From<ModifyAction> for EditOp {
    fn from(action: ModifyAction) -> Self {
        match action {
            ModifyAction::Merge => Self::Merge,
            ModifyAction::Replace => Self::Replace,
            ModifyAction::Create => Self::Create,
            ModifyAction::Delete => Self::Delete,
            ModifyAction::Remove => Self::Remove,
        }
    }
}

impl From<DefaultOperation> for EditOp {
    fn from(op: DefaultOperation) -> Self {
        match op {
            DefaultOperation::Merge => Self::Merge,
            DefaultOperation::Replace => Self::Replace,
            DefaultOperation::None => Self::None,
        }
    }
}

fn operation_attr() -> QName {
    QName::new(NETCONF_BASE_NS, "operation")
}

// ── Edit application ─────────────────────────────────────────────────

/// Apply the children of an edit-config `<config>` to a copy of `target`.
pub fn apply_edit(
    target: &XmlElement,
    config: &XmlElement,
    default_operation: DefaultOperation,
    keys: &ListKeys,
) -> Result<XmlElement, RpcError> {
    let mut result = target.clone();
    apply_children(&mut result, config, default_operation.into(), keys, "")?;
    Ok(result)
}

fn apply_children(
    parent: &mut XmlElement,
    edit_parent: &XmlElement,
    inherited: EditOp,
    keys: &ListKeys,
    path: &str,
) -> Result<(), RpcError> {
    for edit in edit_parent.child_elements() {
        apply_node(parent, edit, inherited, keys, path)?;
    }
    Ok(())
}

fn apply_node(
    parent: &mut XmlElement,
    edit: &XmlElement,
    inherited: EditOp,
    keys: &ListKeys,
    parent_path: &str,
) -> Result<(), RpcError> {
    let path = format!("{parent_path}/{}", edit.local_name());
    let op = match edit.attribute(&operation_attr()) {
        Some(raw) => ModifyAction::from_str(raw).map(EditOp::from).map_err(|_| {
            RpcError::new(ErrorType::Protocol, ErrorTag::BadAttribute)
                .with_path(path.clone())
                .with_message(format!("unknown operation '{raw}'"))
        })?,
        None => inherited,
    };
    let position = find_entry(parent, edit, keys);

    match (op, position) {
        (EditOp::Create, Some(_)) => Err(RpcError::new(ErrorType::Application, ErrorTag::DataExists)
            .with_path(path)
            .with_message("node already exists")),
        (EditOp::Delete, None) => Err(RpcError::new(ErrorType::Application, ErrorTag::DataMissing)
            .with_path(path)
            .with_message("node does not exist")),
        (EditOp::Delete | EditOp::Remove, Some(i)) => {
            parent.children_mut().remove(i);
            Ok(())
        }
        (EditOp::Remove, None) => Ok(()),
        (EditOp::Create | EditOp::Merge | EditOp::Replace, None) => {
            parent.push_child(stripped(edit));
            Ok(())
        }
        (EditOp::Replace, Some(i)) => {
            parent.children_mut()[i] = XmlNode::Element(stripped(edit));
            Ok(())
        }
        (EditOp::Merge, Some(i)) if edit.is_leaf() => {
            // An empty element merges onto an existing one unchanged.
            if !edit.text().trim().is_empty() {
                parent.children_mut()[i] = XmlNode::Element(stripped(edit));
            }
            Ok(())
        }
        (EditOp::Merge | EditOp::None, Some(i)) => match parent.children_mut().get_mut(i) {
            Some(XmlNode::Element(existing)) => apply_children(existing, edit, op, keys, &path),
            _ => Ok(()),
        },
        // Under `none` every level must already exist.
        (EditOp::None, None) => Err(RpcError::new(ErrorType::Application, ErrorTag::DataMissing)
            .with_path(path)
            .with_message("node does not exist")),
    }
}

fn find_entry(parent: &XmlElement, edit: &XmlElement, keys: &ListKeys) -> Option<usize> {
    let key_names = keys.keys_for(edit.name());
    parent.children().iter().position(|node| match node {
        XmlNode::Element(el) => {
            el.name() == edit.name()
                && key_names
                    .iter()
                    .all(|key| leaf_text(el, key) == leaf_text(edit, key))
        }
        XmlNode::Text(_) => false,
    })
}

fn leaf_text(el: &XmlElement, key: &QName) -> Option<String> {
    el.child(key).map(|leaf| leaf.text().trim().to_owned())
}

fn stripped(edit: &XmlElement) -> XmlElement {
    let mut el = edit.clone();
    strip_operations(&mut el);
    el
}

fn strip_operations(el: &mut XmlElement) {
    el.remove_attribute(&operation_attr());
    for child in el.child_elements_mut() {
        strip_operations(child);
    }
}

// ── Datastores ───────────────────────────────────────────────────────

/// Lock holder reported when the candidate holds uncommitted changes
/// but no session holds its lock.
const NO_SESSION: u32 = 0;

/// The server's datastores and locks.
#[derive(Debug, Clone)]
pub struct Datastores {
    running: XmlElement,
    candidate: XmlElement,
    candidate_enabled: bool,
    candidate_dirty: bool,
    locks: HashMap<Datastore, u32>,
    keys: ListKeys,
}

impl Datastores {
    pub fn new(candidate_enabled: bool, keys: ListKeys) -> Self {
        Self {
            running: XmlElement::netconf("data"),
            candidate: XmlElement::netconf("data"),
            candidate_enabled,
            candidate_dirty: false,
            locks: HashMap::new(),
            keys,
        }
    }

    /// Replace both trees' contents with `data`'s children.
    pub fn seed(&mut self, data: &XmlElement) {
        self.running = XmlElement::netconf("data").with_children(data.child_elements().cloned());
        self.candidate = self.running.clone();
        self.candidate_dirty = false;
    }

    pub fn running(&self) -> &XmlElement {
        &self.running
    }

    pub fn candidate(&self) -> &XmlElement {
        &self.candidate
    }

    pub fn lock_holder(&self, datastore: Datastore) -> Option<u32> {
        self.locks.get(&datastore).copied()
    }

    /// Run one operation for `session`. `Ok(Some)` carries `<data>`.
    pub fn execute(&mut self, session: u32, rpc: &Rpc) -> Result<Option<XmlElement>, RpcError> {
        match rpc {
            Rpc::Get { filter } => {
                check_filter(filter.as_ref())?;
                Ok(Some(self.running.clone()))
            }
            Rpc::GetConfig { source, filter } => {
                check_filter(filter.as_ref())?;
                Ok(Some(self.store(*source)?.clone()))
            }
            Rpc::Lock { target } => self.lock(session, *target).map(|()| None),
            Rpc::Unlock { target } => self.unlock(session, *target).map(|()| None),
            Rpc::EditConfig {
                target,
                default_operation,
                config,
                ..
            } => self
                .edit(session, *target, config, default_operation.unwrap_or_default())
                .map(|()| None),
            Rpc::DiscardChanges => {
                self.store(Datastore::Candidate)?;
                self.check_not_locked_by_other(session, Datastore::Candidate)?;
                self.candidate = self.running.clone();
                self.candidate_dirty = false;
                Ok(None)
            }
            Rpc::Commit => {
                self.store(Datastore::Candidate)?;
                self.check_not_locked_by_other(session, Datastore::Running)?;
                self.check_not_locked_by_other(session, Datastore::Candidate)?;
                self.running = self.candidate.clone();
                self.candidate_dirty = false;
                Ok(None)
            }
            Rpc::Validate { source } => self.store(*source).map(|_| None),
            Rpc::CloseSession => Ok(None),
            Rpc::Custom(op) => Err(RpcError::new(ErrorType::Protocol, ErrorTag::OperationNotSupported)
                .with_message(format!("operation {} is not supported", op.name()))),
        }
    }

    /// Drop a finished session's locks. A released candidate lock
    /// discards the candidate's uncommitted changes.
    pub fn release_session(&mut self, session: u32) {
        let held: Vec<Datastore> = self
            .locks
            .iter()
            .filter(|(_, holder)| **holder == session)
            .map(|(ds, _)| *ds)
            .collect();
        for datastore in held {
            self.locks.remove(&datastore);
            if datastore == Datastore::Candidate {
                self.candidate = self.running.clone();
                self.candidate_dirty = false;
            }
        }
    }

    fn store(&self, datastore: Datastore) -> Result<&XmlElement, RpcError> {
        match datastore {
            Datastore::Running => Ok(&self.running),
            Datastore::Candidate if self.candidate_enabled => Ok(&self.candidate),
            other => Err(RpcError::new(ErrorType::Protocol, ErrorTag::OperationNotSupported)
                .with_message(format!("datastore {other} is not supported"))),
        }
    }

    fn lock(&mut self, session: u32, target: Datastore) -> Result<(), RpcError> {
        self.store(target)?;
        if let Some(holder) = self.lock_holder(target) {
            return Err(lock_denied(holder, format!("{target} is locked by session {holder}")));
        }
        if target == Datastore::Candidate && self.candidate_dirty {
            return Err(lock_denied(NO_SESSION, "candidate has uncommitted changes".into()));
        }
        self.locks.insert(target, session);
        Ok(())
    }

    fn unlock(&mut self, session: u32, target: Datastore) -> Result<(), RpcError> {
        self.store(target)?;
        if self.lock_holder(target) != Some(session) {
            return Err(RpcError::new(ErrorType::Protocol, ErrorTag::OperationFailed)
                .with_message(format!("{target} is not locked by this session")));
        }
        self.locks.remove(&target);
        Ok(())
    }

    fn edit(
        &mut self,
        session: u32,
        target: Datastore,
        config: &XmlElement,
        default_operation: DefaultOperation,
    ) -> Result<(), RpcError> {
        let current = self.store(target)?;
        if target == Datastore::Running && self.candidate_enabled {
            return Err(RpcError::new(ErrorType::Protocol, ErrorTag::OperationNotSupported)
                .with_message("running is not directly writable; use the candidate"));
        }
        self.check_not_locked_by_other(session, target)?;

        let updated = apply_edit(current, config, default_operation, &self.keys)?;
        match target {
            Datastore::Candidate => {
                self.candidate = updated;
                self.candidate_dirty = true;
            }
            _ => self.running = updated,
        }
        Ok(())
    }

    fn check_not_locked_by_other(&self, session: u32, target: Datastore) -> Result<(), RpcError> {
        match self.lock_holder(target) {
            Some(holder) if holder != session => Err(RpcError::new(
                ErrorType::Protocol,
                ErrorTag::InUse,
            )
            .with_message(format!("{target} is locked by session {holder}"))),
            _ => Ok(()),
        }
    }
}

fn lock_denied(holder: u32, message: String) -> RpcError {
    RpcError::new(ErrorType::Protocol, ErrorTag::LockDenied)
        .with_message(message)
        .with_info(XmlElement::netconf("session-id").with_text(holder.to_string()))
}

fn check_filter(filter: Option<&XmlElement>) -> Result<(), RpcError> {
    match filter {
        Some(filter) if !is_subtree_filter(filter) => {
            Err(RpcError::new(ErrorType::Protocol, ErrorTag::OperationNotSupported)
                .with_message("only subtree filters are supported"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NS: &str = "urn:example:users";

    fn xml(s: &str) -> XmlElement {
        XmlElement::parse(s).unwrap()
    }

    fn keys() -> ListKeys {
        ListKeys::new().with_list(QName::new(NS, "user"), [QName::new(NS, "name")])
    }

    fn data(body: &str) -> XmlElement {
        xml(&format!(
            r#"<data xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">{body}</data>"#
        ))
    }

    fn config(body: &str) -> XmlElement {
        xml(&format!(
            r#"<config xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"
                       xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0">{body}</config>"#
        ))
    }

    fn users(entries: &str) -> String {
        format!(r#"<users xmlns="urn:example:users">{entries}</users>"#)
    }

    #[test]
    fn merge_adds_list_entries_by_key() {
        let target = data(&users("<user><name>ann</name><uid>1</uid></user>"));
        let edit = config(&users("<user><name>bob</name><uid>2</uid></user>"));
        let result = apply_edit(&target, &edit, DefaultOperation::Merge, &keys()).unwrap();
        assert_eq!(
            result,
            data(&users(
                "<user><name>ann</name><uid>1</uid></user><user><name>bob</name><uid>2</uid></user>"
            ))
        );
    }

    #[test]
    fn merge_updates_matching_entry_leaf() {
        let target = data(&users("<user><name>ann</name><uid>1</uid></user>"));
        let edit = config(&users("<user><name>ann</name><uid>7</uid></user>"));
        let result = apply_edit(&target, &edit, DefaultOperation::Merge, &keys()).unwrap();
        assert_eq!(result, data(&users("<user><name>ann</name><uid>7</uid></user>")));
    }

    #[test]
    fn create_and_delete_check_existence() {
        let target = data(&users("<user><name>ann</name></user>"));

        let create = config(&users(r#"<user nc:operation="create"><name>ann</name></user>"#));
        let err = apply_edit(&target, &create, DefaultOperation::None, &keys()).unwrap_err();
        assert_eq!(err.tag, ErrorTag::DataExists);

        let delete = config(&users(r#"<user nc:operation="delete"><name>zed</name></user>"#));
        let err = apply_edit(&target, &delete, DefaultOperation::None, &keys()).unwrap_err();
        assert_eq!(err.tag, ErrorTag::DataMissing);
        assert_eq!(err.path.as_deref(), Some("/users/user"));

        let remove = config(&users(r#"<user nc:operation="remove"><name>zed</name></user>"#));
        assert_eq!(
            apply_edit(&target, &remove, DefaultOperation::None, &keys()).unwrap(),
            target
        );
    }

    #[test]
    fn default_none_only_applies_explicit_operations() {
        let target = data(&users("<user><name>ann</name><uid>1</uid></user>"));
        let edit = config(&users(
            r#"<user><name>ann</name><uid>9</uid><shell nc:operation="replace">zsh</shell></user>"#,
        ));
        let result = apply_edit(&target, &edit, DefaultOperation::None, &keys()).unwrap();
        assert_eq!(
            result,
            data(&users("<user><name>ann</name><uid>1</uid><shell>zsh</shell></user>"))
        );
    }

    #[test]
    fn default_none_rejects_missing_levels() {
        let edit = config(&users(r#"<user><name>ann</name><uid nc:operation="create">5</uid></user>"#));
        let err = apply_edit(&data(""), &edit, DefaultOperation::None, &keys()).unwrap_err();
        assert_eq!(err.tag, ErrorTag::DataMissing);
        assert_eq!(err.path.as_deref(), Some("/users"));

        let target = data(&users(""));
        let err = apply_edit(&target, &edit, DefaultOperation::None, &keys()).unwrap_err();
        assert_eq!(err.path.as_deref(), Some("/users/user"));
    }

    #[test]
    fn default_merge_creates_missing_ancestors() {
        let edit = config(&users(
            r#"<user><name>ann</name><uid nc:operation="replace">5</uid></user>"#,
        ));
        let result = apply_edit(&data(""), &edit, DefaultOperation::Merge, &keys()).unwrap();
        assert_eq!(result, data(&users("<user><name>ann</name><uid>5</uid></user>")));
    }

    #[test]
    fn unknown_operation_is_bad_attribute() {
        let edit = config(&users(r#"<user nc:operation="explode"><name>a</name></user>"#));
        let err = apply_edit(&data(""), &edit, DefaultOperation::Merge, &keys()).unwrap_err();
        assert_eq!(err.tag, ErrorTag::BadAttribute);
    }

    #[test]
    fn lock_is_exclusive_and_reports_holder() {
        let mut stores = Datastores::new(true, ListKeys::new());
        stores.execute(1, &Rpc::Lock { target: Datastore::Candidate }).unwrap();
        let err = stores
            .execute(2, &Rpc::Lock { target: Datastore::Candidate })
            .unwrap_err();
        assert_eq!(err.tag, ErrorTag::LockDenied);
        assert_eq!(err.session_id(), Some(1));

        assert!(stores.execute(2, &Rpc::Unlock { target: Datastore::Candidate }).is_err());
        stores.release_session(1);
        assert_eq!(stores.lock_holder(Datastore::Candidate), None);
    }

    #[test]
    fn dirty_candidate_blocks_lock_until_discarded() {
        let mut stores = Datastores::new(true, keys());
        stores
            .execute(
                1,
                &Rpc::EditConfig {
                    target: Datastore::Candidate,
                    default_operation: None,
                    error_option: None,
                    config: config(&users("<user><name>ann</name></user>")),
                },
            )
            .unwrap();

        let err = stores.execute(2, &Rpc::Lock { target: Datastore::Candidate }).unwrap_err();
        assert_eq!(err.session_id(), Some(0));

        stores.execute(2, &Rpc::DiscardChanges).unwrap();
        stores.execute(2, &Rpc::Lock { target: Datastore::Candidate }).unwrap();
    }

    #[test]
    fn commit_copies_candidate_to_running() {
        let mut stores = Datastores::new(true, keys());
        let edit = Rpc::EditConfig {
            target: Datastore::Candidate,
            default_operation: None,
            error_option: None,
            config: config(&users("<user><name>ann</name></user>")),
        };
        stores.execute(1, &edit).unwrap();
        assert_eq!(stores.running(), &data(""));

        stores.execute(1, &Rpc::Commit).unwrap();
        assert_eq!(stores.running(), &data(&users("<user><name>ann</name></user>")));
    }

    #[test]
    fn running_only_server_rejects_candidate() {
        let mut stores = Datastores::new(false, ListKeys::new());
        let err = stores.execute(1, &Rpc::Commit).unwrap_err();
        assert_eq!(err.tag, ErrorTag::OperationNotSupported);
    }
}
