// ── Payload codec boundary ──
//
// The transaction engine never interprets data trees. It asks a
// `PayloadCodec` to turn (path, data, action) into an edit-config
// `<config>` body, a path into a subtree filter, and a `<data>` reply
// back into the node at a path.

use std::fmt;
use std::str::FromStr;

use netconf_proto::rpc::{config_element, subtree_filter};
use netconf_proto::{ModifyAction, NETCONF_BASE_NS, QName, XmlElement};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CodecError(pub String);

// ── Node paths ───────────────────────────────────────────────────────

/// One step of a [`NodePath`]: an element name plus list-key predicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathArg {
    pub name: QName,
    pub keys: Vec<(QName, String)>,
}

impl PathArg {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            keys: Vec::new(),
        }
    }

    pub fn with_key(mut self, name: QName, value: impl Into<String>) -> Self {
        self.keys.push((name, value.into()));
        self
    }

    fn matches(&self, el: &XmlElement) -> bool {
        el.name() == &self.name
            && self
                .keys
                .iter()
                .all(|(key, value)| el.child(key).is_some_and(|k| k.text().trim() == value))
    }

    /// The element with its key leaves, no other content.
    fn skeleton(&self) -> XmlElement {
        XmlElement::new(self.name.clone()).with_children(
            self.keys
                .iter()
                .map(|(key, value)| XmlElement::new(key.clone()).with_text(value.clone())),
        )
    }
}

/// Hierarchical identifier of a node in a configuration tree.
///
/// Text form: `/{urn:example}top/interface[name=eth0]/mtu`. A segment
/// without `{namespace}` inherits the namespace of the one before it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodePath(Vec<PathArg>);

impl NodePath {
    /// The datastore root.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(mut self, arg: PathArg) -> Self {
        self.0.push(arg);
        self
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn args(&self) -> &[PathArg] {
        &self.0
    }

    pub fn last(&self) -> Option<&PathArg> {
        self.0.last()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        let mut namespace: Option<&str> = None;
        for arg in &self.0 {
            f.write_str("/")?;
            if arg.name.namespace() != namespace {
                write!(f, "{{{}}}", arg.name.namespace().unwrap_or_default())?;
                namespace = arg.name.namespace();
            }
            f.write_str(&arg.name.local)?;
            for (key, value) in &arg.keys {
                write!(f, "[{}={value}]", key.local)?;
            }
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |reason: &str| CodecError(format!("invalid path '{s}': {reason}"));

        let mut args = Vec::new();
        let mut namespace: Option<String> = None;
        let mut rest = s.trim().strip_prefix('/').unwrap_or(s.trim());

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('{') {
                let end = after.find('}').ok_or_else(|| bad("unterminated namespace"))?;
                namespace = Some(after[..end].to_owned());
                rest = &after[end + 1..];
            }
            let ns = namespace.clone().ok_or_else(|| bad("first segment needs a {namespace}"))?;

            let end = segment_end(rest);
            let (segment, tail) = rest.split_at(end);
            rest = tail.strip_prefix('/').unwrap_or(tail);

            let (local, mut predicates) = match segment.find('[') {
                Some(i) => segment.split_at(i),
                None => (segment, ""),
            };
            if local.is_empty() {
                return Err(bad("empty segment"));
            }

            let mut arg = PathArg::new(QName::new(ns.clone(), local));
            while let Some(p) = predicates.strip_prefix('[') {
                let close = p.find(']').ok_or_else(|| bad("unterminated key predicate"))?;
                let (key, value) = p[..close]
                    .split_once('=')
                    .ok_or_else(|| bad("key predicate needs key=value"))?;
                let value = value.trim_matches(|c| c == '\'' || c == '"');
                arg = arg.with_key(QName::new(ns.clone(), key.trim()), value);
                predicates = &p[close + 1..];
            }
            if !predicates.is_empty() {
                return Err(bad("trailing characters after key predicate"));
            }
            args.push(arg);
        }
        Ok(Self(args))
    }
}

/// Index of the `/` ending the current segment, ignoring any inside
/// key predicates.
fn segment_end(s: &str) -> usize {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => return i,
            _ => {}
        }
    }
    s.len()
}

// ── Codec contract ───────────────────────────────────────────────────

/// Converts between caller data and NETCONF payloads.
pub trait PayloadCodec: Send + Sync {
    /// Build the `<config>` body of an edit-config for one edit.
    fn edit_structure(
        &self,
        path: &NodePath,
        data: Option<&XmlElement>,
        action: ModifyAction,
    ) -> Result<XmlElement, CodecError>;

    /// Build a `<filter>` selecting `path`; `None` selects everything.
    fn filter_for(&self, path: &NodePath) -> Result<Option<XmlElement>, CodecError>;

    /// Extract the node at `path` from a reply's `<data>` element.
    fn parse_data(
        &self,
        path: &NodePath,
        data: &XmlElement,
    ) -> Result<Option<XmlElement>, CodecError>;
}

/// Schema-less codec: data is already XML, paths map one-to-one onto
/// element nesting.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlPayloadCodec;

impl PayloadCodec for XmlPayloadCodec {
    fn edit_structure(
        &self,
        path: &NodePath,
        data: Option<&XmlElement>,
        action: ModifyAction,
    ) -> Result<XmlElement, CodecError> {
        let needs_data = matches!(
            action,
            ModifyAction::Merge | ModifyAction::Replace | ModifyAction::Create
        );

        let target = match (path.last(), data) {
            (_, None) if needs_data => {
                return Err(CodecError(format!("{action} at {path} needs data")));
            }
            (Some(arg), Some(data)) => {
                if data.name() != &arg.name {
                    return Err(CodecError(format!(
                        "data element {} does not match path end {}",
                        data.name(),
                        arg.name
                    )));
                }
                data.clone()
            }
            (Some(arg), None) => arg.skeleton(),
            (None, Some(data)) => data.clone(),
            (None, None) => return Err(CodecError(format!("{action} needs a path or data"))),
        };
        let target = target.with_prefixed_attribute(
            "nc",
            QName::new(NETCONF_BASE_NS, "operation"),
            action.as_ref(),
        );

        let args = path.args();
        let ancestors = args.len().saturating_sub(1);
        let tree = args[..ancestors]
            .iter()
            .rev()
            .fold(target, |child, arg| arg.skeleton().with_child(child));

        Ok(config_element([tree]))
    }

    fn filter_for(&self, path: &NodePath) -> Result<Option<XmlElement>, CodecError> {
        let Some(selection) = path
            .args()
            .iter()
            .rev()
            .fold(None, |child: Option<XmlElement>, arg| {
                let el = arg.skeleton();
                Some(match child {
                    Some(child) => el.with_child(child),
                    None => el,
                })
            })
        else {
            return Ok(None);
        };
        Ok(Some(subtree_filter([selection])))
    }

    fn parse_data(
        &self,
        path: &NodePath,
        data: &XmlElement,
    ) -> Result<Option<XmlElement>, CodecError> {
        if !data.is(NETCONF_BASE_NS, "data") {
            return Err(CodecError(format!("expected <data>, got <{}>", data.name())));
        }
        let mut node = data;
        for arg in path.args() {
            match node.child_elements().find(|el| arg.matches(el)) {
                Some(next) => node = next,
                None => return Ok(None),
            }
        }
        Ok(Some(node.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NS: &str = "urn:example:if";

    fn interface_path() -> NodePath {
        "/{urn:example:if}interfaces/interface[name=eth0]".parse().unwrap()
    }

    #[test]
    fn parses_and_prints_paths() {
        let path = interface_path();
        assert_eq!(path.args().len(), 2);
        assert_eq!(path.args()[1].keys[0].1, "eth0");
        assert_eq!(path.to_string(), "/{urn:example:if}interfaces/interface[name=eth0]");
        assert_eq!(NodePath::root().to_string(), "/");
        assert_eq!("/".parse::<NodePath>().unwrap(), NodePath::root());
    }

    #[test]
    fn rejects_paths_without_namespace() {
        assert!("/interfaces".parse::<NodePath>().is_err());
        assert!("/{urn:x}a[name".parse::<NodePath>().is_err());
    }

    #[test]
    fn edit_structure_nests_data_under_ancestors() {
        let data = XmlElement::parse(
            r#"<interface xmlns="urn:example:if"><name>eth0</name><mtu>1500</mtu></interface>"#,
        )
        .unwrap();
        let config = XmlPayloadCodec
            .edit_structure(&interface_path(), Some(&data), ModifyAction::Replace)
            .unwrap();

        let interfaces = config.only_child_element().unwrap();
        assert!(interfaces.is(NS, "interfaces"));
        let interface = interfaces.only_child_element().unwrap();
        assert_eq!(
            interface.attribute(&QName::new(NETCONF_BASE_NS, "operation")),
            Some("replace")
        );
        assert_eq!(interface.child(&QName::new(NS, "mtu")).unwrap().text(), "1500");
    }

    #[test]
    fn delete_needs_no_data_and_keeps_keys() {
        let config = XmlPayloadCodec
            .edit_structure(&interface_path(), None, ModifyAction::Delete)
            .unwrap();
        let interface = config
            .only_child_element()
            .and_then(XmlElement::only_child_element)
            .unwrap();
        assert_eq!(interface.child(&QName::new(NS, "name")).unwrap().text(), "eth0");
        assert!(
            XmlPayloadCodec
                .edit_structure(&interface_path(), None, ModifyAction::Merge)
                .is_err()
        );
    }

    #[test]
    fn filter_and_parse_follow_the_path() {
        let filter = XmlPayloadCodec.filter_for(&interface_path()).unwrap().unwrap();
        assert_eq!(filter.attribute(&QName::unqualified("type")), Some("subtree"));
        assert!(XmlPayloadCodec.filter_for(&NodePath::root()).unwrap().is_none());

        let data = XmlElement::parse(
            r#"<data xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
                 <interfaces xmlns="urn:example:if">
                   <interface><name>eth1</name></interface>
                   <interface><name>eth0</name><mtu>9000</mtu></interface>
                 </interfaces>
               </data>"#,
        )
        .unwrap();
        let node = XmlPayloadCodec
            .parse_data(&interface_path(), &data)
            .unwrap()
            .unwrap();
        assert_eq!(node.child(&QName::new(NS, "mtu")).unwrap().text(), "9000");

        let missing: NodePath = "/{urn:example:if}interfaces/interface[name=eth9]".parse().unwrap();
        assert_eq!(XmlPayloadCodec.parse_data(&missing, &data).unwrap(), None);
    }
}
