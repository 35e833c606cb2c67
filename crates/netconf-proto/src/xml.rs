//! Owned XML element tree for NETCONF documents.
//!
//! NETCONF messages are small, namespace-heavy documents that the engine
//! inspects structurally (hello capabilities, rpc-reply status, subtree
//! filters) and otherwise passes through untouched. [`XmlElement`] keeps
//! just enough of the infoset for that: resolved element and attribute
//! names, the namespace declarations each element carried on the wire
//! (so prefixed text content such as identityrefs keeps its meaning), and
//! mixed element/text children.
//!
//! Parsing is built on `quick_xml::NsReader`; serialisation writes the
//! tree back out, re-declaring namespaces only where the in-scope
//! bindings differ from what the element needs.

use std::fmt;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, PrefixDeclaration, ResolveResult};
use quick_xml::NsReader;

use crate::error::Error;

/// Namespace of the NETCONF base protocol (RFC 6241).
pub const NETCONF_BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// Namespace of NETCONF event notifications (RFC 5277).
pub const NOTIFICATION_NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

// ── QName ────────────────────────────────────────────────────────────

/// A namespace-qualified name. Prefixes are a serialisation detail and
/// are not part of a name's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub namespace: Option<String>,
    pub local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            local: local.into(),
        }
    }

    /// A name in no namespace.
    pub fn unqualified(local: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local: local.into(),
        }
    }

    /// A name in the NETCONF base namespace.
    pub fn netconf(local: impl Into<String>) -> Self {
        Self::new(NETCONF_BASE_NS, local)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == Some(namespace)
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{ns}}}{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

// ── Attribute / namespace declarations ───────────────────────────────

/// A non-namespace-declaration attribute.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: QName,
    /// Prefix used on the wire, preferred when re-serialising.
    pub prefix: Option<String>,
    pub value: String,
}

/// An `xmlns` / `xmlns:p` declaration carried by an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    /// `None` for the default namespace.
    pub prefix: Option<String>,
    /// Empty string undeclares the default namespace.
    pub uri: String,
}

// ── Nodes ────────────────────────────────────────────────────────────

/// Child content of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An owned XML element with resolved names.
///
/// Equality is structural over names, attributes (order-insensitive) and
/// children; prefixes and namespace declarations are ignored.
#[derive(Debug, Clone)]
pub struct XmlElement {
    name: QName,
    prefix: Option<String>,
    namespaces: Vec<NamespaceDecl>,
    attributes: Vec<Attribute>,
    children: Vec<XmlNode>,
}

impl PartialEq for XmlElement {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.attributes.len() == other.attributes.len()
            && self.attributes.iter().all(|a| other.attribute(&a.name) == Some(a.value.as_str()))
            && self.children == other.children
    }
}

impl Eq for XmlElement {}

impl XmlElement {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            prefix: None,
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// An element in the NETCONF base namespace.
    pub fn netconf(local: impl Into<String>) -> Self {
        Self::new(QName::netconf(local))
    }

    // ── Builders ─────────────────────────────────────────────────────

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = XmlElement>) -> Self {
        self.children
            .extend(children.into_iter().map(XmlNode::Element));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    pub fn with_attribute(mut self, name: QName, value: impl Into<String>) -> Self {
        self.set_attribute(name, None, value);
        self
    }

    /// Attach an attribute that should be written with `prefix`.
    pub fn with_prefixed_attribute(
        mut self,
        prefix: impl Into<String>,
        name: QName,
        value: impl Into<String>,
    ) -> Self {
        self.set_attribute(name, Some(prefix.into()), value);
        self
    }

    pub fn with_namespace_decl(mut self, prefix: Option<&str>, uri: impl Into<String>) -> Self {
        self.namespaces.push(NamespaceDecl {
            prefix: prefix.map(str::to_owned),
            uri: uri.into(),
        });
        self
    }

    pub fn push_child(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.children.push(XmlNode::Text(text.into()));
    }

    /// Insert or replace an attribute.
    pub fn set_attribute(&mut self, name: QName, prefix: Option<String>, value: impl Into<String>) {
        let value = value.into();
        if let Some(existing) = self.attributes.iter_mut().find(|a| a.name == name) {
            existing.value = value;
            existing.prefix = prefix;
        } else {
            self.attributes.push(Attribute { name, prefix, value });
        }
    }

    pub fn remove_attribute(&mut self, name: &QName) -> Option<String> {
        let idx = self.attributes.iter().position(|a| &a.name == name)?;
        Some(self.attributes.remove(idx).value)
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn local_name(&self) -> &str {
        &self.name.local
    }

    pub fn namespace(&self) -> Option<&str> {
        self.name.namespace.as_deref()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.name.is(namespace, local)
    }

    pub fn namespace_decls(&self) -> &[NamespaceDecl] {
        &self.namespaces
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| &a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Look up an attribute by local name, accepting it either
    /// unqualified or in `namespace`.
    pub fn attribute_either(&self, local: &str, namespace: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| {
                a.name.local == local
                    && a.name.namespace.as_deref().is_none_or(|ns| ns == namespace)
            })
            .map(|a| a.value.as_str())
    }

    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut XmlElement> {
        self.children.iter_mut().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    pub fn has_child_elements(&self) -> bool {
        self.child_elements().next().is_some()
    }

    /// First child element with the given name.
    pub fn child(&self, name: &QName) -> Option<&XmlElement> {
        self.child_elements().find(|c| &c.name == name)
    }

    pub fn child_mut(&mut self, name: &QName) -> Option<&mut XmlElement> {
        self.child_elements_mut().find(|c| &c.name == name)
    }

    /// First child in the NETCONF base namespace with `local` name.
    pub fn netconf_child(&self, local: &str) -> Option<&XmlElement> {
        self.child_elements().find(|c| c.is(NETCONF_BASE_NS, local))
    }

    /// The single child element, if there is exactly one.
    pub fn only_child_element(&self) -> Option<&XmlElement> {
        let mut it = self.child_elements();
        let first = it.next()?;
        it.next().is_none().then_some(first)
    }

    /// Concatenated text of direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Text content of a leaf: present only when the element has no child
    /// elements and carries non-empty text.
    pub fn only_text(&self) -> Option<String> {
        if self.has_child_elements() {
            return None;
        }
        let text = self.text();
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_owned())
    }

    pub fn is_leaf(&self) -> bool {
        !self.has_child_elements()
    }

    /// Copy of this element with attributes and namespace declarations
    /// but no children.
    pub fn shallow_clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            prefix: self.prefix.clone(),
            namespaces: self.namespaces.clone(),
            attributes: self.attributes.clone(),
            children: Vec::new(),
        }
    }

    /// Remove every child element matching `pred`, returning how many
    /// were removed.
    pub fn remove_child_elements(&mut self, mut pred: impl FnMut(&XmlElement) -> bool) -> usize {
        let before = self.children.len();
        self.children.retain(|c| match c {
            XmlNode::Element(e) => !pred(e),
            XmlNode::Text(_) => true,
        });
        before - self.children.len()
    }

    pub fn into_children(self) -> Vec<XmlNode> {
        self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<XmlNode> {
        &mut self.children
    }

    // ── Parsing ──────────────────────────────────────────────────────

    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut reader = NsReader::from_str(input);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let (resolved, event) = reader.read_resolved_event()?;
            let namespace = owned_namespace(resolved)?;
            match event {
                Event::Start(start) => {
                    let element = start_element(&reader, &start, namespace)?;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = start_element(&reader, &start, namespace)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| Error::Xml("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = text.unescape()?;
                        if !text.is_empty() {
                            parent.push_text(text.into_owned());
                        }
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        let raw = data.into_inner();
                        parent.push_text(std::str::from_utf8(&raw)?.to_owned());
                    }
                }
                Event::Eof => break,
                // Declarations, comments, PIs and doctypes carry nothing
                // the protocol looks at.
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(Error::Xml("unexpected end of document".into()));
        }
        root.ok_or(Error::EmptyDocument)
    }

    pub fn parse_bytes(input: &[u8]) -> Result<Self, Error> {
        Self::parse(std::str::from_utf8(input)?)
    }

    // ── Serialisation ────────────────────────────────────────────────

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        let mut scope = Vec::new();
        write_element(&mut out, self, &mut scope);
        out
    }
}

impl fmt::Display for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

// ── Namespace scope ──────────────────────────────────────────────────

/// Stack of in-scope namespace declarations, pushed per element while
/// walking a tree from the root.
#[derive(Debug, Default, Clone)]
pub struct NamespaceScope {
    frames: Vec<Vec<NamespaceDecl>>,
}

impl NamespaceScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: &XmlElement) {
        self.frames.push(element.namespaces.clone());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Resolve a prefix (`None` for the default namespace).
    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|decl| decl.prefix.as_deref() == prefix)
            .map(|decl| decl.uri.as_str())
            .filter(|uri| !uri.is_empty())
    }
}

// ── Parse helpers ────────────────────────────────────────────────────

fn owned_namespace(resolved: ResolveResult<'_>) -> Result<Option<String>, Error> {
    match resolved {
        ResolveResult::Bound(Namespace(ns)) => Ok(Some(std::str::from_utf8(ns)?.to_owned())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(Error::UnboundPrefix(
            String::from_utf8_lossy(&prefix).into_owned(),
        )),
    }
}

fn start_element(
    reader: &NsReader<&[u8]>,
    start: &BytesStart<'_>,
    namespace: Option<String>,
) -> Result<XmlElement, Error> {
    let qname = start.name();
    let local = std::str::from_utf8(qname.local_name().as_ref())?.to_owned();
    let prefix = qname
        .prefix()
        .map(|p| std::str::from_utf8(p.as_ref()).map(str::to_owned))
        .transpose()?;

    let mut element = XmlElement::new(QName { namespace, local });
    element.prefix = prefix;

    for attr in start.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.into_owned();

        if let Some(binding) = attr.key.as_namespace_binding() {
            let prefix = match binding {
                PrefixDeclaration::Default => None,
                PrefixDeclaration::Named(p) => Some(std::str::from_utf8(p)?.to_owned()),
            };
            element.namespaces.push(NamespaceDecl { prefix, uri: value });
            continue;
        }

        let (resolved, local) = reader.resolve_attribute(attr.key);
        let namespace = owned_namespace(resolved)?;
        let local = std::str::from_utf8(local.as_ref())?.to_owned();
        let prefix = attr
            .key
            .prefix()
            .map(|p| std::str::from_utf8(p.as_ref()).map(str::to_owned))
            .transpose()?;
        element.attributes.push(Attribute {
            name: QName { namespace, local },
            prefix,
            value,
        });
    }

    Ok(element)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), Error> {
    if let Some(parent) = stack.last_mut() {
        parent.push_child(element);
        return Ok(());
    }
    if root.is_some() {
        return Err(Error::Xml("multiple root elements".into()));
    }
    *root = Some(element);
    Ok(())
}

// ── Write helpers ────────────────────────────────────────────────────

fn lookup<'a>(scope: &'a [NamespaceDecl], prefix: Option<&str>) -> Option<&'a str> {
    scope
        .iter()
        .rev()
        .find(|d| d.prefix.as_deref() == prefix)
        .map(|d| d.uri.as_str())
        .filter(|uri| !uri.is_empty())
}

fn bind(out: &mut String, scope: &mut Vec<NamespaceDecl>, prefix: Option<&str>, uri: &str) {
    match prefix {
        Some(p) => {
            out.push_str(" xmlns:");
            out.push_str(p);
        }
        None => out.push_str(" xmlns"),
    }
    out.push_str("=\"");
    out.push_str(&escape(uri));
    out.push('"');
    scope.push(NamespaceDecl {
        prefix: prefix.map(str::to_owned),
        uri: uri.to_owned(),
    });
}

fn write_element(out: &mut String, element: &XmlElement, scope: &mut Vec<NamespaceDecl>) {
    let mark = scope.len();
    let mut head = String::new();

    for decl in &element.namespaces {
        bind(&mut head, scope, decl.prefix.as_deref(), &decl.uri);
    }

    let ns = element.namespace();
    let tag = match (element.prefix.as_deref(), ns) {
        (Some(prefix), Some(uri)) => {
            if lookup(scope, Some(prefix)) != Some(uri) {
                bind(&mut head, scope, Some(prefix), uri);
            }
            format!("{prefix}:{}", element.name.local)
        }
        (_, ns) => {
            if lookup(scope, None) != ns {
                bind(&mut head, scope, None, ns.unwrap_or(""));
            }
            element.name.local.clone()
        }
    };

    let mut generated = 0usize;
    for attr in &element.attributes {
        head.push(' ');
        if let Some(uri) = attr.name.namespace() {
            let prefix = attr
                .prefix
                .clone()
                .filter(|p| lookup(scope, Some(p)).is_none_or(|bound| bound == uri))
                .or_else(|| {
                    scope
                        .iter()
                        .rev()
                        .find(|d| d.prefix.is_some() && d.uri == uri)
                        .and_then(|d| d.prefix.clone())
                })
                .unwrap_or_else(|| {
                    generated += 1;
                    format!("ns{generated}")
                });
            if lookup(scope, Some(&prefix)) != Some(uri) {
                let mut decl = String::new();
                bind(&mut decl, scope, Some(&prefix), uri);
                head.push_str(decl.trim_start());
                head.push(' ');
            }
            head.push_str(&prefix);
            head.push(':');
        }
        head.push_str(&attr.name.local);
        head.push_str("=\"");
        head.push_str(&escape(attr.value.as_str()));
        head.push('"');
    }

    out.push('<');
    out.push_str(&tag);
    out.push_str(&head);

    if element.children.is_empty() {
        out.push_str("/>");
    } else {
        out.push('>');
        for child in &element.children {
            match child {
                XmlNode::Element(e) => write_element(out, e, scope),
                XmlNode::Text(t) => out.push_str(&escape(t.as_str())),
            }
        }
        out.push_str("</");
        out.push_str(&tag);
        out.push('>');
    }

    scope.truncate(mark);
}
