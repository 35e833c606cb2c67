//! Subtree filtering (RFC 6241 §6).
//!
//! The filter and the source are walked together. Every (filter node,
//! source node) pair yields a [`MatchResult`]:
//!
//! - the names must agree for anything but [`MatchResult::NoMatch`];
//! - a filter leaf with text is a *content match node*: its text must
//!   equal the source text, either verbatim or as prefixed QNames that
//!   resolve to the same namespace in their respective documents;
//! - otherwise every filter attribute must appear with the same value on
//!   the source node (an *attribute match*).
//!
//! A filter node without child elements selects the whole source
//! subtree. A content mismatch among the children discards the parent.
//! When every filter child is satisfied by content matches alone, the
//! whole parent is selected, so a list-key filter returns complete
//! entries.

use std::borrow::Cow;

use crate::xml::{NETCONF_BASE_NS, NOTIFICATION_NS, NamespaceScope, XmlElement, XmlNode};

/// Outcome of matching one filter node against one source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    NoMatch,
    TagMatch,
    ContentMatch,
    ContentMismatch,
}

impl MatchResult {
    fn selects(self) -> bool {
        matches!(self, Self::TagMatch | Self::ContentMatch)
    }
}

/// Result of filtering a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationFilterResult {
    /// The filter is not a subtree filter; the event content is returned
    /// as-is.
    Unfiltered(XmlElement),
    /// The parts of the event content the filter selected.
    Selected(XmlElement),
    /// The filter applied and selected nothing.
    NothingSelected,
}

/// Whether a `<filter>` element asks for subtree filtering. A missing
/// `type` attribute defaults to subtree.
pub fn is_subtree_filter(filter: &XmlElement) -> bool {
    filter
        .attribute_either("type", NETCONF_BASE_NS)
        .is_none_or(|ty| ty == "subtree")
}

/// Match a single filter node against a source node, resolving prefixed
/// text against the namespace declarations each element carries.
pub fn matches(filter: &XmlElement, source: &XmlElement) -> MatchResult {
    let mut walk = Walk::default();
    walk.filter_scope.push(filter);
    walk.source_scope.push(source);
    walk.match_node(filter, source)
}

/// Filter `source` with `filter` as the root selection node. `None` when
/// nothing is selected.
pub fn filter_subtree(filter: &XmlElement, source: &XmlElement) -> Option<XmlElement> {
    let mut sink = XmlElement::netconf("data");
    Walk::default().add_subtree(filter, source, &mut sink);
    sink.into_children().into_iter().find_map(|node| match node {
        XmlNode::Element(el) => Some(el),
        XmlNode::Text(_) => None,
    })
}

/// Filter the children of a `<data>` element with the selection nodes of
/// a `<filter>` element. The result is an empty copy of `data` holding
/// whatever was selected.
pub fn filter_data(filter: &XmlElement, data: &XmlElement) -> XmlElement {
    let mut walk = Walk::default();
    walk.filter_scope.push(filter);
    walk.source_scope.push(data);
    walk.filter_children(filter, data)
}

/// Apply the subtree filter of a `get`/`get-config` request to its reply.
///
/// The reply is returned unchanged when the request is another operation,
/// carries no `<filter>`, uses a filter type other than subtree, or the
/// reply has no `<data>`.
pub fn apply_rpc_filter<'a>(request: &XmlElement, reply: &'a XmlElement) -> Cow<'a, XmlElement> {
    let Some(op) = request.only_child_element() else {
        return Cow::Borrowed(reply);
    };
    let is_read = op.is(NETCONF_BASE_NS, "get") || op.is(NETCONF_BASE_NS, "get-config");
    if !is_read {
        return Cow::Borrowed(reply);
    }
    let Some(filter) = op.netconf_child("filter") else {
        return Cow::Borrowed(reply);
    };
    if !is_subtree_filter(filter) {
        return Cow::Borrowed(reply);
    }
    let Some(data) = reply.netconf_child("data") else {
        return Cow::Borrowed(reply);
    };

    let mut walk = Walk::default();
    for el in [request, op, filter] {
        walk.filter_scope.push(el);
    }
    for el in [reply, data] {
        walk.source_scope.push(el);
    }

    let mut filtered = reply.shallow_clone();
    filtered.push_child(walk.filter_children(filter, data));
    Cow::Owned(filtered)
}

/// Filter an RFC 5277 `<notification>`. The `eventTime` element is
/// removed before matching.
pub fn apply_notification_filter(
    filter: &XmlElement,
    notification: &XmlElement,
) -> NotificationFilterResult {
    let mut notification = notification.clone();
    notification.remove_child_elements(|el| el.is(NOTIFICATION_NS, "eventTime"));

    let Some(content) = notification.child_elements().next() else {
        return NotificationFilterResult::NothingSelected;
    };
    if !is_subtree_filter(filter) {
        return NotificationFilterResult::Unfiltered(content.clone());
    }

    let mut walk = Walk::default();
    walk.filter_scope.push(filter);
    walk.source_scope.push(&notification);

    let mut sink = notification.shallow_clone();
    for selection in filter.child_elements() {
        walk.add_subtree(selection, content, &mut sink);
    }
    match sink.child_elements().next() {
        Some(selected) => NotificationFilterResult::Selected(selected.clone()),
        None => NotificationFilterResult::NothingSelected,
    }
}

/// In-scope namespace bindings of both documents during a walk.
#[derive(Default)]
struct Walk {
    filter_scope: NamespaceScope,
    source_scope: NamespaceScope,
}

impl Walk {
    /// Match every selection node of `filter` against every child of
    /// `source`, collecting the selected parts under a shallow copy of
    /// `source`.
    fn filter_children(&mut self, filter: &XmlElement, source: &XmlElement) -> XmlElement {
        let mut dst = source.shallow_clone();
        for src_child in source.child_elements() {
            for selection in filter.child_elements() {
                self.add_subtree(selection, src_child, &mut dst);
            }
        }
        dst
    }

    fn add_subtree(
        &mut self,
        filter: &XmlElement,
        source: &XmlElement,
        dst: &mut XmlElement,
    ) -> MatchResult {
        self.filter_scope.push(filter);
        self.source_scope.push(source);
        let result = self.add_matched(filter, source, dst);
        self.filter_scope.pop();
        self.source_scope.pop();
        result
    }

    fn add_matched(
        &mut self,
        filter: &XmlElement,
        source: &XmlElement,
        dst: &mut XmlElement,
    ) -> MatchResult {
        let matched = self.match_node(filter, source);
        if !matched.selects() {
            return matched;
        }

        let selections: Vec<&XmlElement> = filter.child_elements().collect();
        if selections.is_empty() {
            dst.push_child(source.clone());
            return matched;
        }

        let mut copied = source.shallow_clone();
        let mut append = false;
        let mut content_matches = 0usize;
        for src_child in source.child_elements() {
            for selection in &selections {
                let child = self.add_subtree(selection, src_child, &mut copied);
                match child {
                    MatchResult::ContentMismatch => return MatchResult::NoMatch,
                    MatchResult::ContentMatch => content_matches += 1,
                    MatchResult::NoMatch | MatchResult::TagMatch => {}
                }
                append |= child != MatchResult::NoMatch;
            }
        }

        if content_matches == selections.len() {
            copied = source.clone();
            append = true;
        }
        if append {
            dst.push_child(copied);
        }
        matched
    }

    /// Both scopes must already include `filter` and `source`.
    fn match_node(&self, filter: &XmlElement, source: &XmlElement) -> MatchResult {
        if filter.name() != source.name() {
            return MatchResult::NoMatch;
        }

        if let Some(expected) = filter.only_text() {
            let actual = source.only_text();
            if actual.as_deref() == Some(expected.as_str())
                || actual.is_some_and(|actual| self.prefixed_content_matches(&expected, &actual))
            {
                return MatchResult::ContentMatch;
            }
            return MatchResult::ContentMismatch;
        }

        let attributes_match = filter
            .attributes()
            .iter()
            .all(|attr| source.attribute(&attr.name) == Some(attr.value.as_str()));
        if attributes_match {
            MatchResult::TagMatch
        } else {
            MatchResult::NoMatch
        }
    }

    /// Compare `prefix:local` text as QNames. The filter text must be
    /// prefixed; unprefixed source text resolves against the default
    /// namespace.
    fn prefixed_content_matches(&self, expected: &str, actual: &str) -> bool {
        let Some((filter_prefix, filter_local)) = expected.split_once(':') else {
            return false;
        };
        let Some(filter_ns) = self.filter_scope.resolve(Some(filter_prefix)) else {
            return false;
        };

        let (source_prefix, source_local) = match actual.split_once(':') {
            Some((prefix, local)) => (Some(prefix), local),
            None => (None, actual),
        };
        let Some(source_ns) = self.source_scope.resolve(source_prefix) else {
            return false;
        };

        filter_ns == source_ns && filter_local == source_local
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn xml(s: &str) -> XmlElement {
        XmlElement::parse(s).unwrap()
    }

    #[test]
    fn leaf_selection_copies_only_that_child() {
        let filter = xml("<top><a/></top>");
        let source = xml("<top><a>1</a><b>2</b></top>");
        assert_eq!(filter_subtree(&filter, &source), Some(xml("<top><a>1</a></top>")));
    }

    #[test]
    fn empty_filter_node_selects_whole_subtree() {
        let source = xml(r#"<top xmlns="urn:x"><a k="v">1</a><b><c>2</c></b></top>"#);
        let filter = xml(r#"<top xmlns="urn:x"/>"#);
        assert_eq!(filter_subtree(&filter, &source), Some(source.clone()));

        let other = xml(r#"<bottom xmlns="urn:x"/>"#);
        assert_eq!(filter_subtree(&other, &source), None);
        let other_ns = xml(r#"<top xmlns="urn:y"/>"#);
        assert_eq!(filter_subtree(&other_ns, &source), None);
    }

    #[test]
    fn content_match_selects_entire_entry() {
        let source = xml(
            "<users>\
               <user><name>root</name><type>superuser</type></user>\
               <user><name>fred</name><type>admin</type></user>\
             </users>",
        );
        let filter = xml("<users><user><name>fred</name></user></users>");
        assert_eq!(
            filter_subtree(&filter, &source),
            Some(xml("<users><user><name>fred</name><type>admin</type></user></users>"))
        );
    }

    #[test]
    fn content_match_with_extra_selection() {
        let source = xml(
            "<users><user><name>fred</name><type>admin</type><full-name>Fred</full-name></user></users>",
        );
        let filter = xml("<users><user><name>fred</name><type/></user></users>");
        assert_eq!(
            filter_subtree(&filter, &source),
            Some(xml("<users><user><name>fred</name><type>admin</type></user></users>"))
        );
    }

    #[test]
    fn content_mismatch_drops_the_parent() {
        let source = xml("<users><user><name>root</name></user></users>");
        let filter = xml("<users><user><name>fred</name></user></users>");
        assert_eq!(filter_subtree(&filter, &source), None);
    }

    #[test]
    fn attribute_match() {
        let source = xml(
            r#"<interfaces><interface ifName="eth0"><mtu>1500</mtu></interface><interface ifName="eth1"><mtu>9000</mtu></interface></interfaces>"#,
        );
        let filter = xml(r#"<interfaces><interface ifName="eth1"/></interfaces>"#);
        assert_eq!(
            filter_subtree(&filter, &source),
            Some(xml(
                r#"<interfaces><interface ifName="eth1"><mtu>9000</mtu></interface></interfaces>"#
            ))
        );
    }

    #[test]
    fn prefixed_content_compares_namespaces() {
        let source = xml(
            r#"<interface xmlns="urn:if" xmlns:ianaift="urn:iana-if-type"><type>ianaift:ethernetCsmacd</type></interface>"#,
        );
        let same = xml(
            r#"<interface xmlns="urn:if" xmlns:t="urn:iana-if-type"><type>t:ethernetCsmacd</type></interface>"#,
        );
        let other = xml(
            r#"<interface xmlns="urn:if" xmlns:t="urn:other"><type>t:ethernetCsmacd</type></interface>"#,
        );
        assert_eq!(filter_subtree(&same, &source), Some(source.clone()));
        assert_eq!(filter_subtree(&other, &source), None);

        let filter_leaf = same.only_child_element().unwrap();
        let source_leaf = source.only_child_element().unwrap();
        assert_eq!(matches(filter_leaf, source_leaf), MatchResult::ContentMismatch);
    }

    const REPLY: &str = r#"<rpc-reply message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
      <data>
        <top xmlns="urn:x"><a>1</a><b>2</b></top>
        <other xmlns="urn:x"><c>3</c></other>
      </data>
    </rpc-reply>"#;

    #[test]
    fn rpc_filter_applies_to_get_config() {
        let request = xml(
            r#"<rpc message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
                 <get-config><source><running/></source>
                   <filter type="subtree"><top xmlns="urn:x"><b/></top></filter>
                 </get-config></rpc>"#,
        );
        let reply = xml(REPLY);
        let filtered = apply_rpc_filter(&request, &reply);
        assert!(matches!(filtered, Cow::Owned(_)));
        assert_eq!(
            filtered.into_owned(),
            xml(
                r#"<rpc-reply message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><data><top xmlns="urn:x"><b>2</b></top></data></rpc-reply>"#
            )
        );
    }

    #[test]
    fn empty_filter_selects_nothing() {
        let request = xml(
            r#"<rpc message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><get><filter type="subtree"/></get></rpc>"#,
        );
        let reply = xml(REPLY);
        let filtered = apply_rpc_filter(&request, &reply);
        let data = filtered.netconf_child("data").unwrap();
        assert!(!data.has_child_elements());
    }

    #[test]
    fn rpc_filter_leaves_other_replies_alone() {
        let reply = xml(REPLY);
        for request in [
            r#"<rpc message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><get/></rpc>"#,
            r#"<rpc message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><get><filter type="xpath" select="/top"/></get></rpc>"#,
            r#"<rpc message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><lock><target><running/></target></lock></rpc>"#,
        ] {
            let filtered = apply_rpc_filter(&xml(request), &reply);
            assert!(matches!(filtered, Cow::Borrowed(_)), "{request}");
        }
    }

    #[test]
    fn missing_filter_type_means_subtree() {
        assert!(is_subtree_filter(&xml(
            r#"<filter xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"/>"#
        )));
        assert!(!is_subtree_filter(&xml(
            r#"<filter xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" type="xpath"/>"#
        )));
    }

    const NOTIFICATION: &str = r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0">
      <eventTime>2024-05-01T10:00:00Z</eventTime>
      <link-down xmlns="urn:x"><if-name>eth0</if-name><reason>carrier</reason></link-down>
    </notification>"#;

    #[test]
    fn notification_filter_selects_event_content() {
        let filter = xml(
            r#"<filter type="subtree"><link-down xmlns="urn:x"><if-name/></link-down></filter>"#,
        );
        assert_eq!(
            apply_notification_filter(&filter, &xml(NOTIFICATION)),
            NotificationFilterResult::Selected(xml(
                r#"<link-down xmlns="urn:x"><if-name>eth0</if-name></link-down>"#
            ))
        );
    }

    #[test]
    fn notification_filter_reports_nothing_selected() {
        let filter = xml(r#"<filter type="subtree"><link-up xmlns="urn:x"/></filter>"#);
        assert_eq!(
            apply_notification_filter(&filter, &xml(NOTIFICATION)),
            NotificationFilterResult::NothingSelected
        );

        let xpath = xml(r#"<filter type="xpath" select="/x:link-down"/>"#);
        assert!(matches!(
            apply_notification_filter(&xpath, &xml(NOTIFICATION)),
            NotificationFilterResult::Unfiltered(content) if content.local_name() == "link-down"
        ));
    }
}
