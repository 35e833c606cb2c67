//! `<hello>` message encoding and decoding.

use std::fmt;

use crate::capability::{Capability, CapabilitySet};
use crate::error::Error;
use crate::xml::{NETCONF_BASE_NS, QName, XmlElement};

/// Transport metadata some clients prepend to their hello as a single
/// line: `[user;host:port;transport;session-identifier;]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditionalHeader {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub transport: String,
    pub session_identifier: String,
}

impl AdditionalHeader {
    pub fn parse(line: &str) -> Result<Self, Error> {
        let bad = || Error::MalformedHello(format!("invalid additional header '{line}'"));

        let inner = line
            .trim()
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(bad)?;
        let mut fields = inner.split(';');
        let user = fields.next().filter(|f| !f.is_empty()).ok_or_else(bad)?;
        let endpoint = fields.next().ok_or_else(bad)?;
        let transport = fields.next().filter(|f| !f.is_empty()).ok_or_else(bad)?;
        let session_identifier = fields.next().ok_or_else(bad)?;
        if fields.next().is_some_and(|rest| !rest.is_empty()) || fields.next().is_some() {
            return Err(bad());
        }

        let (host, port) = endpoint.rsplit_once(':').ok_or_else(bad)?;
        let port = port.parse().map_err(|_| bad())?;
        if host.is_empty() {
            return Err(bad());
        }

        Ok(Self {
            user: user.to_owned(),
            host: host.to_owned(),
            port,
            transport: transport.to_owned(),
            session_identifier: session_identifier.to_owned(),
        })
    }
}

impl fmt::Display for AdditionalHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{};{}:{};{};{};]",
            self.user, self.host, self.port, self.transport, self.session_identifier
        )
    }
}

/// The first message on every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    pub capabilities: CapabilitySet,
    /// Present only in the server's hello.
    pub session_id: Option<u32>,
    pub additional_header: Option<AdditionalHeader>,
}

impl HelloMessage {
    pub fn client(capabilities: CapabilitySet) -> Self {
        Self {
            capabilities,
            session_id: None,
            additional_header: None,
        }
    }

    pub fn server(capabilities: CapabilitySet, session_id: u32) -> Self {
        Self {
            capabilities,
            session_id: Some(session_id),
            additional_header: None,
        }
    }

    pub fn with_additional_header(mut self, header: AdditionalHeader) -> Self {
        self.additional_header = Some(header);
        self
    }

    /// Decode one framed message. Anything other than a well-formed
    /// `<hello>` is rejected.
    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(payload)?;
        let trimmed = text.trim_start();
        let (additional_header, document) = if trimmed.starts_with('[') {
            let end = trimmed
                .find(']')
                .ok_or_else(|| Error::MalformedHello("unterminated additional header".into()))?;
            let (header, rest) = trimmed.split_at(end + 1);
            (Some(AdditionalHeader::parse(header)?), rest)
        } else {
            (None, text)
        };

        let root = XmlElement::parse(document)
            .map_err(|e| Error::MalformedHello(format!("not a valid XML document: {e}")))?;
        let mut hello = Self::from_element(&root)?;
        hello.additional_header = additional_header;
        Ok(hello)
    }

    pub fn from_element(root: &XmlElement) -> Result<Self, Error> {
        if !root.is(NETCONF_BASE_NS, "hello") {
            return Err(Error::MalformedHello(format!(
                "expected <hello>, got <{}>",
                root.name()
            )));
        }

        let caps_el = root
            .netconf_child("capabilities")
            .ok_or_else(|| Error::MalformedHello("missing <capabilities>".into()))?;

        let mut capabilities = CapabilitySet::new();
        for cap in caps_el.child_elements() {
            if !cap.is(NETCONF_BASE_NS, "capability") {
                continue;
            }
            let uri = cap.text();
            let parsed = Capability::parse(&uri).map_err(|e| Error::MalformedHello(e.to_string()))?;
            capabilities.insert(parsed);
        }
        if capabilities.is_empty() {
            return Err(Error::MalformedHello("no capabilities advertised".into()));
        }

        let session_id = root
            .netconf_child("session-id")
            .map(|el| {
                let raw = el.text();
                raw.trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|id| *id > 0)
                    .ok_or_else(|| Error::MalformedHello(format!("invalid session-id '{raw}'")))
            })
            .transpose()?;

        Ok(Self {
            capabilities,
            session_id,
            additional_header: None,
        })
    }

    pub fn to_element(&self) -> XmlElement {
        let caps = XmlElement::netconf("capabilities").with_children(
            self.capabilities
                .iter()
                .map(|c| XmlElement::netconf("capability").with_text(c.to_uri())),
        );
        let mut hello = XmlElement::netconf("hello").with_child(caps);
        if let Some(id) = self.session_id {
            hello.push_child(XmlElement::new(QName::netconf("session-id")).with_text(id.to_string()));
        }
        hello
    }

    /// Wire form, including the additional header line when present.
    pub fn encode(&self) -> String {
        let xml = self.to_element().to_xml();
        match &self.additional_header {
            Some(header) => format!("{header}\n{xml}"),
            None => xml,
        }
    }
}
