//! Capability model.
//!
//! A capability is a URI advertised in `<hello>`. Three families carry
//! structure the engine cares about:
//!
//! - **Protocol** capabilities from RFC 6241 and friends, a fixed set of
//!   well-known URNs (`urn:ietf:params:netconf:base:1.1`, `:candidate`, …).
//! - **YANG module** capabilities:
//!   `<namespace>?module=<name>&revision=<rev>[&features=a,b][&deviations=c,d]`.
//! - **EXI** (`urn:ietf:params:netconf:capability:exi:1.0`) with optional
//!   `compression=` / `schemas=` parameters.
//!
//! Anything else is kept verbatim as [`Capability::Other`]. A URI is only
//! given structure when serialising that structure reproduces it byte for
//! byte, so every advertised URI survives a parse/serialise round trip.
//! Structured values can only be built from parts that serialise
//! unambiguously.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;

use crate::framing::FramingMode;

// ── Protocol capabilities ────────────────────────────────────────────

/// Well-known protocol capability URNs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, AsRefStr, EnumString, EnumIter,
)]
pub enum ProtocolCapability {
    #[strum(serialize = "urn:ietf:params:netconf:base:1.0")]
    Base10,
    #[strum(serialize = "urn:ietf:params:netconf:base:1.1")]
    Base11,
    #[strum(serialize = "urn:ietf:params:netconf:capability:writable-running:1.0")]
    WritableRunning,
    #[strum(serialize = "urn:ietf:params:netconf:capability:candidate:1.0")]
    Candidate,
    #[strum(serialize = "urn:ietf:params:netconf:capability:confirmed-commit:1.0")]
    ConfirmedCommit10,
    #[strum(serialize = "urn:ietf:params:netconf:capability:confirmed-commit:1.1")]
    ConfirmedCommit11,
    #[strum(serialize = "urn:ietf:params:netconf:capability:rollback-on-error:1.0")]
    RollbackOnError,
    #[strum(serialize = "urn:ietf:params:netconf:capability:validate:1.0")]
    Validate10,
    #[strum(serialize = "urn:ietf:params:netconf:capability:validate:1.1")]
    Validate11,
    #[strum(serialize = "urn:ietf:params:netconf:capability:startup:1.0")]
    Startup,
    #[strum(serialize = "urn:ietf:params:netconf:capability:url:1.0")]
    Url,
    #[strum(serialize = "urn:ietf:params:netconf:capability:xpath:1.0")]
    Xpath,
    #[strum(serialize = "urn:ietf:params:netconf:capability:notification:1.0")]
    Notification,
    #[strum(serialize = "urn:ietf:params:netconf:capability:interleave:1.0")]
    Interleave,
    #[strum(serialize = "urn:ietf:params:netconf:capability:partial-lock:1.0")]
    PartialLock,
    #[strum(serialize = "urn:ietf:params:netconf:capability:with-defaults:1.0")]
    WithDefaults,
    #[strum(serialize = "urn:ietf:params:netconf:capability:yang-library:1.0")]
    YangLibrary,
}

impl ProtocolCapability {
    pub fn urn(self) -> &'static str {
        match self {
            Self::Base10 => "urn:ietf:params:netconf:base:1.0",
            Self::Base11 => "urn:ietf:params:netconf:base:1.1",
            Self::WritableRunning => "urn:ietf:params:netconf:capability:writable-running:1.0",
            Self::Candidate => "urn:ietf:params:netconf:capability:candidate:1.0",
            Self::ConfirmedCommit10 => "urn:ietf:params:netconf:capability:confirmed-commit:1.0",
            Self::ConfirmedCommit11 => "urn:ietf:params:netconf:capability:confirmed-commit:1.1",
            Self::RollbackOnError => "urn:ietf:params:netconf:capability:rollback-on-error:1.0",
            Self::Validate10 => "urn:ietf:params:netconf:capability:validate:1.0",
            Self::Validate11 => "urn:ietf:params:netconf:capability:validate:1.1",
            Self::Startup => "urn:ietf:params:netconf:capability:startup:1.0",
            Self::Url => "urn:ietf:params:netconf:capability:url:1.0",
            Self::Xpath => "urn:ietf:params:netconf:capability:xpath:1.0",
            Self::Notification => "urn:ietf:params:netconf:capability:notification:1.0",
            Self::Interleave => "urn:ietf:params:netconf:capability:interleave:1.0",
            Self::PartialLock => "urn:ietf:params:netconf:capability:partial-lock:1.0",
            Self::WithDefaults => "urn:ietf:params:netconf:capability:with-defaults:1.0",
            Self::YangLibrary => "urn:ietf:params:netconf:capability:yang-library:1.0",
        }
    }

    pub fn is_base(self) -> bool {
        matches!(self, Self::Base10 | Self::Base11)
    }
}

// ── EXI ──────────────────────────────────────────────────────────────

pub const EXI_CAPABILITY_URN: &str = "urn:ietf:params:netconf:capability:exi:1.0";

/// Schema options a peer offers for EXI encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, AsRefStr, EnumString)]
pub enum ExiSchemaMode {
    #[strum(serialize = "builtin")]
    Builtin,
    #[strum(serialize = "base:1.1")]
    Base11,
    #[strum(serialize = "dynamic")]
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ExiCapability {
    pub compression: Option<u32>,
    pub schemas: Option<ExiSchemaMode>,
}

// ── YANG module ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YangModuleCapability {
    namespace: String,
    module: String,
    revision: Option<String>,
    features: Vec<String>,
    deviations: Vec<String>,
}

impl YangModuleCapability {
    pub fn new(
        namespace: impl Into<String>,
        module: impl Into<String>,
    ) -> Result<Self, InvalidCapability> {
        let namespace = namespace.into();
        if namespace.is_empty() || namespace.contains('?') || has_whitespace(&namespace) {
            return Err(invalid(namespace, "module namespace must be a URI without a query"));
        }
        if namespace == EXI_CAPABILITY_URN {
            return Err(invalid(namespace, "the EXI URN cannot name a module"));
        }
        Ok(Self {
            namespace,
            module: token(module.into(), "module name must be a token without & = , ?")?,
            revision: None,
            features: Vec::new(),
            deviations: Vec::new(),
        })
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Result<Self, InvalidCapability> {
        self.revision = Some(token(revision.into(), "revision must be a token without & = , ?")?);
        Ok(self)
    }

    pub fn with_features(
        mut self,
        features: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, InvalidCapability> {
        self.features = tokens(features, "features must be tokens without & = , ?")?;
        Ok(self)
    }

    pub fn with_deviations(
        mut self,
        deviations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, InvalidCapability> {
        self.deviations = tokens(deviations, "deviations must be tokens without & = , ?")?;
        Ok(self)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn deviations(&self) -> &[String] {
        &self.deviations
    }
}

/// Characters that would change how a query parameter value splits.
const QUERY_DELIMITERS: [char; 4] = ['&', '=', ',', '?'];

fn has_whitespace(value: &str) -> bool {
    value.chars().any(char::is_whitespace)
}

fn invalid(uri: String, reason: &'static str) -> InvalidCapability {
    InvalidCapability { uri, reason }
}

fn token(value: String, reason: &'static str) -> Result<String, InvalidCapability> {
    if value.is_empty() || has_whitespace(&value) || value.contains(QUERY_DELIMITERS) {
        return Err(invalid(value, reason));
    }
    Ok(value)
}

fn tokens(
    values: impl IntoIterator<Item = impl Into<String>>,
    reason: &'static str,
) -> Result<Vec<String>, InvalidCapability> {
    values.into_iter().map(|v| token(v.into(), reason)).collect()
}

/// A capability URI with no structured form, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OtherCapability(String);

impl OtherCapability {
    /// Accepts only URIs that [`Capability::parse`] keeps verbatim.
    pub fn new(uri: impl Into<String>) -> Result<Self, InvalidCapability> {
        let uri = uri.into();
        if uri.trim() != uri {
            return Err(invalid(uri, "URI has surrounding whitespace"));
        }
        match Capability::parse(&uri)? {
            Capability::Other(other) => Ok(other),
            _ => Err(invalid(uri, "URI has a structured capability form")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ── Capability ───────────────────────────────────────────────────────

/// A single advertised capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Protocol(ProtocolCapability),
    YangModule(YangModuleCapability),
    Exi(ExiCapability),
    /// Any URI not covered above, kept verbatim.
    Other(OtherCapability),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid capability URI '{uri}': {reason}")]
pub struct InvalidCapability {
    pub uri: String,
    pub reason: &'static str,
}

impl Capability {
    /// Parse a capability URI. Surrounding whitespace is ignored.
    pub fn parse(uri: &str) -> Result<Self, InvalidCapability> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(InvalidCapability {
                uri: uri.to_owned(),
                reason: "empty URI",
            });
        }
        if uri.chars().any(char::is_whitespace) {
            return Err(InvalidCapability {
                uri: uri.to_owned(),
                reason: "URI contains whitespace",
            });
        }

        let (base, query) = match uri.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (uri, None),
        };

        let structured = if base == EXI_CAPABILITY_URN {
            parse_exi(query).map(Self::Exi)
        } else if let Some(query) = query {
            parse_module(base, query).map(Self::YangModule)
        } else {
            ProtocolCapability::from_str(base).ok().map(Self::Protocol)
        };

        // Reordered or repeated parameters cannot be reproduced.
        Ok(match structured {
            Some(cap) if cap.to_uri() == uri => cap,
            _ => Self::Other(OtherCapability(uri.to_owned())),
        })
    }

    /// Serialise back to the advertised URI form.
    pub fn to_uri(&self) -> String {
        match self {
            Self::Protocol(p) => p.urn().to_owned(),
            Self::YangModule(m) => {
                let mut uri = format!("{}?module={}", m.namespace, m.module);
                if let Some(rev) = &m.revision {
                    uri.push_str("&revision=");
                    uri.push_str(rev);
                }
                if !m.features.is_empty() {
                    uri.push_str("&features=");
                    uri.push_str(&m.features.join(","));
                }
                if !m.deviations.is_empty() {
                    uri.push_str("&deviations=");
                    uri.push_str(&m.deviations.join(","));
                }
                uri
            }
            Self::Exi(exi) => {
                let mut params = Vec::new();
                if let Some(level) = exi.compression {
                    params.push(format!("compression={level}"));
                }
                if let Some(mode) = exi.schemas {
                    params.push(format!("schemas={}", mode.as_ref()));
                }
                if params.is_empty() {
                    EXI_CAPABILITY_URN.to_owned()
                } else {
                    format!("{EXI_CAPABILITY_URN}?{}", params.join("&"))
                }
            }
            Self::Other(other) => other.0.clone(),
        }
    }

    pub fn as_protocol(&self) -> Option<ProtocolCapability> {
        match self {
            Self::Protocol(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_module(&self) -> Option<&YangModuleCapability> {
        match self {
            Self::YangModule(m) => Some(m),
            _ => None,
        }
    }
}

impl From<ProtocolCapability> for Capability {
    fn from(p: ProtocolCapability) -> Self {
        Self::Protocol(p)
    }
}

impl From<YangModuleCapability> for Capability {
    fn from(m: YangModuleCapability) -> Self {
        Self::YangModule(m)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl FromStr for Capability {
    type Err = InvalidCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn query_params(query: &str) -> impl Iterator<Item = (&str, &str)> {
    query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| p.split_once('=').unwrap_or((p, "")))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_module(namespace: &str, query: &str) -> Option<YangModuleCapability> {
    let mut module = None;
    let mut revision = None;
    let mut features = Vec::new();
    let mut deviations = Vec::new();

    for (key, value) in query_params(query) {
        match key {
            "module" => module = Some(value),
            "revision" => revision = Some(value),
            "features" => features = split_list(value),
            "deviations" => deviations = split_list(value),
            // Unknown parameters cannot be reproduced faithfully.
            _ => return None,
        }
    }

    let mut cap = YangModuleCapability::new(namespace, module?).ok()?;
    if let Some(revision) = revision {
        cap = cap.with_revision(revision).ok()?;
    }
    cap.with_features(features).ok()?.with_deviations(deviations).ok()
}

fn parse_exi(query: Option<&str>) -> Option<ExiCapability> {
    let mut exi = ExiCapability::default();
    for (key, value) in query_params(query.unwrap_or("")) {
        match key {
            "compression" => exi.compression = Some(value.parse().ok()?),
            "schemas" => exi.schemas = Some(ExiSchemaMode::from_str(value).ok()?),
            _ => return None,
        }
    }
    Some(exi)
}

// ── CapabilitySet ────────────────────────────────────────────────────

/// An ordered, deduplicated set of capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The protocol capabilities this engine implements as a client.
    pub fn client_defaults() -> Self {
        [ProtocolCapability::Base10, ProtocolCapability::Base11]
            .into_iter()
            .map(Capability::Protocol)
            .collect()
    }

    pub fn insert(&mut self, capability: impl Into<Capability>) -> bool {
        self.0.insert(capability.into())
    }

    pub fn contains(&self, capability: &Capability) -> bool {
        self.0.contains(capability)
    }

    pub fn supports(&self, protocol: ProtocolCapability) -> bool {
        self.0.contains(&Capability::Protocol(protocol))
    }

    pub fn has_base_version(&self) -> bool {
        ProtocolCapability::iter()
            .filter(|p| p.is_base())
            .any(|p| self.supports(p))
    }

    pub fn modules(&self) -> impl Iterator<Item = &YangModuleCapability> {
        self.0.iter().filter_map(Capability::as_module)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Union of two sets, as recorded on an established session.
    pub fn union(&self, other: &Self) -> Self {
        self.0.union(&other.0).cloned().collect()
    }

    /// Pick the framing both peers can speak.
    ///
    /// Chunked framing when both sides advertise `base:1.1`, end-of-message
    /// framing when both advertise `base:1.0`. `None` when the two sets
    /// share no base version.
    pub fn negotiate_framing(&self, peer: &Self) -> Option<FramingMode> {
        let common = |base| self.supports(base) && peer.supports(base);
        if common(ProtocolCapability::Base11) {
            Some(FramingMode::Chunked)
        } else if common(ProtocolCapability::Base10) {
            Some(FramingMode::EndOfMessage)
        } else {
            None
        }
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Capability> for CapabilitySet {
    fn extend<I: IntoIterator<Item = Capability>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl<'a> IntoIterator for &'a CapabilitySet {
    type Item = &'a Capability;
    type IntoIter = std::collections::btree_set::Iter<'a, Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
