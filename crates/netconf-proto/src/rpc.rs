//! RPC requests and replies (RFC 6241 §4 and §7).
//!
//! [`Rpc`] covers the operations the engine issues (and the in-memory
//! server answers). Requests are serialised with a caller-supplied
//! `message-id`; replies are parsed into [`RpcReply`], with every
//! `<rpc-error>` surfaced as a structured [`RpcError`].

use std::fmt;
use std::str::FromStr;

use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

use crate::error::Error;
use crate::xml::{NETCONF_BASE_NS, QName, XmlElement};

// ── Enumerations ─────────────────────────────────────────────────────

/// Configuration datastores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Datastore {
    Running,
    Candidate,
    Startup,
}

impl Datastore {
    fn to_element(self) -> XmlElement {
        XmlElement::netconf(self.as_ref())
    }

    fn from_container(container: &XmlElement) -> Result<Self, RpcError> {
        let el = container.only_child_element().ok_or_else(|| {
            RpcError::new(ErrorType::Protocol, ErrorTag::MissingElement)
                .with_message(format!("<{}> must name exactly one datastore", container.local_name()))
        })?;
        if el.namespace() != Some(NETCONF_BASE_NS) {
            return Err(RpcError::new(ErrorType::Protocol, ErrorTag::BadElement)
                .with_message(format!("unknown datastore {}", el.name())));
        }
        Self::from_str(el.local_name()).map_err(|_| {
            RpcError::new(ErrorType::Protocol, ErrorTag::BadElement)
                .with_message(format!("unknown datastore '{}'", el.local_name()))
        })
    }
}

/// `nc:operation` values of an edit-config payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ModifyAction {
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
}

/// `<default-operation>` of edit-config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DefaultOperation {
    #[default]
    Merge,
    Replace,
    None,
}

/// `<error-option>` of edit-config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorOption {
    #[default]
    StopOnError,
    ContinueOnError,
    RollbackOnError,
}

// ── Requests ─────────────────────────────────────────────────────────

/// A NETCONF operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rpc {
    Lock {
        target: Datastore,
    },
    Unlock {
        target: Datastore,
    },
    DiscardChanges,
    Commit,
    Validate {
        source: Datastore,
    },
    EditConfig {
        target: Datastore,
        default_operation: Option<DefaultOperation>,
        error_option: Option<ErrorOption>,
        /// The `<config>` element.
        config: XmlElement,
    },
    Get {
        /// The `<filter>` element.
        filter: Option<XmlElement>,
    },
    GetConfig {
        source: Datastore,
        filter: Option<XmlElement>,
    },
    CloseSession,
    /// Any other operation, sent as-is.
    Custom(XmlElement),
}

/// Build a `<filter type="subtree">` element around `selection`.
pub fn subtree_filter(selection: impl IntoIterator<Item = XmlElement>) -> XmlElement {
    XmlElement::netconf("filter")
        .with_attribute(QName::unqualified("type"), "subtree")
        .with_children(selection)
}

/// Build a `<config>` element around `data`.
pub fn config_element(data: impl IntoIterator<Item = XmlElement>) -> XmlElement {
    XmlElement::netconf("config").with_children(data)
}

impl Rpc {
    /// Local name of the operation element.
    pub fn operation(&self) -> &str {
        match self {
            Self::Lock { .. } => "lock",
            Self::Unlock { .. } => "unlock",
            Self::DiscardChanges => "discard-changes",
            Self::Commit => "commit",
            Self::Validate { .. } => "validate",
            Self::EditConfig { .. } => "edit-config",
            Self::Get { .. } => "get",
            Self::GetConfig { .. } => "get-config",
            Self::CloseSession => "close-session",
            Self::Custom(el) => el.local_name(),
        }
    }

    /// The operation element, without the `<rpc>` envelope.
    pub fn to_element(&self) -> XmlElement {
        match self {
            Self::Lock { target } => XmlElement::netconf("lock")
                .with_child(XmlElement::netconf("target").with_child(target.to_element())),
            Self::Unlock { target } => XmlElement::netconf("unlock")
                .with_child(XmlElement::netconf("target").with_child(target.to_element())),
            Self::DiscardChanges => XmlElement::netconf("discard-changes"),
            Self::Commit => XmlElement::netconf("commit"),
            Self::Validate { source } => XmlElement::netconf("validate")
                .with_child(XmlElement::netconf("source").with_child(source.to_element())),
            Self::EditConfig {
                target,
                default_operation,
                error_option,
                config,
            } => {
                let mut op = XmlElement::netconf("edit-config")
                    .with_child(XmlElement::netconf("target").with_child(target.to_element()));
                if let Some(default) = default_operation {
                    op.push_child(XmlElement::netconf("default-operation").with_text(default.as_ref()));
                }
                if let Some(option) = error_option {
                    op.push_child(XmlElement::netconf("error-option").with_text(option.as_ref()));
                }
                op.with_child(config.clone())
            }
            Self::Get { filter } => {
                XmlElement::netconf("get").with_children(filter.iter().cloned())
            }
            Self::GetConfig { source, filter } => XmlElement::netconf("get-config")
                .with_child(XmlElement::netconf("source").with_child(source.to_element()))
                .with_children(filter.iter().cloned()),
            Self::CloseSession => XmlElement::netconf("close-session"),
            Self::Custom(el) => el.clone(),
        }
    }

    /// Full `<rpc>` document.
    pub fn to_document(&self, message_id: &str) -> XmlElement {
        XmlElement::netconf("rpc")
            .with_attribute(QName::unqualified("message-id"), message_id)
            .with_child(self.to_element())
    }

    pub fn encode(&self, message_id: &str) -> String {
        self.to_document(message_id).to_xml()
    }

    /// Interpret an operation element received by a server.
    pub fn from_element(op: &XmlElement) -> Result<Self, RpcError> {
        if op.namespace() != Some(NETCONF_BASE_NS) {
            return Ok(Self::Custom(op.clone()));
        }

        let required = |local: &str| {
            op.netconf_child(local).ok_or_else(|| {
                RpcError::new(ErrorType::Protocol, ErrorTag::MissingElement)
                    .with_message(format!("<{}> requires <{local}>", op.local_name()))
                    .with_info(XmlElement::netconf("bad-element").with_text(local))
            })
        };

        Ok(match op.local_name() {
            "lock" => Self::Lock {
                target: Datastore::from_container(required("target")?)?,
            },
            "unlock" => Self::Unlock {
                target: Datastore::from_container(required("target")?)?,
            },
            "discard-changes" => Self::DiscardChanges,
            "commit" => Self::Commit,
            "validate" => Self::Validate {
                source: Datastore::from_container(required("source")?)?,
            },
            "edit-config" => {
                let target = Datastore::from_container(required("target")?)?;
                let default_operation = op
                    .netconf_child("default-operation")
                    .map(parse_enum_text::<DefaultOperation>)
                    .transpose()?;
                let error_option = op
                    .netconf_child("error-option")
                    .map(parse_enum_text::<ErrorOption>)
                    .transpose()?;
                Self::EditConfig {
                    target,
                    default_operation,
                    error_option,
                    config: required("config")?.clone(),
                }
            }
            "get" => Self::Get {
                filter: op.netconf_child("filter").cloned(),
            },
            "get-config" => Self::GetConfig {
                source: Datastore::from_container(required("source")?)?,
                filter: op.netconf_child("filter").cloned(),
            },
            "close-session" => Self::CloseSession,
            _ => Self::Custom(op.clone()),
        })
    }
}

fn parse_enum_text<T: FromStr>(el: &XmlElement) -> Result<T, RpcError> {
    let text = el.text();
    T::from_str(text.trim()).map_err(|_| {
        RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
            .with_message(format!("invalid <{}> value '{}'", el.local_name(), text.trim()))
    })
}

/// A request as received by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    pub message_id: String,
    pub rpc: Rpc,
}

/// A request the server must answer with an error instead of executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRequest {
    /// Absent when the request carried no usable `message-id`.
    pub message_id: Option<String>,
    pub error: RpcError,
}

impl RpcRequest {
    pub fn parse(doc: &XmlElement) -> Result<Self, RejectedRequest> {
        if !doc.is(NETCONF_BASE_NS, "rpc") {
            return Err(RejectedRequest {
                message_id: None,
                error: RpcError::new(ErrorType::Rpc, ErrorTag::MalformedMessage)
                    .with_message(format!("expected <rpc>, got <{}>", doc.name())),
            });
        }

        let Some(message_id) = message_id_of(doc) else {
            return Err(RejectedRequest {
                message_id: None,
                error: RpcError::new(ErrorType::Rpc, ErrorTag::MissingAttribute)
                    .with_info(XmlElement::netconf("bad-attribute").with_text("message-id"))
                    .with_info(XmlElement::netconf("bad-element").with_text("rpc")),
            });
        };

        let op = doc.only_child_element().ok_or_else(|| RejectedRequest {
            message_id: Some(message_id.clone()),
            error: RpcError::new(ErrorType::Rpc, ErrorTag::MalformedMessage)
                .with_message("<rpc> must contain exactly one operation"),
        })?;

        let rpc = Rpc::from_element(op).map_err(|error| RejectedRequest {
            message_id: Some(message_id.clone()),
            error,
        })?;
        Ok(Self { message_id, rpc })
    }
}

fn message_id_of(doc: &XmlElement) -> Option<String> {
    doc.attribute_either("message-id", NETCONF_BASE_NS)
        .map(str::to_owned)
        .filter(|id| !id.is_empty())
}

// ── rpc-error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorSeverity {
    #[default]
    Error,
    Warning,
}

/// `<error-tag>` values from RFC 6241 Appendix A.
#[derive(Debug, Clone, PartialEq, Eq, Hash, IntoStaticStr, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    RollbackFailed,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    PartialOperation,
    MalformedMessage,
    #[strum(default)]
    Other(String),
}

impl ErrorTag {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Other(tag) => tag,
            known => known.into(),
        }
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured `<rpc-error>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub error_type: ErrorType,
    pub tag: ErrorTag,
    pub severity: ErrorSeverity,
    pub app_tag: Option<String>,
    pub path: Option<String>,
    pub message: Option<String>,
    /// Children of `<error-info>`.
    pub info: Vec<XmlElement>,
}

impl RpcError {
    pub fn new(error_type: ErrorType, tag: ErrorTag) -> Self {
        Self {
            error_type,
            tag,
            severity: ErrorSeverity::Error,
            app_tag: None,
            path: None,
            message: None,
            info: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_info(mut self, info: XmlElement) -> Self {
        self.info.push(info);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == ErrorSeverity::Error
    }

    /// `<session-id>` from `<error-info>`, as carried by `lock-denied`.
    pub fn session_id(&self) -> Option<u32> {
        self.info
            .iter()
            .find(|el| el.local_name() == "session-id")
            .and_then(|el| el.text().trim().parse().ok())
    }

    pub fn from_element(el: &XmlElement) -> Result<Self, Error> {
        let text = |local: &str| {
            el.netconf_child(local)
                .map(|c| c.text().trim().to_owned())
                .filter(|t| !t.is_empty())
        };

        let error_type = text("error-type")
            .ok_or_else(|| Error::MalformedReply("<rpc-error> without <error-type>".into()))?;
        let error_type = ErrorType::from_str(&error_type)
            .map_err(|_| Error::MalformedReply(format!("unknown error-type '{error_type}'")))?;
        let tag = text("error-tag")
            .ok_or_else(|| Error::MalformedReply("<rpc-error> without <error-tag>".into()))?;
        let tag = ErrorTag::from_str(&tag).unwrap_or(ErrorTag::Other(tag));
        let severity = text("error-severity")
            .map(|s| {
                ErrorSeverity::from_str(&s)
                    .map_err(|_| Error::MalformedReply(format!("unknown error-severity '{s}'")))
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            error_type,
            tag,
            severity,
            app_tag: text("error-app-tag"),
            path: text("error-path"),
            message: text("error-message"),
            info: el
                .netconf_child("error-info")
                .map(|info| info.child_elements().cloned().collect())
                .unwrap_or_default(),
        })
    }

    pub fn to_element(&self) -> XmlElement {
        let mut el = XmlElement::netconf("rpc-error")
            .with_child(XmlElement::netconf("error-type").with_text(self.error_type.as_ref()))
            .with_child(XmlElement::netconf("error-tag").with_text(self.tag.as_str()))
            .with_child(XmlElement::netconf("error-severity").with_text(self.severity.as_ref()));
        if let Some(app_tag) = &self.app_tag {
            el.push_child(XmlElement::netconf("error-app-tag").with_text(app_tag.clone()));
        }
        if let Some(path) = &self.path {
            el.push_child(XmlElement::netconf("error-path").with_text(path.clone()));
        }
        if let Some(message) = &self.message {
            el.push_child(XmlElement::netconf("error-message").with_text(message.clone()));
        }
        if !self.info.is_empty() {
            el.push_child(XmlElement::netconf("error-info").with_children(self.info.iter().cloned()));
        }
        el
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.error_type, self.tag, self.severity)?;
        if let Some(path) = &self.path {
            write!(f, " at {path}")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

// ── Replies ──────────────────────────────────────────────────────────

/// A parsed `<rpc-reply>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcReply {
    pub message_id: Option<String>,
    /// `<ok/>` was present.
    pub ok: bool,
    /// The `<data>` element, if any.
    pub data: Option<XmlElement>,
    pub errors: Vec<RpcError>,
    /// Any other reply content.
    pub other: Vec<XmlElement>,
}

impl RpcReply {
    pub fn ok(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            ok: true,
            ..Self::default()
        }
    }

    pub fn with_data(message_id: impl Into<String>, data: XmlElement) -> Self {
        Self {
            message_id: Some(message_id.into()),
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn with_errors(message_id: Option<String>, errors: Vec<RpcError>) -> Self {
        Self {
            message_id,
            errors,
            ..Self::default()
        }
    }

    /// No error-severity `<rpc-error>` was reported.
    pub fn is_success(&self) -> bool {
        !self.errors.iter().any(RpcError::is_error)
    }

    /// Split into the reply or its error-severity errors.
    pub fn into_result(self) -> Result<Self, Vec<RpcError>> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.errors.into_iter().filter(RpcError::is_error).collect())
        }
    }

    pub fn parse(doc: &XmlElement) -> Result<Self, Error> {
        if !doc.is(NETCONF_BASE_NS, "rpc-reply") {
            return Err(Error::MalformedReply(format!(
                "expected <rpc-reply>, got <{}>",
                doc.name()
            )));
        }

        let mut reply = Self {
            message_id: message_id_of(doc),
            ..Self::default()
        };
        for child in doc.child_elements() {
            match (child.namespace(), child.local_name()) {
                (Some(NETCONF_BASE_NS), "ok") => reply.ok = true,
                (Some(NETCONF_BASE_NS), "data") => reply.data = Some(child.clone()),
                (Some(NETCONF_BASE_NS), "rpc-error") => reply.errors.push(RpcError::from_element(child)?),
                _ => reply.other.push(child.clone()),
            }
        }
        Ok(reply)
    }

    pub fn to_element(&self) -> XmlElement {
        let mut el = XmlElement::netconf("rpc-reply");
        if let Some(id) = &self.message_id {
            el = el.with_attribute(QName::unqualified("message-id"), id.clone());
        }
        for error in &self.errors {
            el.push_child(error.to_element());
        }
        if let Some(data) = &self.data {
            el.push_child(data.clone());
        }
        for other in &self.other {
            el.push_child(other.clone());
        }
        if self.ok {
            el.push_child(XmlElement::netconf("ok"));
        }
        el
    }

    pub fn encode(&self) -> String {
        self.to_element().to_xml()
    }
}
