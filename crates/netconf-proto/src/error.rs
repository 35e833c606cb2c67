use thiserror::Error;

/// Top-level error type for the `netconf-proto` crate.
///
/// Covers every failure the wire layer can detect on its own: XML
/// syntax, framing violations, and documents that parse but are not
/// the NETCONF message they claim to be. `netconf-core` maps these into
/// session-level errors that carry the device identity.
#[derive(Debug, Error)]
pub enum Error {
    // ── XML ─────────────────────────────────────────────────────────
    /// The payload is not well-formed XML.
    #[error("Malformed XML: {0}")]
    Xml(String),

    /// The payload contains no root element.
    #[error("XML document has no root element")]
    EmptyDocument,

    /// A namespace prefix is used without a binding in scope.
    #[error("Unbound namespace prefix '{0}'")]
    UnboundPrefix(String),

    // ── Framing ─────────────────────────────────────────────────────
    /// A chunk header did not follow the `\n#<size>\n` grammar.
    #[error("Invalid chunk header: {reason}")]
    InvalidChunkHeader { reason: String },

    /// A chunk declared a size outside `1..=4294967295`.
    #[error("Chunk size {size} out of range")]
    ChunkSizeOutOfRange { size: u64 },

    /// A single message exceeded the configured limit.
    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    /// The peer closed the channel in the middle of a frame.
    #[error("Channel closed with {pending} bytes of an incomplete frame buffered")]
    TruncatedFrame { pending: usize },

    // ── Message semantics ───────────────────────────────────────────
    /// The first message on a session was not a usable `<hello>`.
    #[error("Malformed hello message: {0}")]
    MalformedHello(String),

    /// A document did not have the structure of an `<rpc-reply>`.
    #[error("Malformed rpc-reply: {0}")]
    MalformedReply(String),

    /// A notification did not carry a parseable `eventTime`.
    #[error("Malformed notification: {0}")]
    MalformedNotification(String),

    // ── I/O ─────────────────────────────────────────────────────────
    /// Underlying channel failure surfaced through the frame codec.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if this error came from the byte channel rather
    /// than from the content of a message.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_) | Self::TruncatedFrame { .. })
    }

    /// Returns `true` for framing violations, after which the byte
    /// stream cannot be resynchronised.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::InvalidChunkHeader { .. }
                | Self::ChunkSizeOutOfRange { .. }
                | Self::MessageTooLarge { .. }
        )
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::Xml(format!("invalid UTF-8: {err}"))
    }
}
