//! RFC 6242 message framing as a `tokio_util` codec.
//!
//! A session starts in end-of-message mode (`]]>]]>` delimiter) because
//! the hello exchange always uses it. Once both peers have advertised
//! `base:1.1` the negotiator calls [`NetconfCodec::enable_chunked`] and
//! every subsequent message in both directions uses chunked framing:
//!
//! ```text
//! \n#<chunk-size>\n<chunk-data>  (one or more)
//! \n##\n
//! ```
//!
//! The switch takes effect for the next decoded frame, so bytes already
//! buffered after the peer's hello are read with the new framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::Error;

/// NETCONF 1.0 end-of-message delimiter.
pub const EOM_DELIMITER: &[u8] = b"]]>]]>";

/// Chunked-framing terminator.
const END_OF_CHUNKS: &[u8] = b"\n##\n";

/// Largest chunk size the grammar allows.
pub const MAX_CHUNK_SIZE: u64 = 4_294_967_295;

/// `4294967295` has ten digits.
const MAX_CHUNK_DIGITS: usize = 10;

pub const DEFAULT_CHUNK_SIZE: usize = 8192;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Framing selected for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramingMode {
    /// NETCONF 1.0 `]]>]]>` delimiter.
    EndOfMessage,
    /// NETCONF 1.1 chunked framing.
    Chunked,
}

impl std::fmt::Display for FramingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::EndOfMessage => "end-of-message",
            Self::Chunked => "chunked",
        })
    }
}

/// Size limits applied by [`NetconfCodec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramingLimits {
    /// Largest reassembled message accepted from the peer.
    pub max_message_size: usize,
    /// Size at which outgoing chunked messages are split.
    pub chunk_size: usize,
}

impl Default for FramingLimits {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Header,
    Data { remaining: usize },
}

/// Frame codec for a NETCONF channel.
#[derive(Debug)]
pub struct NetconfCodec {
    mode: FramingMode,
    limits: FramingLimits,
    /// Offset up to which the buffer has been searched for `]]>]]>`.
    eom_scanned: usize,
    chunk_state: ChunkState,
    /// Chunk payloads of the message being reassembled.
    message: BytesMut,
}

impl Default for NetconfCodec {
    fn default() -> Self {
        Self::new(FramingLimits::default())
    }
}

impl NetconfCodec {
    pub fn new(limits: FramingLimits) -> Self {
        Self {
            mode: FramingMode::EndOfMessage,
            limits: FramingLimits {
                chunk_size: limits.chunk_size.max(1),
                ..limits
            },
            eom_scanned: 0,
            chunk_state: ChunkState::Header,
            message: BytesMut::new(),
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    pub fn limits(&self) -> FramingLimits {
        self.limits
    }

    /// Switch both directions to chunked framing.
    pub fn enable_chunked(&mut self) {
        trace!("switching to chunked framing");
        self.mode = FramingMode::Chunked;
        self.eom_scanned = 0;
        self.chunk_state = ChunkState::Header;
        self.message.clear();
    }

    fn decode_eom(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Error> {
        let start = self
            .eom_scanned
            .min(src.len())
            .saturating_sub(EOM_DELIMITER.len() - 1);
        let found = src[start..]
            .windows(EOM_DELIMITER.len())
            .position(|w| w == EOM_DELIMITER)
            .map(|pos| start + pos);

        let Some(end) = found else {
            if src.len() > self.limits.max_message_size + EOM_DELIMITER.len() {
                return Err(Error::MessageTooLarge {
                    size: src.len(),
                    limit: self.limits.max_message_size,
                });
            }
            self.eom_scanned = src.len();
            return Ok(None);
        };

        if end > self.limits.max_message_size {
            return Err(Error::MessageTooLarge {
                size: end,
                limit: self.limits.max_message_size,
            });
        }

        let message = src.split_to(end).freeze();
        src.advance(EOM_DELIMITER.len());
        self.eom_scanned = 0;
        trace!(bytes = message.len(), "decoded end-of-message frame");
        Ok(Some(message))
    }

    fn decode_chunked(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Error> {
        loop {
            match self.chunk_state {
                ChunkState::Header => {
                    // Shortest header is "\n#1\n" or the "\n##\n" terminator.
                    if src.len() < 3 {
                        return Ok(None);
                    }
                    if &src[..2] != b"\n#" {
                        return Err(Error::InvalidChunkHeader {
                            reason: "expected '\\n#'".into(),
                        });
                    }

                    if src[2] == b'#' {
                        if src.len() < END_OF_CHUNKS.len() {
                            return Ok(None);
                        }
                        if src[3] != b'\n' {
                            return Err(Error::InvalidChunkHeader {
                                reason: "malformed end-of-chunks marker".into(),
                            });
                        }
                        if self.message.is_empty() {
                            return Err(Error::InvalidChunkHeader {
                                reason: "end-of-chunks before any chunk".into(),
                            });
                        }
                        src.advance(END_OF_CHUNKS.len());
                        let message = self.message.split().freeze();
                        trace!(bytes = message.len(), "decoded chunked frame");
                        return Ok(Some(message));
                    }

                    let Some(len) = src[2..].iter().position(|b| *b == b'\n') else {
                        if src.len() - 2 > MAX_CHUNK_DIGITS {
                            return Err(Error::InvalidChunkHeader {
                                reason: "chunk size has too many digits".into(),
                            });
                        }
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&src[2..2 + len])?;
                    let total = self.message.len().saturating_add(size);
                    if total > self.limits.max_message_size {
                        return Err(Error::MessageTooLarge {
                            size: total,
                            limit: self.limits.max_message_size,
                        });
                    }
                    src.advance(3 + len);
                    self.chunk_state = ChunkState::Data { remaining: size };
                }
                ChunkState::Data { remaining } => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let take = remaining.min(src.len());
                    self.message.extend_from_slice(&src.split_to(take));
                    let remaining = remaining - take;
                    if remaining > 0 {
                        self.chunk_state = ChunkState::Data { remaining };
                        return Ok(None);
                    }
                    self.chunk_state = ChunkState::Header;
                }
            }
        }
    }

    fn pending(&self, src: &BytesMut) -> usize {
        src.len() + self.message.len()
    }
}

fn parse_chunk_size(digits: &[u8]) -> Result<usize, Error> {
    if digits.is_empty() || digits.len() > MAX_CHUNK_DIGITS {
        return Err(Error::InvalidChunkHeader {
            reason: format!("chunk size must have 1 to {MAX_CHUNK_DIGITS} digits"),
        });
    }
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(Error::InvalidChunkHeader {
            reason: "chunk size is not a decimal number".into(),
        });
    }

    let size = digits
        .iter()
        .fold(0u64, |acc, d| acc * 10 + u64::from(d - b'0'));
    if size == 0 || size > MAX_CHUNK_SIZE {
        return Err(Error::ChunkSizeOutOfRange { size });
    }
    if digits[0] == b'0' {
        return Err(Error::InvalidChunkHeader {
            reason: "chunk size has a leading zero".into(),
        });
    }
    usize::try_from(size).map_err(|_| Error::ChunkSizeOutOfRange { size })
}

impl Decoder for NetconfCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.mode {
            FramingMode::EndOfMessage => self.decode_eom(src),
            FramingMode::Chunked => self.decode_chunked(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // Whitespace between messages is not a frame.
        if self.message.is_empty() && src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }
        Err(Error::TruncatedFrame {
            pending: self.pending(src),
        })
    }
}

impl Encoder<Bytes> for NetconfCodec {
    type Error = Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self.mode {
            FramingMode::EndOfMessage => {
                dst.reserve(item.len() + EOM_DELIMITER.len());
                dst.put_slice(&item);
                dst.put_slice(EOM_DELIMITER);
            }
            FramingMode::Chunked => {
                if item.is_empty() {
                    return Err(Error::EmptyDocument);
                }
                for chunk in item.chunks(self.limits.chunk_size) {
                    dst.put_slice(format!("\n#{}\n", chunk.len()).as_bytes());
                    dst.put_slice(chunk);
                }
                dst.put_slice(END_OF_CHUNKS);
            }
        }
        trace!(bytes = item.len(), mode = %self.mode, "encoded frame");
        Ok(())
    }
}

impl Encoder<String> for NetconfCodec {
    type Error = Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<Bytes>::encode(self, Bytes::from(item), dst)
    }
}
