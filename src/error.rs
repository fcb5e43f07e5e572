//! Error types
//!
//! Every subsystem has its own error enum; `Error` is the crate-wide sum
//! that all public `Result`s carry. Peer-triggered failures (malformed
//! chunk headers, bad AMF, wrong transaction ids) are fatal to the
//! connection that produced them and nothing else.

use std::fmt;
use std::io;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error on a socket or file
    Io(io::Error),
    /// AMF encoding/decoding error
    Amf(AmfError),
    /// Media (FLV/AAC/H.264/MP3) parsing error
    Media(MediaError),
    /// RTMP handshake failure
    Handshake(HandshakeError),
    /// RTMP protocol violation
    Protocol(ProtocolError),
    /// Channel / fan-out error
    Channel(ChannelError),
    /// HLS pipeline error
    Hls(HlsError),
    /// Publish key did not authorize the channel
    Unauthorized,
    /// Liveness timeout exceeded
    Timeout,
    /// Queue or stream already terminated
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::Amf(e) => write!(f, "amf error: {}", e),
            Error::Media(e) => write!(f, "media error: {}", e),
            Error::Handshake(e) => write!(f, "handshake failed: {}", e),
            Error::Protocol(e) => write!(f, "protocol error: {}", e),
            Error::Channel(e) => write!(f, "channel error: {}", e),
            Error::Hls(e) => write!(f, "hls error: {}", e),
            Error::Unauthorized => write!(f, "unauthorized publish key"),
            Error::Timeout => write!(f, "liveness timeout"),
            Error::Closed => write!(f, "closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl Error {
    /// True when the error means the peer went away rather than misbehaved
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
            Error::Closed => true,
            _ => false,
        }
    }
}

/// AMF0/AMF3 codec errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmfError {
    /// Ran out of bytes mid-value
    UnexpectedEof,
    /// Marker byte not valid for the AMF version in use
    UnknownMarker(u8),
    /// Marker is defined but this implementation declines it (e.g. AMF0 reference)
    Unsupported(u8),
    /// U29 value out of range or malformed
    InvalidU29,
    /// String was not valid UTF-8
    InvalidUtf8,
    /// Reference index pointed outside the reference table
    BadReference(usize),
    /// Object/array nesting exceeded the safety bound
    NestingTooDeep,
    /// Value cannot be encoded in the requested version
    NotEncodable,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnexpectedEof => write!(f, "unexpected end of input"),
            AmfError::UnknownMarker(m) => write!(f, "unknown marker 0x{:02x}", m),
            AmfError::Unsupported(m) => write!(f, "unsupported marker 0x{:02x}", m),
            AmfError::InvalidU29 => write!(f, "u29 out of range"),
            AmfError::InvalidUtf8 => write!(f, "string is not valid utf-8"),
            AmfError::BadReference(i) => write!(f, "reference {} out of table", i),
            AmfError::NestingTooDeep => write!(f, "nesting too deep"),
            AmfError::NotEncodable => write!(f, "value not encodable"),
        }
    }
}

impl std::error::Error for AmfError {}

impl From<AmfError> for Error {
    fn from(e: AmfError) -> Self {
        Error::Amf(e)
    }
}

/// Media parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// FLV tag header shorter than required
    InvalidTag,
    /// AAC packet/AudioSpecificConfig malformed
    InvalidAacPacket,
    /// AVC packet/DecoderConfigurationRecord malformed
    InvalidAvcPacket,
    /// NAL length prefix inconsistent with the remaining payload
    BadNaluSize,
    /// MP3 header carried a reserved sample-rate index
    ReservedIndex,
    /// Codec not carried by this pipeline (HLS wants H.264 + AAC)
    UnsupportedCodec,
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::InvalidTag => write!(f, "invalid flv tag header"),
            MediaError::InvalidAacPacket => write!(f, "invalid aac packet"),
            MediaError::InvalidAvcPacket => write!(f, "invalid avc packet"),
            MediaError::BadNaluSize => write!(f, "nalu length prefix out of bounds"),
            MediaError::ReservedIndex => write!(f, "reserved sample rate index"),
            MediaError::UnsupportedCodec => write!(f, "unsupported codec"),
        }
    }
}

impl std::error::Error for MediaError {}

impl From<MediaError> for Error {
    fn from(e: MediaError) -> Self {
        Error::Media(e)
    }
}

/// Handshake failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// C0/S0 carried a version below 3
    InvalidVersion(u8),
    /// Peer closed or timed out mid-handshake
    Incomplete,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "invalid rtmp version {}", v),
            HandshakeError::Incomplete => write!(f, "handshake incomplete"),
        }
    }
}

impl std::error::Error for HandshakeError {}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        Error::Handshake(e)
    }
}

/// RTMP protocol violations
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Chunk basic/message header malformed
    BadChunkHeader,
    /// Format 1/2/3 chunk arrived with no prior format-0 on the CSID
    NoPriorFullHeader(u32),
    /// Message length field exceeded the 24-bit bound
    MessageTooLong(u32),
    /// Command transaction id was not the expected value
    BadTransactionId(f64),
    /// Peer sent a response we did not expect
    UnexpectedResponse(String),
    /// Peer reported a status code we did not expect
    BadStatus(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadChunkHeader => write!(f, "malformed chunk header"),
            ProtocolError::NoPriorFullHeader(csid) => {
                write!(f, "continuation chunk without full header on csid {}", csid)
            }
            ProtocolError::MessageTooLong(n) => write!(f, "message length {} exceeds 24 bits", n),
            ProtocolError::BadTransactionId(id) => write!(f, "bad transaction id {}", id),
            ProtocolError::UnexpectedResponse(s) => write!(f, "unexpected response: {}", s),
            ProtocolError::BadStatus(s) => write!(f, "bad status code: {}", s),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

/// Channel / fan-out errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// A single GOP exceeded the per-GOP packet bound
    GopTooLarge,
    /// Writer queue saturated (handled by the drop policy, not propagated)
    QueueFull,
    /// No such channel
    NotFound(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::GopTooLarge => write!(f, "gop too large"),
            ChannelError::QueueFull => write!(f, "packet queue full"),
            ChannelError::NotFound(key) => write!(f, "channel not found: {}", key),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<ChannelError> for Error {
    fn from(e: ChannelError) -> Self {
        Error::Channel(e)
    }
}

/// HLS pipeline errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HlsError {
    /// Requested segment is not in the window
    NoSegment(String),
    /// Channel has no publisher
    NoPublisher,
}

impl fmt::Display for HlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HlsError::NoSegment(name) => write!(f, "no such segment: {}", name),
            HlsError::NoPublisher => write!(f, "no publisher"),
        }
    }
}

impl std::error::Error for HlsError {}

impl From<HlsError> for Error {
    fn from(e: HlsError) -> Self {
        Error::Hls(e)
    }
}
