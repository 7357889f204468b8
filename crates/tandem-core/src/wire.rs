//! Tandem wire format: the frame header that prefixes every message.
//!
//! ```text
//! +----------------+-----------+---------------------------+
//! | length (u32)   | type (u8) | body (`length` bytes)     |
//! +----------------+-----------+---------------------------+
//! ```
//!
//! The header is 5 bytes with no padding between fields. `length` counts the
//! body only, never the header. Every numeric field on the wire, here and in
//! the message bodies, is little-endian; legacy peers wrote native x86 structs
//! and this keeps them interoperable.
//!
//! The header is a zerocopy struct built from unaligned fields, so parsing
//! and serialising it is allocation-free and contains no unsafe code.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Frame Header ─────────────────────────────────────────────────────────────

/// Fixed header preceding every frame body.
///
/// Wire size: 5 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    /// Body length in bytes, not including this header.
    pub length: U32<LittleEndian>,

    /// Raw [`MessageType`] discriminant.
    pub kind: u8,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; 5]);

/// Size of [`FrameHeader`] on the wire.
pub const HEADER_LEN: usize = std::mem::size_of::<FrameHeader>();

impl FrameHeader {
    pub fn new(kind: MessageType, length: u32) -> Self {
        Self {
            length: U32::new(length),
            kind: kind.into(),
        }
    }

    /// Body length declared by this header.
    pub fn body_len(&self) -> u32 {
        self.length.get()
    }

    /// Parse the raw type byte. Unknown values are a protocol error.
    pub fn message_type(&self) -> Result<MessageType, WireError> {
        MessageType::try_from(self.kind)
    }
}

// ── Message Type ─────────────────────────────────────────────────────────────

/// Closed set of frame types. Any other byte is a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Login = 1,
    Chat = 2,
    FileMeta = 3,
    FileChunk = 4,
    Progress = 5,
}

impl MessageType {
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Login => "login",
            MessageType::Chat => "chat",
            MessageType::FileMeta => "file_meta",
            MessageType::FileChunk => "file_chunk",
            MessageType::Progress => "progress",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Login),
            2 => Ok(MessageType::Chat),
            3 => Ok(MessageType::FileMeta),
            4 => Ok(MessageType::FileChunk),
            5 => Ok(MessageType::Progress),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Frame ────────────────────────────────────────────────────────────────────

/// One typed, length-prefixed unit of wire data.
///
/// Built right before a send and consumed right after a receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageType,
    pub body: Bytes,
}

impl Frame {
    pub fn new(kind: MessageType, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    /// Header followed by body, ready for a single write.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        encode(self.kind, &self.body)
    }
}

/// Encode a header plus body.
///
/// Fails only when the body cannot be described by the 32-bit length field.
pub fn encode(kind: MessageType, body: &[u8]) -> Result<Bytes, WireError> {
    let length = body_length(body.len())?;
    let header = FrameHeader::new(kind, length);

    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.put_slice(header.as_bytes());
    out.put_slice(body);
    Ok(out.freeze())
}

/// Parse a fixed-size header. Does not touch the body.
pub fn decode(header: &[u8; HEADER_LEN]) -> Result<(u32, MessageType), WireError> {
    // A 5-byte slice always fits the 5-byte header.
    let header = FrameHeader::read_from(&header[..]).ok_or(WireError::Truncated {
        expected: HEADER_LEN,
        actual: header.len(),
    })?;
    Ok((header.body_len(), header.message_type()?))
}

fn body_length(len: usize) -> Result<u32, WireError> {
    u32::try_from(len).map_err(|_| WireError::BodyTooLarge(len))
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Default relay port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default upper bound on a frame body the reader will accept.
/// Large enough for a 4 KiB file chunk with room to spare.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 1024 * 1024;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when building or interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown message type: {0}")]
    UnknownType(u8),

    #[error("body length {0} exceeds the 32-bit length field")]
    BodyTooLarge(usize),

    #[error("{field} is {len} bytes, maximum is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("{field} must not contain {ch:?}")]
    ForbiddenChar { field: &'static str, ch: char },

    #[error("body truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("declared data length {declared} does not match {actual} bytes present")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("unexpected {0} frame")]
    UnexpectedType(MessageType),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
