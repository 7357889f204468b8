//! Message catalog: typed payloads carried inside frames.
//!
//! Login and chat bodies are raw UTF-8 text. The relay, not the client,
//! authors the visible sender of a chat line and of a join announcement.
//!
//! File metadata, file chunks and progress reports are structured. They are
//! encoded under one of two [`WireProfile`]s:
//!
//! * `Legacy`: fixed-capacity string buffers, byte-compatible with the
//!   C clients:
//!
//!   ```text
//!   FileMeta  (136): sender_len u32 | sender [20] | name_len u32 | name [100] | file_size u64
//!   FileChunk (140): sender_len u32 | sender [20] | name_len u32 | name [100] | offset u64 | data_len u32 | data…
//!   Progress  (40):  sender_len u32 | sender [20] | total u64 | received u64
//!   ```
//!
//! * `Compact`: the same fields in the same order, strings written as a
//!   `u16` length followed by the bytes.
//!
//! Capacity ceilings apply to both profiles as validation rules.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::wire::{Frame, MessageType, WireError};

/// Longest display name, in bytes.
pub const MAX_NAME_LEN: usize = 20;

/// Longest file name, in bytes.
pub const MAX_FILE_NAME_LEN: usize = 100;

/// Longest chat line a client may send, in bytes.
pub const MAX_CHAT_LEN: usize = 1024;

const JOINED_SUFFIX: &str = " connected";
const LEFT_SUFFIX: &str = " disconnected";
const CHAT_SEPARATOR: &str = ": ";

// ── Wire Profile ──────────────────────────────────────────────────────────────

/// Encoding used for the structured file-transfer bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireProfile {
    /// Fixed-size buffers, compatible with legacy peers.
    #[default]
    Legacy,
    /// Length-prefixed strings.
    Compact,
}

impl std::str::FromStr for WireProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(WireProfile::Legacy),
            "compact" => Ok(WireProfile::Compact),
            other => Err(format!("unknown wire profile: {other}")),
        }
    }
}

// ── Login ─────────────────────────────────────────────────────────────────────

/// A client's request to join under a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPayload {
    pub sender_name: String,
}

impl LoginPayload {
    pub fn new(sender_name: impl Into<String>) -> Result<Self, WireError> {
        let sender_name = sender_name.into();
        validate_name(&sender_name)?;
        Ok(Self { sender_name })
    }

    /// Body a client sends: the bare name.
    pub fn from_body(body: &[u8]) -> Result<Self, WireError> {
        Self::new(utf8(body, "sender name")?)
    }

    pub fn to_frame(&self) -> Frame {
        Frame::new(
            MessageType::Login,
            Bytes::copy_from_slice(self.sender_name.as_bytes()),
        )
    }
}

/// Login-typed text the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    Joined(String),
    Left(String),
    /// Text that follows neither convention. Shown as-is.
    Other(String),
}

impl Announcement {
    pub fn joined_frame(name: &str) -> Frame {
        Frame::new(MessageType::Login, format!("{name}{JOINED_SUFFIX}"))
    }

    pub fn left_frame(name: &str) -> Frame {
        Frame::new(MessageType::Login, format!("{name}{LEFT_SUFFIX}"))
    }

    pub fn from_body(body: &[u8]) -> Result<Self, WireError> {
        let text = utf8(body, "announcement")?;
        if let Some(name) = text.strip_suffix(JOINED_SUFFIX) {
            Ok(Announcement::Joined(name.to_string()))
        } else if let Some(name) = text.strip_suffix(LEFT_SUFFIX) {
            Ok(Announcement::Left(name.to_string()))
        } else {
            Ok(Announcement::Other(text))
        }
    }
}

// ── Chat ──────────────────────────────────────────────────────────────────────

/// A chat line with its author.
///
/// Clients send only `content`; the relay stamps `sender_name` from its
/// registry and forwards `"{sender_name}: {content}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPayload {
    pub sender_name: String,
    pub content: String,
}

impl ChatPayload {
    /// Frame a client sends for `content`.
    pub fn request_frame(content: &str) -> Result<Frame, WireError> {
        validate_len("chat content", content, MAX_CHAT_LEN)?;
        Ok(Frame::new(
            MessageType::Chat,
            Bytes::copy_from_slice(content.as_bytes()),
        ))
    }

    /// Attach the registered name to a body received from a client.
    pub fn from_request(sender_name: &str, body: &[u8]) -> Result<Self, WireError> {
        let content = utf8(body, "chat content")?;
        validate_len("chat content", &content, MAX_CHAT_LEN)?;
        Ok(Self {
            sender_name: sender_name.to_string(),
            content,
        })
    }

    /// Frame the relay forwards to peers.
    pub fn relayed_frame(&self) -> Frame {
        Frame::new(
            MessageType::Chat,
            format!("{}{CHAT_SEPARATOR}{}", self.sender_name, self.content),
        )
    }

    /// Split a relayed body at the first separator.
    pub fn from_relayed(body: &[u8]) -> Result<Self, WireError> {
        let text = utf8(body, "chat line")?;
        Ok(match text.split_once(CHAT_SEPARATOR) {
            Some((sender, content)) => Self {
                sender_name: sender.to_string(),
                content: content.to_string(),
            },
            None => Self {
                sender_name: String::new(),
                content: text,
            },
        })
    }
}

// ── Legacy layouts ────────────────────────────────────────────────────────────

#[derive(AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct LegacyFileMeta {
    sender_len: U32<LittleEndian>,
    sender: [u8; MAX_NAME_LEN],
    file_name_len: U32<LittleEndian>,
    file_name: [u8; MAX_FILE_NAME_LEN],
    file_size: U64<LittleEndian>,
}

assert_eq_size!(LegacyFileMeta, [u8; 136]);

#[derive(AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct LegacyFileChunk {
    sender_len: U32<LittleEndian>,
    sender: [u8; MAX_NAME_LEN],
    file_name_len: U32<LittleEndian>,
    file_name: [u8; MAX_FILE_NAME_LEN],
    offset: U64<LittleEndian>,
    data_len: U32<LittleEndian>,
}

assert_eq_size!(LegacyFileChunk, [u8; 140]);

#[derive(AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct LegacyProgress {
    sender_len: U32<LittleEndian>,
    sender: [u8; MAX_NAME_LEN],
    total_size: U64<LittleEndian>,
    received_size: U64<LittleEndian>,
}

assert_eq_size!(LegacyProgress, [u8; 40]);

const LEGACY_CHUNK_PREFIX: usize = std::mem::size_of::<LegacyFileChunk>();

/// Largest FileChunk body overhead under either profile. The compact prefix
/// tops out at 136 bytes.
pub const MAX_CHUNK_PREFIX_LEN: usize = LEGACY_CHUNK_PREFIX;

/// Chunk data that fits in one frame of at most `max_frame_len` body bytes.
pub fn max_chunk_data(max_frame_len: u32) -> usize {
    (max_frame_len as usize).saturating_sub(MAX_CHUNK_PREFIX_LEN)
}

// ── File metadata ─────────────────────────────────────────────────────────────

/// Announces an incoming transfer. `file_size` is authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetaPayload {
    pub sender_name: String,
    pub file_name: String,
    pub file_size: u64,
}

impl FileMetaPayload {
    pub fn encode(&self, profile: WireProfile) -> Result<Bytes, WireError> {
        validate_len("sender name", &self.sender_name, MAX_NAME_LEN)?;
        validate_file_name(&self.file_name)?;
        match profile {
            WireProfile::Legacy => {
                let raw = LegacyFileMeta {
                    sender_len: U32::new(self.sender_name.len() as u32),
                    sender: fixed(&self.sender_name),
                    file_name_len: U32::new(self.file_name.len() as u32),
                    file_name: fixed(&self.file_name),
                    file_size: U64::new(self.file_size),
                };
                Ok(Bytes::copy_from_slice(raw.as_bytes()))
            }
            WireProfile::Compact => {
                let mut out = BytesMut::new();
                put_str(&mut out, &self.sender_name);
                put_str(&mut out, &self.file_name);
                out.put_u64_le(self.file_size);
                Ok(out.freeze())
            }
        }
    }

    pub fn decode(body: &[u8], profile: WireProfile) -> Result<Self, WireError> {
        match profile {
            WireProfile::Legacy => {
                let raw = read_exact_struct::<LegacyFileMeta>(body)?;
                Ok(Self {
                    sender_name: from_fixed(&raw.sender, raw.sender_len.get(), "sender name")?,
                    file_name: from_fixed(&raw.file_name, raw.file_name_len.get(), "file name")?,
                    file_size: raw.file_size.get(),
                })
            }
            WireProfile::Compact => {
                let mut buf = body;
                let sender_name = get_str(&mut buf, "sender name", MAX_NAME_LEN)?;
                let file_name = get_str(&mut buf, "file name", MAX_FILE_NAME_LEN)?;
                let file_size = get_u64(&mut buf)?;
                expect_consumed(buf)?;
                Ok(Self {
                    sender_name,
                    file_name,
                    file_size,
                })
            }
        }
    }

    pub fn to_frame(&self, profile: WireProfile) -> Result<Frame, WireError> {
        Ok(Frame::new(MessageType::FileMeta, self.encode(profile)?))
    }
}

// ── File chunk ────────────────────────────────────────────────────────────────

/// One offset-tagged slice of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunkPayload {
    pub sender_name: String,
    pub file_name: String,
    pub offset: u64,
    pub data: Bytes,
}

impl FileChunkPayload {
    pub fn data_len(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn encode(&self, profile: WireProfile) -> Result<Bytes, WireError> {
        validate_len("sender name", &self.sender_name, MAX_NAME_LEN)?;
        validate_file_name(&self.file_name)?;
        let data_len = u32::try_from(self.data.len())
            .map_err(|_| WireError::BodyTooLarge(self.data.len()))?;
        match profile {
            WireProfile::Legacy => {
                let raw = LegacyFileChunk {
                    sender_len: U32::new(self.sender_name.len() as u32),
                    sender: fixed(&self.sender_name),
                    file_name_len: U32::new(self.file_name.len() as u32),
                    file_name: fixed(&self.file_name),
                    offset: U64::new(self.offset),
                    data_len: U32::new(data_len),
                };
                let mut out = BytesMut::with_capacity(LEGACY_CHUNK_PREFIX + self.data.len());
                out.put_slice(raw.as_bytes());
                out.put_slice(&self.data);
                Ok(out.freeze())
            }
            WireProfile::Compact => {
                let mut out = BytesMut::with_capacity(
                    2 + self.sender_name.len() + 2 + self.file_name.len() + 12 + self.data.len(),
                );
                put_str(&mut out, &self.sender_name);
                put_str(&mut out, &self.file_name);
                out.put_u64_le(self.offset);
                out.put_u32_le(data_len);
                out.put_slice(&self.data);
                Ok(out.freeze())
            }
        }
    }

    /// Decode a chunk body. `data` is a zero-copy slice of `body`.
    pub fn decode(body: &Bytes, profile: WireProfile) -> Result<Self, WireError> {
        match profile {
            WireProfile::Legacy => {
                let raw = LegacyFileChunk::read_from_prefix(&body[..]).ok_or(
                    WireError::Truncated {
                        expected: LEGACY_CHUNK_PREFIX,
                        actual: body.len(),
                    },
                )?;
                let data = body.slice(LEGACY_CHUNK_PREFIX..);
                check_data_len(raw.data_len.get(), data.len())?;
                Ok(Self {
                    sender_name: from_fixed(&raw.sender, raw.sender_len.get(), "sender name")?,
                    file_name: from_fixed(&raw.file_name, raw.file_name_len.get(), "file name")?,
                    offset: raw.offset.get(),
                    data,
                })
            }
            WireProfile::Compact => {
                let mut buf = &body[..];
                let sender_name = get_str(&mut buf, "sender name", MAX_NAME_LEN)?;
                let file_name = get_str(&mut buf, "file name", MAX_FILE_NAME_LEN)?;
                let offset = get_u64(&mut buf)?;
                let data_len = get_u32(&mut buf)?;
                check_data_len(data_len, buf.len())?;
                let data = body.slice(body.len() - buf.len()..);
                Ok(Self {
                    sender_name,
                    file_name,
                    offset,
                    data,
                })
            }
        }
    }

    pub fn to_frame(&self, profile: WireProfile) -> Result<Frame, WireError> {
        Ok(Frame::new(MessageType::FileChunk, self.encode(profile)?))
    }
}

// ── Progress ──────────────────────────────────────────────────────────────────

/// Sender-side progress report. Advisory; receivers never complete on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressPayload {
    pub sender_name: String,
    pub total_size: u64,
    pub received_size: u64,
}

impl ProgressPayload {
    pub fn percent(&self) -> f64 {
        if self.total_size == 0 {
            0.0
        } else {
            self.received_size as f64 / self.total_size as f64 * 100.0
        }
    }

    pub fn encode(&self, profile: WireProfile) -> Result<Bytes, WireError> {
        validate_len("sender name", &self.sender_name, MAX_NAME_LEN)?;
        match profile {
            WireProfile::Legacy => {
                let raw = LegacyProgress {
                    sender_len: U32::new(self.sender_name.len() as u32),
                    sender: fixed(&self.sender_name),
                    total_size: U64::new(self.total_size),
                    received_size: U64::new(self.received_size),
                };
                Ok(Bytes::copy_from_slice(raw.as_bytes()))
            }
            WireProfile::Compact => {
                let mut out = BytesMut::new();
                put_str(&mut out, &self.sender_name);
                out.put_u64_le(self.total_size);
                out.put_u64_le(self.received_size);
                Ok(out.freeze())
            }
        }
    }

    pub fn decode(body: &[u8], profile: WireProfile) -> Result<Self, WireError> {
        match profile {
            WireProfile::Legacy => {
                let raw = read_exact_struct::<LegacyProgress>(body)?;
                Ok(Self {
                    sender_name: from_fixed(&raw.sender, raw.sender_len.get(), "sender name")?,
                    total_size: raw.total_size.get(),
                    received_size: raw.received_size.get(),
                })
            }
            WireProfile::Compact => {
                let mut buf = body;
                let sender_name = get_str(&mut buf, "sender name", MAX_NAME_LEN)?;
                let total_size = get_u64(&mut buf)?;
                let received_size = get_u64(&mut buf)?;
                expect_consumed(buf)?;
                Ok(Self {
                    sender_name,
                    total_size,
                    received_size,
                })
            }
        }
    }

    pub fn to_frame(&self, profile: WireProfile) -> Result<Frame, WireError> {
        Ok(Frame::new(MessageType::Progress, self.encode(profile)?))
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

/// A frame as a client receives it from the relay, fully decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Announcement(Announcement),
    Chat(ChatPayload),
    FileMeta(FileMetaPayload),
    FileChunk(FileChunkPayload),
    Progress(ProgressPayload),
}

impl Inbound {
    pub fn from_frame(frame: &Frame, profile: WireProfile) -> Result<Self, WireError> {
        Ok(match frame.kind {
            MessageType::Login => Inbound::Announcement(Announcement::from_body(&frame.body)?),
            MessageType::Chat => Inbound::Chat(ChatPayload::from_relayed(&frame.body)?),
            MessageType::FileMeta => {
                Inbound::FileMeta(FileMetaPayload::decode(&frame.body, profile)?)
            }
            MessageType::FileChunk => {
                Inbound::FileChunk(FileChunkPayload::decode(&frame.body, profile)?)
            }
            MessageType::Progress => {
                Inbound::Progress(ProgressPayload::decode(&frame.body, profile)?)
            }
        })
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Display names never contain ':', so a relayed chat line splits at its
/// first separator unambiguously.
fn validate_name(name: &str) -> Result<(), WireError> {
    if name.is_empty() {
        return Err(WireError::EmptyField("sender name"));
    }
    if name.contains(':') {
        return Err(WireError::ForbiddenChar {
            field: "sender name",
            ch: ':',
        });
    }
    validate_len("sender name", name, MAX_NAME_LEN)
}

fn validate_file_name(name: &str) -> Result<(), WireError> {
    if name.is_empty() {
        return Err(WireError::EmptyField("file name"));
    }
    validate_len("file name", name, MAX_FILE_NAME_LEN)
}

fn validate_len(field: &'static str, value: &str, max: usize) -> Result<(), WireError> {
    if value.len() > max {
        return Err(WireError::FieldTooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

fn utf8(bytes: &[u8], field: &'static str) -> Result<String, WireError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8(field))
}

/// Copy into a zero-padded buffer. Callers validate the length first.
fn fixed<const N: usize>(value: &str) -> [u8; N] {
    let mut out = [0u8; N];
    out[..value.len()].copy_from_slice(value.as_bytes());
    out
}

fn from_fixed<const N: usize>(
    buf: &[u8; N],
    declared: u32,
    field: &'static str,
) -> Result<String, WireError> {
    let len = declared as usize;
    if len > N {
        return Err(WireError::FieldTooLong { field, len, max: N });
    }
    utf8(&buf[..len], field)
}

fn read_exact_struct<T: FromBytes>(body: &[u8]) -> Result<T, WireError> {
    let expected = std::mem::size_of::<T>();
    if body.len() != expected {
        return Err(WireError::Truncated {
            expected,
            actual: body.len(),
        });
    }
    T::read_from(body).ok_or(WireError::Truncated {
        expected,
        actual: body.len(),
    })
}

fn check_data_len(declared: u32, actual: usize) -> Result<(), WireError> {
    if declared as usize != actual {
        return Err(WireError::LengthMismatch {
            declared: declared as usize,
            actual,
        });
    }
    Ok(())
}

fn put_str(out: &mut BytesMut, value: &str) {
    // Every string field is capped well below u16::MAX.
    out.put_u16_le(value.len() as u16);
    out.put_slice(value.as_bytes());
}

fn need(buf: &[u8], n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        return Err(WireError::Truncated {
            expected: n,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

fn get_str(buf: &mut &[u8], field: &'static str, max: usize) -> Result<String, WireError> {
    need(*buf, 2)?;
    let len = buf.get_u16_le() as usize;
    if len > max {
        return Err(WireError::FieldTooLong { field, len, max });
    }
    need(*buf, len)?;
    let value = utf8(&buf[..len], field)?;
    buf.advance(len);
    Ok(value)
}

fn get_u64(buf: &mut &[u8]) -> Result<u64, WireError> {
    need(*buf, 8)?;
    Ok(buf.get_u64_le())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32, WireError> {
    need(*buf, 4)?;
    Ok(buf.get_u32_le())
}

fn expect_consumed(buf: &[u8]) -> Result<(), WireError> {
    if !buf.is_empty() {
        return Err(WireError::LengthMismatch {
            declared: 0,
            actual: buf.len(),
        });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
