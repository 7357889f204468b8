//! tandem-core: wire format, message catalog, and configuration.
//! All other Tandem crates depend on this one.

pub mod config;
pub mod message;
pub mod wire;

pub use message::{
    Announcement, ChatPayload, FileChunkPayload, FileMetaPayload, Inbound, LoginPayload,
    ProgressPayload, WireProfile,
};
pub use wire::{Frame, FrameHeader, MessageType, WireError, HEADER_LEN};
