//! tandem-services: connection I/O, the relay engine, and the client side
//! of chat and file transfer.

pub mod client;
pub mod connection;
pub mod events;
pub mod file_transfer;
pub mod registry;
pub mod relay;

pub use client::{ClientSettings, EventStream, RelayClient, Roster};
pub use connection::{ConnectionId, FrameReader, FrameWriter, ReadError, SendError};
pub use events::ClientEvent;
pub use file_transfer::{
    Direction, DirectoryStorage, FileReceiver, FileSender, ReceiveOutcome, TransferError,
    TransferState, TransferStorage,
};
pub use registry::{ClientRegistry, RegisteredPeer};
pub use relay::{ProtocolViolation, Relay, RelaySettings};
