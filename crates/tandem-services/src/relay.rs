//! Relay engine: per-connection state machine and fan-out.
//!
//! Every accepted connection runs its own task:
//!
//! ```text
//! Connected ──Login──▶ Authenticated ──(close | error | violation)──▶ Closed
//!     └──────────────(anything else)────────────────────────────────────┘
//! ```
//!
//! Chat lines are stamped with the registered name. File metadata, chunks
//! and progress are forwarded as-is unless `stamp_file_sender` is set. The
//! relay never reassembles files.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use tandem_core::config::TandemConfig;
use tandem_core::message::{
    Announcement, ChatPayload, FileChunkPayload, FileMetaPayload, LoginPayload, ProgressPayload,
    WireProfile,
};
use tandem_core::wire::{Frame, MessageType, WireError, DEFAULT_MAX_FRAME_LEN};

use crate::connection::{ConnectionId, FrameReader, FrameWriter, ReadError, SendError};
use crate::registry::{ClientRegistry, RegisteredPeer};

/// Relay behaviour knobs, resolved from [`TandemConfig`].
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub profile: WireProfile,
    pub max_frame_len: u32,
    pub stamp_file_sender: bool,
    pub announce_departures: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            profile: WireProfile::Legacy,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            stamp_file_sender: false,
            announce_departures: false,
        }
    }
}

impl RelaySettings {
    pub fn from_config(config: &TandemConfig) -> Self {
        Self {
            profile: config.protocol.profile,
            max_frame_len: config.protocol.max_frame_len,
            stamp_file_sender: config.relay.stamp_file_sender,
            announce_departures: config.relay.announce_departures,
        }
    }
}

/// Frames a peer is never allowed to send. Each one closes the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("{0} frame before login")]
    NotLoggedIn(MessageType),

    #[error("second login on an authenticated connection")]
    RepeatedLogin,

    #[error("malformed {kind} body: {source}")]
    Malformed {
        kind: MessageType,
        source: WireError,
    },

    #[error("{0}")]
    Framing(ReadError),
}

/// Why a connection loop ended.
#[derive(Debug, thiserror::Error)]
enum CloseReason {
    #[error("peer closed the connection")]
    Orderly,
    #[error("transport failure: {0}")]
    Transport(io::Error),
    #[error("protocol violation: {0}")]
    Violation(#[from] ProtocolViolation),
    #[error("relay shutting down")]
    Shutdown,
}

impl From<SendError> for CloseReason {
    fn from(e: SendError) -> Self {
        match e {
            SendError::Io(e) => CloseReason::Transport(e),
            SendError::Wire(e) => CloseReason::Transport(io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }
}

enum ConnState {
    Connected,
    Authenticated { name: String },
}

/// The relay. Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct Relay {
    registry: ClientRegistry,
    settings: Arc<RelaySettings>,
}

impl Relay {
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            registry: ClientRegistry::new(),
            settings: Arc::new(settings),
        }
    }

    /// Read-only view of who is online.
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Accept connections until shutdown, one task per connection.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "relay listening");
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("relay accept loop shutting down");
                    return Ok(());
                }

                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let relay = self.clone();
                    let shutdown = shutdown.resubscribe();
                    tokio::spawn(async move {
                        relay.serve_tcp(stream, peer_addr, shutdown).await;
                    });
                }
            }
        }
    }

    async fn serve_tcp(
        self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        shutdown: broadcast::Receiver<()>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "TCP_NODELAY not set");
        }
        let id = ConnectionId::next();
        tracing::info!(conn = %id, %peer_addr, "new connection");
        let (read_half, write_half) = stream.into_split();
        self.serve_connection(id, read_half, write_half, shutdown)
            .await;
    }

    /// Drive one connection from accept to close.
    pub async fn serve_connection<R, W>(
        &self,
        id: ConnectionId,
        read_half: R,
        write_half: W,
        mut shutdown: broadcast::Receiver<()>,
    ) where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut reader = FrameReader::new(read_half, self.settings.max_frame_len);
        let writer = FrameWriter::new(write_half);
        let mut state = ConnState::Connected;

        let reason = loop {
            let next = tokio::select! {
                _ = shutdown.recv() => break CloseReason::Shutdown,
                next = reader.read_frame() => next,
            };

            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => break CloseReason::Orderly,
                Err(ReadError::Io(e)) => break CloseReason::Transport(e),
                Err(e) => break CloseReason::Violation(ProtocolViolation::Framing(e)),
            };

            if let Err(reason) = self.handle_frame(id, &writer, &mut state, frame).await {
                break reason;
            }
        };

        match &reason {
            CloseReason::Violation(v) => {
                tracing::warn!(conn = %id, violation = %v, "closing connection")
            }
            CloseReason::Transport(e) => {
                tracing::warn!(conn = %id, error = %e, "connection failed")
            }
            _ => tracing::debug!(conn = %id, reason = %reason, "connection closing"),
        }

        if let Some(name) = self.registry.unregister(id) {
            tracing::info!(conn = %id, name, "client disconnected");
            if self.settings.announce_departures {
                self.broadcast(id, &Announcement::left_frame(&name)).await;
            }
        }

        let _ = writer.shutdown().await;
    }

    async fn handle_frame(
        &self,
        id: ConnectionId,
        writer: &FrameWriter,
        state: &mut ConnState,
        frame: Frame,
    ) -> Result<(), CloseReason> {
        match state {
            ConnState::Connected => {
                if frame.kind != MessageType::Login {
                    return Err(ProtocolViolation::NotLoggedIn(frame.kind).into());
                }
                let login = LoginPayload::from_body(&frame.body).map_err(malformed(frame.kind))?;
                self.admit(id, writer, &login.sender_name).await?;
                *state = ConnState::Authenticated {
                    name: login.sender_name,
                };
                Ok(())
            }
            ConnState::Authenticated { name } => match frame.kind {
                MessageType::Login => Err(ProtocolViolation::RepeatedLogin.into()),
                MessageType::Chat => {
                    let chat =
                        ChatPayload::from_request(name, &frame.body).map_err(malformed(frame.kind))?;
                    tracing::info!(conn = %id, name = %name, content = %chat.content, "chat");
                    self.broadcast(id, &chat.relayed_frame()).await;
                    Ok(())
                }
                MessageType::FileMeta | MessageType::FileChunk | MessageType::Progress => {
                    let frame = self.prepare_file_frame(id, name, frame)?;
                    self.broadcast(id, &frame).await;
                    Ok(())
                }
            },
        }
    }

    /// Register a newly logged-in client, replay who is already here, and
    /// announce the newcomer to exactly those peers.
    ///
    /// The newcomer's writer stays locked from registration until the replay
    /// is written, so relayed traffic can only follow the replay.
    async fn admit(
        &self,
        id: ConnectionId,
        writer: &FrameWriter,
        name: &str,
    ) -> Result<(), CloseReason> {
        let mut held = writer.lock().await;
        let present = self.registry.register(id, name, writer.clone());
        tracing::info!(conn = %id, name, online = present.len() + 1, "client logged in");

        for peer in &present {
            held.send(&Announcement::joined_frame(&peer.name)).await?;
        }
        drop(held);

        let joined = Announcement::joined_frame(name);
        match joined.encode() {
            Ok(encoded) => {
                let delivered = deliver(id, &present, &encoded).await;
                tracing::debug!(conn = %id, delivered, "join announced");
            }
            Err(e) => tracing::warn!(conn = %id, error = %e, "cannot encode join announcement"),
        }
        Ok(())
    }

    /// Decide what to forward for a file or progress frame.
    fn prepare_file_frame(
        &self,
        id: ConnectionId,
        name: &str,
        frame: Frame,
    ) -> Result<Frame, ProtocolViolation> {
        let profile = self.settings.profile;
        let kind = frame.kind;

        if !self.settings.stamp_file_sender {
            log_file_frame(id, name, &frame, profile);
            return Ok(frame);
        }

        let stamped = match kind {
            MessageType::FileMeta => {
                let mut meta = FileMetaPayload::decode(&frame.body, profile).map_err(malformed(kind))?;
                log_meta(id, name, &meta);
                meta.sender_name = name.to_string();
                meta.to_frame(profile)
            }
            MessageType::FileChunk => {
                let mut chunk =
                    FileChunkPayload::decode(&frame.body, profile).map_err(malformed(kind))?;
                chunk.sender_name = name.to_string();
                chunk.to_frame(profile)
            }
            MessageType::Progress => {
                let mut progress =
                    ProgressPayload::decode(&frame.body, profile).map_err(malformed(kind))?;
                log_progress(id, name, &progress);
                progress.sender_name = name.to_string();
                progress.to_frame(profile)
            }
            other => return Ok(Frame::new(other, frame.body)),
        };
        stamped.map_err(malformed(kind))
    }

    /// Send `frame` to every registered connection except `origin`.
    ///
    /// A failed write is logged and skipped; the failing peer is removed only
    /// when its own reader notices.
    pub async fn broadcast(&self, origin: ConnectionId, frame: &Frame) -> usize {
        let encoded = match frame.encode() {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(conn = %origin, error = %e, "cannot encode broadcast frame");
                return 0;
            }
        };
        let peers = self.registry.peers_except(origin);
        deliver(origin, &peers, &encoded).await
    }
}

async fn deliver(
    origin: ConnectionId,
    peers: &[RegisteredPeer],
    encoded: &[u8],
) -> usize {
    let mut delivered = 0;
    for peer in peers {
        match peer.writer.send_encoded(encoded).await {
            Ok(()) => delivered += 1,
            Err(e) => tracing::warn!(
                conn = %origin,
                peer = %peer.id,
                peer_name = %peer.name,
                error = %e,
                "broadcast to peer failed"
            ),
        }
    }
    tracing::trace!(conn = %origin, delivered, total = peers.len(), "broadcast");
    delivered
}

fn malformed(kind: MessageType) -> impl Fn(WireError) -> ProtocolViolation {
    move |source| ProtocolViolation::Malformed { kind, source }
}

fn log_file_frame(id: ConnectionId, name: &str, frame: &Frame, profile: WireProfile) {
    match frame.kind {
        MessageType::FileMeta => match FileMetaPayload::decode(&frame.body, profile) {
            Ok(meta) => log_meta(id, name, &meta),
            Err(e) => tracing::debug!(conn = %id, error = %e, "undecodable file metadata forwarded"),
        },
        MessageType::Progress => match ProgressPayload::decode(&frame.body, profile) {
            Ok(progress) => log_progress(id, name, &progress),
            Err(e) => tracing::debug!(conn = %id, error = %e, "undecodable progress forwarded"),
        },
        _ => tracing::trace!(conn = %id, len = frame.body.len(), "file chunk forwarded"),
    }
}

fn log_meta(id: ConnectionId, name: &str, meta: &FileMetaPayload) {
    tracing::info!(
        conn = %id,
        name,
        file = %meta.file_name,
        bytes = meta.file_size,
        "file transfer announced"
    );
}

fn log_progress(id: ConnectionId, name: &str, progress: &ProgressPayload) {
    tracing::info!(
        conn = %id,
        name,
        percent = progress.percent() as u32,
        "file transfer progress"
    );
}
