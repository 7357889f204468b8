//! Client session: logs in, turns inbound frames into [`ClientEvent`]s, and
//! sends chat and files on the user's behalf.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use tandem_core::config::TandemConfig;
use tandem_core::message::{Announcement, ChatPayload, Inbound, LoginPayload, WireProfile};
use tandem_core::wire::DEFAULT_MAX_FRAME_LEN;

use crate::connection::{FrameReader, FrameWriter};
use crate::events::ClientEvent;
use crate::file_transfer::{
    DirectoryStorage, FileReceiver, FileSender, TransferError, TransferState, DEFAULT_CHUNK_SIZE,
    DEFAULT_PROGRESS_EVERY,
};

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub profile: WireProfile,
    pub max_frame_len: u32,
    pub download_dir: PathBuf,
    pub chunk_size: usize,
    pub progress_every: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            profile: WireProfile::Legacy,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            download_dir: PathBuf::from("./downloads"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl ClientSettings {
    pub fn from_config(config: &TandemConfig) -> Self {
        Self {
            profile: config.protocol.profile,
            max_frame_len: config.protocol.max_frame_len,
            download_dir: config.transfer.download_dir.clone(),
            chunk_size: config.transfer.chunk_size,
            progress_every: config.transfer.progress_every,
        }
    }
}

pub type EventStream = mpsc::UnboundedReceiver<ClientEvent>;

/// Peers the relay has announced, in arrival order. Duplicate names are
/// kept; a departure removes one occurrence.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    names: Arc<Mutex<Vec<String>>>,
}

impl Roster {
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.names.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply(&self, event: &ClientEvent) {
        match event {
            ClientEvent::PeerJoined { name } => self.lock().push(name.clone()),
            ClientEvent::PeerLeft { name } => {
                let mut names = self.lock();
                if let Some(i) = names.iter().position(|n| n == name) {
                    names.remove(i);
                }
            }
            _ => {}
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().clone()
    }
}

/// A logged-in session with the relay.
pub struct RelayClient {
    name: String,
    writer: FrameWriter,
    files: FileSender,
    roster: Roster,
    events: mpsc::UnboundedSender<ClientEvent>,
    shutdown: broadcast::Sender<()>,
    receive_task: JoinHandle<()>,
}

impl RelayClient {
    /// Connect to `addr` and log in as `name`.
    pub async fn connect(
        addr: &str,
        name: &str,
        settings: ClientSettings,
    ) -> Result<(Self, EventStream)> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to relay at {addr}"))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "TCP_NODELAY not set");
        }
        let (read_half, write_half) = stream.into_split();
        Self::start(read_half, write_half, name, settings).await
    }

    /// Log in over an already-open stream and spawn the receive loop.
    pub async fn start<R, W>(
        read_half: R,
        write_half: W,
        name: &str,
        settings: ClientSettings,
    ) -> Result<(Self, EventStream)>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let login = LoginPayload::new(name).context("invalid display name")?;
        let writer = FrameWriter::new(write_half);
        writer
            .send(&login.to_frame())
            .await
            .context("failed to send login")?;
        tracing::info!(name, "logged in");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let reader = FrameReader::new(read_half, settings.max_frame_len);
        let receiver = FileReceiver::new(DirectoryStorage::new(settings.download_dir.clone()));
        let roster = Roster::default();
        let receive_task = tokio::spawn(receive_loop(
            reader,
            receiver,
            settings.profile,
            roster.clone(),
            events_tx.clone(),
            shutdown_rx,
        ));

        let files = FileSender::new(name, settings.profile)
            .with_chunking(settings.chunk_size, settings.progress_every)
            .with_max_frame_len(settings.max_frame_len);

        Ok((
            Self {
                name: name.to_string(),
                writer,
                files,
                roster,
                events: events_tx,
                shutdown: shutdown_tx,
                receive_task,
            },
            events_rx,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Other clients known to be online, from the relay's announcements.
    /// Without departure announcements this only ever grows.
    pub fn online(&self) -> Vec<String> {
        self.roster.names()
    }

    pub async fn send_chat(&self, text: &str) -> Result<()> {
        let frame = ChatPayload::request_frame(text)?;
        self.writer
            .send(&frame)
            .await
            .context("failed to send chat")?;
        Ok(())
    }

    /// Upload a file. Progress is reported on the event stream as it goes.
    pub async fn send_file(&self, path: &Path) -> Result<TransferState, TransferError> {
        let events = self.events.clone();
        let state = self
            .files
            .send_path(&self.writer, path, |s| {
                let _ = events.send(ClientEvent::SendProgress {
                    name: s.file_name.clone(),
                    sent: s.transferred,
                    total: s.total_size,
                });
            })
            .await?;
        let _ = self.events.send(ClientEvent::FileSent {
            name: state.file_name.clone(),
            size: state.total_size,
        });
        Ok(state)
    }

    /// End the session. Unblocks the pending read; `Disconnected` is the
    /// last event delivered.
    pub async fn close(self) {
        let _ = self.shutdown.send(());
        let _ = self.writer.shutdown().await;
        if let Err(e) = self.receive_task.await {
            tracing::warn!(error = %e, "receive task failed");
        }
    }
}

async fn receive_loop<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    mut files: FileReceiver<DirectoryStorage>,
    profile: WireProfile,
    roster: Roster,
    events: mpsc::UnboundedSender<ClientEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.recv() => break,
            next = reader.read_frame() => next,
        };

        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("relay closed the connection");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "lost connection to relay");
                break;
            }
        };

        let inbound = match Inbound::from_frame(&frame, profile) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!(kind = %frame.kind, error = %e, "undecodable frame from relay");
                let _ = events.send(ClientEvent::Notice {
                    message: format!("ignored malformed {} frame: {e}", frame.kind),
                });
                continue;
            }
        };

        for event in interpret(inbound, &mut files) {
            roster.apply(&event);
            let _ = events.send(event);
        }
    }

    let unfinished = files.in_progress();
    if !unfinished.is_empty() {
        tracing::warn!(count = unfinished.len(), "disconnected with incomplete downloads");
    }
    let _ = events.send(ClientEvent::Disconnected);
}

fn interpret(inbound: Inbound, files: &mut FileReceiver<DirectoryStorage>) -> Vec<ClientEvent> {
    match inbound {
        Inbound::Announcement(Announcement::Joined(name)) => vec![ClientEvent::PeerJoined { name }],
        Inbound::Announcement(Announcement::Left(name)) => vec![ClientEvent::PeerLeft { name }],
        Inbound::Announcement(Announcement::Other(message)) => vec![ClientEvent::Notice { message }],
        Inbound::Chat(chat) => vec![ClientEvent::ChatReceived {
            sender: chat.sender_name,
            text: chat.content,
        }],
        Inbound::FileMeta(meta) => files.on_meta(&meta).into_iter().map(Into::into).collect(),
        Inbound::FileChunk(chunk) => vec![files.on_chunk(&chunk).into()],
        Inbound::Progress(progress) => vec![ClientEvent::RemoteProgress {
            sender: progress.sender_name,
            received: progress.received_size,
            total: progress.total_size,
        }],
    }
}
