//! File transfer: chunking on the way out, reassembly on the way in.
//!
//! The relay never looks inside a transfer; both halves live in clients.
//! A transfer is one FileMeta, then contiguous FileChunks whose lengths sum
//! to the declared size, with advisory Progress frames mixed in.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

use tandem_core::message::{
    max_chunk_data, FileChunkPayload, FileMetaPayload, ProgressPayload, WireProfile,
};
use tandem_core::wire::{WireError, DEFAULT_MAX_FRAME_LEN};

use crate::connection::{FrameWriter, SendError};

/// Bytes per outgoing chunk unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Progress is reported every this many chunks, and on the last one.
pub const DEFAULT_PROGRESS_EVERY: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Receive,
}

/// Where one transfer stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferState {
    pub file_name: String,
    pub total_size: u64,
    pub transferred: u64,
    pub direction: Direction,
    pub done: bool,
}

impl TransferState {
    fn new(file_name: &str, total_size: u64, direction: Direction) -> Self {
        Self {
            file_name: file_name.to_string(),
            total_size,
            transferred: 0,
            direction,
            done: false,
        }
    }

    pub fn percent(&self) -> f64 {
        if self.total_size == 0 {
            return 100.0;
        }
        self.transferred as f64 * 100.0 / self.total_size as f64
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid transfer frame: {0}")]
    Wire(#[from] WireError),

    #[error("send failed: {0}")]
    Send(#[from] SendError),

    #[error("{file_name}: source ended after {actual} of {expected} bytes")]
    SourceTruncated {
        file_name: String,
        expected: u64,
        actual: u64,
    },

    #[error("not a usable file name: {0}")]
    InvalidFileName(String),

    #[error("frame limit of {0} bytes leaves no room for chunk data")]
    FrameLimitTooSmall(u32),
}

// ── Storage ───────────────────────────────────────────────────────────────────

/// Where received bytes end up.
pub trait TransferStorage {
    type Sink;

    /// Open a fresh sink for `file_name`, truncating any earlier content.
    fn open_sink(&mut self, file_name: &str) -> io::Result<Self::Sink>;

    fn write(&mut self, sink: &mut Self::Sink, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Finalize the sink and report where the file was saved.
    fn close(&mut self, sink: Self::Sink) -> io::Result<String>;
}

/// Writes received files into one download directory.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    dir: PathBuf,
}

#[derive(Debug)]
pub struct DirectorySink {
    file: File,
    path: PathBuf,
}

impl DirectoryStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path for a remote file name. Directory components are dropped
    /// so a peer cannot write outside the download directory.
    pub fn target_path(&self, file_name: &str) -> io::Result<PathBuf> {
        let base = Path::new(file_name)
            .file_name()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unusable file name {file_name:?}"),
                )
            })?;
        Ok(self.dir.join(base))
    }
}

impl TransferStorage for DirectoryStorage {
    type Sink = DirectorySink;

    fn open_sink(&mut self, file_name: &str) -> io::Result<DirectorySink> {
        let path = self.target_path(file_name)?;
        std::fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(DirectorySink { file, path })
    }

    fn write(&mut self, sink: &mut DirectorySink, offset: u64, data: &[u8]) -> io::Result<()> {
        sink.file.seek(SeekFrom::Start(offset))?;
        sink.file.write_all(data)
    }

    fn close(&mut self, mut sink: DirectorySink) -> io::Result<String> {
        sink.file.flush()?;
        sink.file.sync_all()?;
        Ok(sink.path.display().to_string())
    }
}

// ── Receiving ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// No FileMeta announced this name.
    UnknownFile,
    /// The chunk would push the transfer past its declared size.
    ExceedsDeclaredSize { declared: u64, would_reach: u64 },
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::UnknownFile => write!(f, "no transfer announced for this file"),
            DiscardReason::ExceedsDeclaredSize {
                declared,
                would_reach,
            } => write!(f, "chunk would reach {would_reach} bytes of a {declared}-byte file"),
        }
    }
}

/// What the receiver did with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Started {
        file_name: String,
        total_size: u64,
        sender: String,
    },
    Progress {
        file_name: String,
        received: u64,
        total: u64,
    },
    Completed {
        file_name: String,
        total_size: u64,
        saved_location: String,
    },
    Discarded {
        file_name: String,
        reason: DiscardReason,
    },
    /// The sink could not be opened, written or closed. The transfer is
    /// abandoned; the connection is unaffected.
    SinkFailed { file_name: String, error: String },
}

struct Incoming<K> {
    sink: K,
    state: TransferState,
}

/// Reassembles inbound transfers, one in flight per file name.
pub struct FileReceiver<S: TransferStorage> {
    storage: S,
    active: HashMap<String, Incoming<S::Sink>>,
}

impl<S: TransferStorage> FileReceiver<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            active: HashMap::new(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Start (or restart) a transfer.
    pub fn on_meta(&mut self, meta: &FileMetaPayload) -> Vec<ReceiveOutcome> {
        let name = &meta.file_name;
        if let Some(previous) = self.active.remove(name) {
            tracing::warn!(
                file = %name,
                received = previous.state.transferred,
                total = previous.state.total_size,
                "transfer restarted before completion"
            );
        }

        let sink = match self.storage.open_sink(name) {
            Ok(sink) => sink,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "cannot open sink");
                return vec![sink_failed(name, e)];
            }
        };

        tracing::info!(
            file = %name,
            bytes = meta.file_size,
            sender = %meta.sender_name,
            "receiving file"
        );
        let mut outcomes = vec![ReceiveOutcome::Started {
            file_name: name.clone(),
            total_size: meta.file_size,
            sender: meta.sender_name.clone(),
        }];

        let incoming = Incoming {
            sink,
            state: TransferState::new(name, meta.file_size, Direction::Receive),
        };
        if meta.file_size == 0 {
            outcomes.push(self.finish(incoming));
        } else {
            self.active.insert(name.clone(), incoming);
        }
        outcomes
    }

    /// Write one chunk into its transfer.
    pub fn on_chunk(&mut self, chunk: &FileChunkPayload) -> ReceiveOutcome {
        let name = &chunk.file_name;
        let Some(entry) = self.active.get_mut(name) else {
            tracing::debug!(file = %name, offset = chunk.offset, "chunk for unknown transfer");
            return ReceiveOutcome::Discarded {
                file_name: name.clone(),
                reason: DiscardReason::UnknownFile,
            };
        };

        let len = chunk.data.len() as u64;
        let would_reach = entry.state.transferred + len;
        if would_reach > entry.state.total_size {
            tracing::warn!(
                file = %name,
                would_reach,
                declared = entry.state.total_size,
                "chunk overruns declared size"
            );
            return ReceiveOutcome::Discarded {
                file_name: name.clone(),
                reason: DiscardReason::ExceedsDeclaredSize {
                    declared: entry.state.total_size,
                    would_reach,
                },
            };
        }

        if chunk.offset != entry.state.transferred {
            tracing::warn!(
                file = %name,
                offset = chunk.offset,
                expected = entry.state.transferred,
                "non-contiguous chunk"
            );
        }

        if let Err(e) = self.storage.write(&mut entry.sink, chunk.offset, &chunk.data) {
            tracing::warn!(file = %name, error = %e, "sink write failed");
            self.active.remove(name);
            return sink_failed(name, e);
        }
        entry.state.transferred = would_reach;

        if entry.state.transferred == entry.state.total_size {
            match self.active.remove(name) {
                Some(incoming) => self.finish(incoming),
                None => sink_failed(name, io::Error::other("transfer vanished")),
            }
        } else {
            ReceiveOutcome::Progress {
                file_name: name.clone(),
                received: entry.state.transferred,
                total: entry.state.total_size,
            }
        }
    }

    /// Snapshot of every unfinished inbound transfer.
    pub fn in_progress(&self) -> Vec<TransferState> {
        let mut states: Vec<_> = self.active.values().map(|i| i.state.clone()).collect();
        states.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        states
    }

    fn finish(&mut self, incoming: Incoming<S::Sink>) -> ReceiveOutcome {
        let Incoming { sink, mut state } = incoming;
        match self.storage.close(sink) {
            Ok(saved_location) => {
                state.done = true;
                tracing::info!(
                    file = %state.file_name,
                    bytes = state.total_size,
                    path = %saved_location,
                    "file received"
                );
                ReceiveOutcome::Completed {
                    file_name: state.file_name,
                    total_size: state.total_size,
                    saved_location,
                }
            }
            Err(e) => {
                tracing::warn!(file = %state.file_name, error = %e, "cannot finalize sink");
                sink_failed(&state.file_name, e)
            }
        }
    }
}

fn sink_failed(file_name: &str, error: io::Error) -> ReceiveOutcome {
    ReceiveOutcome::SinkFailed {
        file_name: file_name.to_string(),
        error: error.to_string(),
    }
}

// ── Sending ───────────────────────────────────────────────────────────────────

/// Streams a byte source to the relay as FileMeta, FileChunks and Progress.
#[derive(Debug, Clone)]
pub struct FileSender {
    sender_name: String,
    profile: WireProfile,
    chunk_size: usize,
    progress_every: u32,
    max_frame_len: u32,
}

impl FileSender {
    pub fn new(sender_name: impl Into<String>, profile: WireProfile) -> Self {
        Self {
            sender_name: sender_name.into(),
            profile,
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_every: DEFAULT_PROGRESS_EVERY,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_chunking(mut self, chunk_size: usize, progress_every: u32) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.progress_every = progress_every.max(1);
        self
    }

    /// Largest frame body the relay accepts. Chunks are shrunk to fit.
    pub fn with_max_frame_len(mut self, max_frame_len: u32) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Data bytes actually put in each chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.min(max_chunk_data(self.max_frame_len))
    }

    /// Send `total_size` bytes read from `source` under `file_name`.
    ///
    /// `on_progress` sees the state after every chunk. Frames are written
    /// strictly in order; a source shorter than `total_size` aborts the
    /// transfer with [`TransferError::SourceTruncated`].
    pub async fn send<R, F>(
        &self,
        writer: &FrameWriter,
        file_name: &str,
        total_size: u64,
        mut source: R,
        mut on_progress: F,
    ) -> Result<TransferState, TransferError>
    where
        R: AsyncRead + Unpin,
        F: FnMut(&TransferState),
    {
        let chunk_size = self.chunk_size();
        if chunk_size == 0 {
            return Err(TransferError::FrameLimitTooSmall(self.max_frame_len));
        }
        if chunk_size < self.chunk_size {
            tracing::debug!(
                requested = self.chunk_size,
                chunk_size,
                max_frame_len = self.max_frame_len,
                "chunk size reduced to fit frame limit"
            );
        }

        let meta = FileMetaPayload {
            sender_name: self.sender_name.clone(),
            file_name: file_name.to_string(),
            file_size: total_size,
        };
        writer.send(&meta.to_frame(self.profile)?).await?;
        tracing::info!(file = file_name, bytes = total_size, "sending file");

        let mut state = TransferState::new(file_name, total_size, Direction::Send);
        let mut buf = vec![0u8; chunk_size];
        let mut chunks: u32 = 0;

        while state.transferred < total_size {
            let want = (total_size - state.transferred).min(chunk_size as u64) as usize;
            match source.read_exact(&mut buf[..want]).await {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(TransferError::SourceTruncated {
                        file_name: file_name.to_string(),
                        expected: total_size,
                        actual: state.transferred,
                    });
                }
                Err(e) => return Err(e.into()),
            }

            let chunk = FileChunkPayload {
                sender_name: self.sender_name.clone(),
                file_name: file_name.to_string(),
                offset: state.transferred,
                data: Bytes::copy_from_slice(&buf[..want]),
            };
            writer.send(&chunk.to_frame(self.profile)?).await?;
            state.transferred += want as u64;
            chunks += 1;

            if chunks % self.progress_every == 0 || state.transferred == total_size {
                let progress = ProgressPayload {
                    sender_name: self.sender_name.clone(),
                    total_size,
                    received_size: state.transferred,
                };
                writer.send(&progress.to_frame(self.profile)?).await?;
                tracing::debug!(file = file_name, percent = state.percent() as u32, "progress");
            }
            on_progress(&state);
        }

        state.done = true;
        tracing::info!(file = file_name, bytes = total_size, chunks, "file sent");
        Ok(state)
    }

    /// Send a file from disk under its base name.
    pub async fn send_path<F>(
        &self,
        writer: &FrameWriter,
        path: &Path,
        on_progress: F,
    ) -> Result<TransferState, TransferError>
    where
        F: FnMut(&TransferState),
    {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidFileName(path.display().to_string()))?
            .to_string();
        let file = tokio::fs::File::open(path).await?;
        let total_size = file.metadata().await?.len();
        self.send(writer, &file_name, total_size, file, on_progress)
            .await
    }
}
