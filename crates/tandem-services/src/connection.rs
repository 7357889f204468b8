//! Connection I/O: one frame at a time in, serialized frames out.
//!
//! A connection is split into a [`FrameReader`] owned by exactly one task and
//! a [`FrameWriter`] that any task may clone and write through. The writer
//! serialises whole frames behind a lock so concurrent broadcasts never
//! interleave bytes on the same stream.
//!
//! Reads block until a full frame arrives or the peer goes away. There is no
//! read timeout; an idle peer holds its reader indefinitely. Callers that
//! need to unwind select against a shutdown channel.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};

use tandem_core::wire::{self, Frame, WireError, HEADER_LEN};

// ── Connection identity ───────────────────────────────────────────────────────

/// Process-unique identity of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed header: {0}")]
    Wire(#[from] WireError),

    #[error("frame body of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: u32, max: u32 },
}

impl ReadError {
    /// Transport failures versus frames the peer should never have sent.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, ReadError::Io(_))
    }
}

/// Pulls exactly one frame per call from a byte stream.
pub struct FrameReader<R> {
    inner: R,
    max_frame_len: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_len: u32) -> Self {
        Self {
            inner,
            max_frame_len,
        }
    }

    /// Read one header, then exactly the body it declares.
    ///
    /// `Ok(None)` means the peer closed the stream, including mid-frame.
    /// The body is never interpreted here.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ReadError> {
        let mut header = [0u8; HEADER_LEN];
        if !read_full(&mut self.inner, &mut header).await? {
            return Ok(None);
        }

        let (len, kind) = wire::decode(&header)?;
        if len > self.max_frame_len {
            return Err(ReadError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let mut body = vec![0u8; len as usize];
        if !read_full(&mut self.inner, &mut body).await? {
            tracing::debug!(kind = %kind, len, "stream closed mid-frame");
            return Ok(None);
        }

        tracing::trace!(kind = %kind, len, "frame received");
        Ok(Some(Frame::new(kind, body)))
    }
}

/// Fill `buf` completely. `false` on end of stream.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("cannot encode frame: {0}")]
    Wire(#[from] WireError),

    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared, serialised write side of a connection.
#[derive(Clone)]
pub struct FrameWriter {
    inner: Arc<Mutex<BoxedWriter>>,
}

impl FrameWriter {
    pub fn new<W>(inner: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::new(inner))),
        }
    }

    /// Encode and write one frame.
    pub async fn send(&self, frame: &Frame) -> Result<(), SendError> {
        let encoded = frame.encode()?;
        self.send_encoded(&encoded).await?;
        Ok(())
    }

    /// Write bytes that already hold one or more complete frames.
    pub async fn send_encoded(&self, encoded: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.write_all(encoded).await?;
        inner.flush().await
    }

    /// Flush and close the write side. Errors are the caller's to ignore.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.inner.lock().await.shutdown().await
    }

    /// Hold the stream exclusively. Other senders wait until the guard is
    /// dropped, so a run of frames written through it stays contiguous.
    pub async fn lock(&self) -> LockedWriter<'_> {
        LockedWriter {
            inner: self.inner.lock().await,
        }
    }
}

/// Exclusive access to a [`FrameWriter`]'s stream.
pub struct LockedWriter<'a> {
    inner: MutexGuard<'a, BoxedWriter>,
}

impl LockedWriter<'_> {
    pub async fn send(&mut self, frame: &Frame) -> Result<(), SendError> {
        let encoded = frame.encode()?;
        self.inner.write_all(&encoded).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

impl fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameWriter").finish_non_exhaustive()
    }
}
