//! Tandem integration test harness.
//!
//! Every test starts its own relay on 127.0.0.1:0 inside the test runtime
//! and talks to it over real TCP, either with raw frames or through
//! [`RelayClient`]. No external processes or privileges are needed:
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use tandem_core::message::LoginPayload;
use tandem_core::wire::{Frame, DEFAULT_MAX_FRAME_LEN};
use tandem_services::{ClientEvent, ClientSettings, EventStream, FrameReader, FrameWriter, Relay, RelaySettings};

mod failures;
mod files;
mod messaging;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A relay running in the background of one test.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub relay: Relay,
    shutdown: broadcast::Sender<()>,
}

impl TestRelay {
    pub async fn start(settings: RelaySettings) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind test relay")?;
        let addr = listener.local_addr()?;
        let relay = Relay::new(settings);
        let (shutdown, _) = broadcast::channel(1);

        let rx = shutdown.subscribe();
        let serving = relay.clone();
        tokio::spawn(async move {
            if let Err(e) = serving.run(listener, rx).await {
                eprintln!("test relay exited: {e:#}");
            }
        });

        Ok(Self {
            addr,
            relay,
            shutdown,
        })
    }

    /// Block until exactly `n` clients are logged in.
    pub async fn wait_for_online(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        while self.relay.registry().len() != n {
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "expected {n} clients online, have {:?}",
                    self.relay.registry().names()
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Connect and log in without the client library, waiting until the
    /// relay has registered the new connection.
    pub async fn raw_login(&self, name: &str) -> Result<RawClient> {
        let online = self.relay.registry().len();
        let client = RawClient::connect(self.addr).await?;
        client
            .send(LoginPayload::new(name)?.to_frame())
            .await?;
        self.wait_for_online(online + 1).await;
        Ok(client)
    }

    /// Log in through [`tandem_services::RelayClient`].
    pub async fn client(
        &self,
        name: &str,
        download_dir: PathBuf,
    ) -> Result<(tandem_services::RelayClient, EventStream)> {
        let settings = ClientSettings {
            download_dir,
            ..ClientSettings::default()
        };
        self.client_with(name, settings).await
    }

    pub async fn client_with(
        &self,
        name: &str,
        settings: ClientSettings,
    ) -> Result<(tandem_services::RelayClient, EventStream)> {
        let online = self.relay.registry().len();
        let session =
            tandem_services::RelayClient::connect(&self.addr.to_string(), name, settings).await?;
        self.wait_for_online(online + 1).await;
        Ok(session)
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// A client speaking raw frames.
pub struct RawClient {
    pub reader: FrameReader<OwnedReadHalf>,
    pub writer: FrameWriter,
}

impl RawClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.context("connect to relay")?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(read_half, DEFAULT_MAX_FRAME_LEN),
            writer: FrameWriter::new(write_half),
        })
    }

    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.writer.send(&frame).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Frame {
        tokio::time::timeout(TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for frame")
            .expect("read failed")
            .expect("relay closed the connection")
    }

    /// Next frame body as text.
    pub async fn recv_text(&mut self) -> String {
        let frame = self.recv().await;
        String::from_utf8(frame.body.to_vec()).expect("frame body is not UTF-8")
    }

    /// Assert the relay closes this connection.
    pub async fn expect_closed(&mut self) {
        let next = tokio::time::timeout(TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for close");
        match next {
            Ok(None) | Err(_) => {}
            Ok(Some(frame)) => panic!("expected close, got {frame:?}"),
        }
    }
}

pub async fn next_event(events: &mut EventStream) -> ClientEvent {
    tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

/// Fresh scratch directory for one test.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tandem-it-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}
