use crate::*;

use bytes::Bytes;
use tandem_core::message::{FileChunkPayload, FileMetaPayload, Inbound, ProgressPayload, WireProfile};
use tandem_core::wire::{MessageType, DEFAULT_MAX_FRAME_LEN};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// 10000 bytes in 4096-byte chunks: three chunks, one completion, after the
/// third chunk, byte-identical on the receiving side.
#[tokio::test]
async fn test_file_transfer_through_relay() -> Result<()> {
    let relay = TestRelay::start(RelaySettings::default()).await?;
    let dir = scratch_dir("transfer");
    std::fs::create_dir_all(&dir)?;
    let source = pattern(10_000);
    let path = dir.join("report.bin");
    std::fs::write(&path, &source)?;

    let (alice, mut alice_events) = relay.client("alice", dir.join("alice-dl")).await?;
    let (bob, mut bob_events) = relay.client("bob", dir.join("bob-dl")).await?;
    assert!(matches!(next_event(&mut bob_events).await, ClientEvent::PeerJoined { .. }));
    assert!(matches!(next_event(&mut alice_events).await, ClientEvent::PeerJoined { .. }));

    let state = alice.send_file(&path).await?;
    assert!(state.done);

    let mut received = Vec::new();
    let mut completions = 0;
    let mut saved = None;
    loop {
        match next_event(&mut bob_events).await {
            ClientEvent::FileStarted { name, size, sender } => {
                assert_eq!(name, "report.bin");
                assert_eq!(size, 10_000);
                assert_eq!(sender, "alice");
            }
            ClientEvent::FileProgress { received: r, .. } => received.push(r),
            ClientEvent::FileCompleted {
                name,
                saved_location,
            } => {
                assert_eq!(name, "report.bin");
                completions += 1;
                saved = Some(saved_location);
            }
            ClientEvent::RemoteProgress {
                sender,
                received,
                total,
            } => {
                // Sent after the last chunk, so the transfer is complete.
                assert_eq!(sender, "alice");
                assert_eq!((received, total), (10_000, 10_000));
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    assert_eq!(received, vec![4096, 8192]);
    assert_eq!(completions, 1);
    let saved = saved.context("no completion")?;
    assert_eq!(std::fs::read(&saved)?, source);
    assert_eq!(PathBuf::from(saved), dir.join("bob-dl").join("report.bin"));

    // The sender does not receive its own file.
    let mut sender_side = Vec::new();
    while let Ok(event) = alice_events.try_recv() {
        sender_side.push(event);
    }
    assert!(sender_side
        .iter()
        .all(|e| matches!(e, ClientEvent::SendProgress { .. } | ClientEvent::FileSent { .. })));

    alice.close().await;
    bob.close().await;
    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

/// A chunk size as large as the frame limit is shrunk on the way out, so
/// the relay keeps the sender and the receiver completes.
#[tokio::test]
async fn test_chunk_size_at_frame_limit_still_delivers() -> Result<()> {
    let relay = TestRelay::start(RelaySettings::default()).await?;
    let dir = scratch_dir("chunk-limit");
    std::fs::create_dir_all(&dir)?;
    let source = pattern(2 * 1024 * 1024);
    let path = dir.join("big.bin");
    std::fs::write(&path, &source)?;

    let settings = ClientSettings {
        download_dir: dir.join("alice-dl"),
        chunk_size: DEFAULT_MAX_FRAME_LEN as usize,
        ..ClientSettings::default()
    };
    let (alice, _alice_events) = relay.client_with("alice", settings).await?;
    let (bob, mut bob_events) = relay.client("bob", dir.join("bob-dl")).await?;
    assert!(matches!(next_event(&mut bob_events).await, ClientEvent::PeerJoined { .. }));

    alice.send_file(&path).await?;

    let saved = loop {
        match next_event(&mut bob_events).await {
            ClientEvent::FileCompleted { saved_location, .. } => break saved_location,
            ClientEvent::FileStarted { .. } | ClientEvent::FileProgress { .. } => {}
            ClientEvent::RemoteProgress { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    };
    assert_eq!(std::fs::read(&saved)?, source);
    assert_eq!(relay.relay.registry().len(), 2);

    alice.close().await;
    bob.close().await;
    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

/// The relay passes file frames through without reassembling or
/// re-validating them.
#[tokio::test]
async fn test_file_frames_forwarded_verbatim() -> Result<()> {
    let relay = TestRelay::start(RelaySettings::default()).await?;
    let mut alice = relay.raw_login("alice").await?;
    let mut bob = relay.raw_login("bob").await?;
    bob.recv().await;
    alice.recv().await;

    let profile = WireProfile::Legacy;
    let frames = [
        FileMetaPayload {
            sender_name: "alice".into(),
            file_name: "x.txt".into(),
            file_size: 5,
        }
        .to_frame(profile)?,
        FileChunkPayload {
            sender_name: "alice".into(),
            file_name: "x.txt".into(),
            offset: 0,
            data: Bytes::from_static(b"hello"),
        }
        .to_frame(profile)?,
        ProgressPayload {
            sender_name: "alice".into(),
            total_size: 5,
            received_size: 5,
        }
        .to_frame(profile)?,
    ];

    for frame in &frames {
        alice.send(frame.clone()).await?;
    }
    for frame in &frames {
        assert_eq!(&bob.recv().await, frame);
    }
    Ok(())
}

/// With stamping on, the relay overwrites the claimed sender.
#[tokio::test]
async fn test_stamped_file_sender() -> Result<()> {
    let relay = TestRelay::start(RelaySettings {
        stamp_file_sender: true,
        ..RelaySettings::default()
    })
    .await?;
    let mut alice = relay.raw_login("alice").await?;
    let mut bob = relay.raw_login("bob").await?;
    bob.recv().await;
    alice.recv().await;

    let spoofed = FileMetaPayload {
        sender_name: "mallory".into(),
        file_name: "x.txt".into(),
        file_size: 1,
    };
    alice.send(spoofed.to_frame(WireProfile::Legacy)?).await?;

    let forwarded = bob.recv().await;
    assert_eq!(forwarded.kind, MessageType::FileMeta);
    match Inbound::from_frame(&forwarded, WireProfile::Legacy)? {
        Inbound::FileMeta(meta) => {
            assert_eq!(meta.sender_name, "alice");
            assert_eq!(meta.file_name, "x.txt");
        }
        other => panic!("expected file meta, got {other:?}"),
    }
    Ok(())
}

/// A stray chunk is dropped by the receiver without disturbing a transfer
/// already in flight.
#[tokio::test]
async fn test_stray_chunk_does_not_break_transfer() -> Result<()> {
    let relay = TestRelay::start(RelaySettings::default()).await?;
    let dir = scratch_dir("stray");

    let alice = relay.raw_login("alice").await?;
    let (bob, mut bob_events) = relay.client("bob", dir.clone()).await?;
    assert!(matches!(next_event(&mut bob_events).await, ClientEvent::PeerJoined { .. }));

    let profile = WireProfile::Legacy;
    let chunk = |name: &str, offset: u64, data: &'static [u8]| FileChunkPayload {
        sender_name: "alice".into(),
        file_name: name.into(),
        offset,
        data: Bytes::from_static(data),
    };

    alice
        .send(
            FileMetaPayload {
                sender_name: "alice".into(),
                file_name: "a.txt".into(),
                file_size: 4,
            }
            .to_frame(profile)?,
        )
        .await?;
    alice.send(chunk("a.txt", 0, b"ab").to_frame(profile)?).await?;
    alice.send(chunk("ghost.txt", 0, b"zz").to_frame(profile)?).await?;
    alice.send(chunk("a.txt", 2, b"cd").to_frame(profile)?).await?;

    assert!(matches!(next_event(&mut bob_events).await, ClientEvent::FileStarted { .. }));
    assert!(matches!(next_event(&mut bob_events).await, ClientEvent::FileProgress { received: 2, .. }));
    assert!(matches!(next_event(&mut bob_events).await, ClientEvent::Notice { .. }));
    let ClientEvent::FileCompleted { saved_location, .. } = next_event(&mut bob_events).await else {
        panic!("expected completion");
    };
    assert_eq!(std::fs::read(saved_location)?, b"abcd");

    bob.close().await;
    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
