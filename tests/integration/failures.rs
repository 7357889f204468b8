use crate::*;

use tandem_core::message::ChatPayload;
use tokio::io::AsyncWriteExt;

/// Type 99 closes the sender's connection and nobody else notices.
#[tokio::test]
async fn test_unknown_type_closes_only_offender() -> Result<()> {
    let relay = TestRelay::start(RelaySettings::default()).await?;
    let mut alice = relay.raw_login("alice").await?;
    let mut bob = relay.raw_login("bob").await?;
    bob.recv().await;
    alice.recv().await;

    alice.writer.send_encoded(&[0, 0, 0, 0, 99]).await?;
    alice.expect_closed().await;
    relay.wait_for_online(1).await;

    // bob keeps working and was not told about the departure.
    let mut carol = relay.raw_login("carol").await?;
    assert_eq!(carol.recv_text().await, "bob connected");
    assert_eq!(bob.recv_text().await, "carol connected");
    carol.send(ChatPayload::request_frame("still there?")?).await?;
    assert_eq!(bob.recv_text().await, "carol: still there?");
    Ok(())
}

/// Anything but Login on a fresh connection is a violation.
#[tokio::test]
async fn test_chat_before_login_closes() -> Result<()> {
    let relay = TestRelay::start(RelaySettings::default()).await?;
    let mut bob = relay.raw_login("bob").await?;

    let mut eve = RawClient::connect(relay.addr).await?;
    eve.send(ChatPayload::request_frame("who's here?")?).await?;
    eve.expect_closed().await;

    assert_eq!(relay.relay.registry().names(), vec!["bob"]);

    // bob saw nothing from eve.
    let mut dave = relay.raw_login("dave").await?;
    assert_eq!(bob.recv_text().await, "dave connected");
    assert_eq!(dave.recv_text().await, "bob connected");
    Ok(())
}

/// A peer that drops mid-frame is unregistered quietly.
#[tokio::test]
async fn test_disconnect_mid_frame() -> Result<()> {
    let relay = TestRelay::start(RelaySettings::default()).await?;
    let mut bob = relay.raw_login("bob").await?;

    let mut stream = TcpStream::connect(relay.addr).await?;
    stream.write_all(&[5, 0, 0, 0, 1, b'a', b'l', b'i', b'c', b'e']).await?;
    relay.wait_for_online(2).await;
    assert_eq!(bob.recv_text().await, "alice connected");

    // Header promises 100 bytes of chat; only 3 arrive.
    stream.write_all(&[100, 0, 0, 0, 2, b'h', b'e', b'y']).await?;
    drop(stream);
    relay.wait_for_online(1).await;
    Ok(())
}

/// Oversized frames are refused before the body is read.
#[tokio::test]
async fn test_oversized_frame_closes() -> Result<()> {
    let relay = TestRelay::start(RelaySettings {
        max_frame_len: 64,
        ..RelaySettings::default()
    })
    .await?;
    let mut alice = relay.raw_login("alice").await?;
    alice.writer.send_encoded(&[0, 1, 0, 0, 2]).await?;
    alice.expect_closed().await;
    relay.wait_for_online(0).await;
    Ok(())
}

/// With departures enabled, remaining peers hear "X disconnected".
#[tokio::test]
async fn test_departure_announcement_when_enabled() -> Result<()> {
    let relay = TestRelay::start(RelaySettings {
        announce_departures: true,
        ..RelaySettings::default()
    })
    .await?;
    let dir = scratch_dir("departures");

    let (alice, mut alice_events) = relay.client("alice", dir.join("a")).await?;
    let (bob, _bob_events) = relay.client("bob", dir.join("b")).await?;
    assert_eq!(
        next_event(&mut alice_events).await,
        ClientEvent::PeerJoined { name: "bob".into() }
    );

    bob.close().await;
    assert_eq!(
        next_event(&mut alice_events).await,
        ClientEvent::PeerLeft { name: "bob".into() }
    );

    alice.close().await;
    assert_eq!(next_event(&mut alice_events).await, ClientEvent::Disconnected);
    Ok(())
}

/// Shutting the relay down ends every session.
#[tokio::test]
async fn test_relay_shutdown_disconnects_clients() -> Result<()> {
    let relay = TestRelay::start(RelaySettings::default()).await?;
    let dir = scratch_dir("shutdown");
    let (_alice, mut events) = relay.client("alice", dir).await?;

    drop(relay);
    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
    Ok(())
}
