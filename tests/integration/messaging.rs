use crate::*;

use tandem_core::message::ChatPayload;
use tandem_core::wire::MessageType;

/// alice, then bob: bob's snapshot names alice, alice hears about bob.
#[tokio::test]
async fn test_login_snapshot_and_announcement() -> Result<()> {
    let relay = TestRelay::start(RelaySettings::default()).await?;

    let mut alice = relay.raw_login("alice").await?;
    let mut bob = relay.raw_login("bob").await?;

    let replay = bob.recv().await;
    assert_eq!(replay.kind, MessageType::Login);
    assert_eq!(&replay.body[..], b"alice connected");

    let announce = alice.recv().await;
    assert_eq!(announce.kind, MessageType::Login);
    assert_eq!(&announce.body[..], b"bob connected");
    Ok(())
}

/// A chat line reaches every other client stamped with the sender's name,
/// and never comes back to the sender.
#[tokio::test]
async fn test_chat_fan_out_excludes_sender() -> Result<()> {
    let relay = TestRelay::start(RelaySettings::default()).await?;

    let mut alice = relay.raw_login("alice").await?;
    let mut bob = relay.raw_login("bob").await?;
    let mut carol = relay.raw_login("carol").await?;

    // Drain join traffic: alice hears bob and carol, bob hears alice then
    // carol, carol hears alice and bob.
    for _ in 0..2 {
        alice.recv().await;
        bob.recv().await;
        carol.recv().await;
    }

    alice.send(ChatPayload::request_frame("hi")?).await?;
    for peer in [&mut bob, &mut carol] {
        let chat = peer.recv().await;
        assert_eq!(chat.kind, MessageType::Chat);
        assert_eq!(&chat.body[..], b"alice: hi");
    }

    // The next thing alice sees is bob's line, not her own.
    bob.send(ChatPayload::request_frame("hello alice")?).await?;
    assert_eq!(alice.recv_text().await, "bob: hello alice");
    assert_eq!(carol.recv_text().await, "bob: hello alice");
    Ok(())
}

/// For N sequential logins, each joiner's snapshot is exactly the earlier
/// names and each earlier member hears exactly one announcement per joiner.
#[tokio::test]
async fn test_sequential_logins_snapshot_property() -> Result<()> {
    const N: usize = 6;
    let relay = TestRelay::start(RelaySettings::default()).await?;
    let names: Vec<String> = (0..N).map(|i| format!("user{i}")).collect();

    let mut clients = Vec::new();
    for name in &names {
        clients.push(relay.raw_login(name).await?);
    }

    for (i, client) in clients.iter_mut().enumerate() {
        let mut heard = Vec::new();
        for _ in 0..N - 1 {
            heard.push(client.recv_text().await);
        }

        // The replay and later announcements may interleave, but each keeps
        // its own order.
        let earlier: Vec<String> = names[..i].iter().map(|n| format!("{n} connected")).collect();
        let later: Vec<String> = names[i + 1..]
            .iter()
            .map(|n| format!("{n} connected"))
            .collect();
        let seen_earlier: Vec<String> = heard.iter().filter(|t| earlier.contains(t)).cloned().collect();
        let seen_later: Vec<String> = heard.iter().filter(|t| later.contains(t)).cloned().collect();
        assert_eq!(seen_earlier, earlier, "snapshot seen by {}", names[i]);
        assert_eq!(seen_later, later, "announcements seen by {}", names[i]);
    }

    // Nothing extra is queued: the next frame everyone sees is this chat.
    let (last, others) = clients.split_last_mut().context("no clients")?;
    last.send(ChatPayload::request_frame("done")?).await?;
    for client in others {
        assert_eq!(client.recv_text().await, format!("{}: done", names[N - 1]));
    }
    Ok(())
}

/// Concurrent logins still give every pair exactly one introduction.
#[tokio::test]
async fn test_concurrent_logins_introduce_each_pair_once() -> Result<()> {
    const N: usize = 8;
    let relay = TestRelay::start(RelaySettings::default()).await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let addr = relay.addr;
        handles.push(tokio::spawn(async move {
            let client = RawClient::connect(addr).await?;
            client
                .send(LoginPayload::new(format!("c{i}"))?.to_frame())
                .await?;
            anyhow::Ok(client)
        }));
    }
    let mut clients = Vec::new();
    for h in handles {
        clients.push(h.await??);
    }
    relay.wait_for_online(N).await;

    // Every client learns about each of the other N-1 exactly once, either
    // from its snapshot or from an announcement.
    for (i, client) in clients.iter_mut().enumerate() {
        let mut heard = Vec::new();
        for _ in 0..N - 1 {
            heard.push(client.recv_text().await);
        }
        heard.sort();
        let mut expected: Vec<String> = (0..N)
            .filter(|j| *j != i)
            .map(|j| format!("c{j} connected"))
            .collect();
        expected.sort();
        assert_eq!(heard, expected);
    }
    Ok(())
}

/// Duplicate display names are allowed.
#[tokio::test]
async fn test_duplicate_names_coexist() -> Result<()> {
    let relay = TestRelay::start(RelaySettings::default()).await?;

    let mut first = relay.raw_login("sam").await?;
    let mut second = relay.raw_login("sam").await?;
    assert_eq!(second.recv_text().await, "sam connected");
    assert_eq!(first.recv_text().await, "sam connected");
    assert_eq!(relay.relay.registry().names(), vec!["sam", "sam"]);

    second.send(ChatPayload::request_frame("echo?")?).await?;
    assert_eq!(first.recv_text().await, "sam: echo?");
    Ok(())
}

/// Client-library view of the same exchange.
#[tokio::test]
async fn test_client_events_for_chat() -> Result<()> {
    let relay = TestRelay::start(RelaySettings::default()).await?;
    let dir = scratch_dir("chat-events");

    let (alice, mut alice_events) = relay.client("alice", dir.join("alice")).await?;
    let (bob, mut bob_events) = relay.client("bob", dir.join("bob")).await?;

    assert_eq!(
        next_event(&mut bob_events).await,
        ClientEvent::PeerJoined {
            name: "alice".into()
        }
    );
    assert_eq!(
        next_event(&mut alice_events).await,
        ClientEvent::PeerJoined { name: "bob".into() }
    );
    assert_eq!(alice.online(), vec!["bob"]);
    assert_eq!(bob.online(), vec!["alice"]);

    alice.send_chat("hi").await?;
    assert_eq!(
        next_event(&mut bob_events).await,
        ClientEvent::ChatReceived {
            sender: "alice".into(),
            text: "hi".into()
        }
    );

    alice.close().await;
    bob.close().await;
    Ok(())
}
