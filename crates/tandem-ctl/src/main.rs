//! tandem-ctl: interactive terminal client for a Tandem relay.
//!
//! Every stdin line is sent as chat, except the commands below.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use tandem_core::config::TandemConfig;
use tandem_services::{ClientEvent, ClientSettings, EventStream, RelayClient};

// ── Rendering ─────────────────────────────────────────────────────────────────

fn render(event: &ClientEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("cannot encode event: {e}"),
        }
        return;
    }

    match event {
        ClientEvent::PeerJoined { name } => println!("* {name} connected"),
        ClientEvent::PeerLeft { name } => println!("* {name} disconnected"),
        ClientEvent::ChatReceived { sender, text } if sender.is_empty() => println!("{text}"),
        ClientEvent::ChatReceived { sender, text } => println!("<{sender}> {text}"),
        ClientEvent::FileStarted { name, size, sender } => {
            println!("  ┌─ receiving {name} ({size} bytes) from {sender}")
        }
        ClientEvent::FileProgress { .. } | ClientEvent::SendProgress { .. } => {}
        ClientEvent::FileCompleted {
            name,
            saved_location,
        } => println!("  └─ {name} saved to {saved_location}"),
        ClientEvent::RemoteProgress {
            sender,
            received,
            total,
        } => {
            let percent = if *total == 0 {
                100.0
            } else {
                *received as f64 * 100.0 / *total as f64
            };
            println!("  │  {sender}: {percent:.1}%");
        }
        ClientEvent::FileSent { name, size } => println!("  sent {name} ({size} bytes)"),
        ClientEvent::Notice { message } => println!("! {message}"),
        ClientEvent::Disconnected => println!("* disconnected from relay"),
    }
}

fn print_roster(names: &[String], json: bool) {
    if json {
        println!("{}", serde_json::json!({ "event": "roster", "online": names }));
        return;
    }
    println!("Online users ({})", names.len());
    for name in names {
        println!("  {name}");
    }
}

fn print_usage() {
    println!("Usage: tandem-ctl [--addr <host:port>] [--json] <name>");
    println!();
    println!("Commands (typed at the prompt):");
    println!("  /send <path>   Send a file to everyone online");
    println!("  /who           List who is online");
    println!("  /quit          Leave");
    println!("  anything else  Sent as chat");
    println!();
    println!("Options:");
    println!("  --addr <host:port>   Relay address (default: 127.0.0.1:<configured port>)");
    println!("  --json               Print events as JSON lines");
}

// ── Session ───────────────────────────────────────────────────────────────────

async fn run(client: RelayClient, mut events: EventStream, json: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                render(&event, json);
                if event == ClientEvent::Disconnected {
                    return Ok(());
                }
            }

            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else { break };
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if line == "/who" {
                    print_roster(&client.online(), json);
                    continue;
                }
                if let Some(path) = line.strip_prefix("/send ") {
                    let path = PathBuf::from(path.trim());
                    if let Err(e) = client.send_file(&path).await {
                        eprintln!("send failed: {e}");
                    }
                    continue;
                }
                if let Err(e) = client.send_chat(line).await {
                    eprintln!("{e:#}");
                }
            }
        }
    }

    client.close().await;
    while let Some(event) = events.recv().await {
        render(&event, json);
    }
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = TandemConfig::load().unwrap_or_else(|e| {
        eprintln!("Config error, using defaults: {e}");
        TandemConfig::default()
    });

    let mut addr = format!("127.0.0.1:{}", config.network.port);
    let mut json = false;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" => {
                i += 1;
                addr = args.get(i).context("--addr requires a value")?.clone();
            }
            "--json" => json = true,
            other => remaining.push(other),
        }
        i += 1;
    }

    let name = match remaining.as_slice() {
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            return Ok(());
        }
        [name] => name.to_string(),
        other => {
            eprintln!("Unexpected arguments: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    let (client, events) = RelayClient::connect(&addr, &name, ClientSettings::from_config(&config))
        .await
        .with_context(|| format!("failed to join {addr}; is tandemd running?"))?;
    if !json {
        println!("Joined {addr} as {name}. /send <path> to share a file, /quit to leave.");
    }

    run(client, events, json).await
}
