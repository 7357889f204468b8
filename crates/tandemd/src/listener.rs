//! Listening socket for the relay.

use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;

const BACKLOG: i32 = 128;

/// Resolve `bind_addr:port` and open a non-blocking TCP listener on it.
pub fn bind(bind_addr: &str, port: u16) -> Result<TcpListener> {
    let addr: SocketAddr = (bind_addr, port)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {bind_addr}"))?
        .next()
        .with_context(|| format!("no address for {bind_addr}"))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    #[cfg(unix)]
    socket.set_reuse_port(true).context("SO_REUSEPORT")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    socket
        .bind(&addr.into())
        .with_context(|| format!("bind({addr})"))?;
    socket.listen(BACKLOG).context("listen()")?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).context("register listener with runtime")
}
