//! Socket tuning for control and relay connections
//!
//! - `TCP_NODELAY` on everything: control frames are tiny and latency bound
//! - TCP keepalive: a silently vanished peer is detected without traffic
//! - Larger buffers on relay sockets only, where sustained throughput matters

use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

const RELAY_BUFFER_SIZE: usize = 512 * 1024;
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRole {
    /// Agent control channel
    Control,
    /// Public client, dialled-back relay or target service
    Relay,
}

pub fn configure_socket(stream: &TcpStream, role: SocketRole) -> io::Result<()> {
    stream.set_nodelay(true)?;

    let socket = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_TIME)
        .with_interval(KEEPALIVE_INTERVAL);
    socket.set_tcp_keepalive(&keepalive)?;

    if role == SocketRole::Relay {
        socket.set_recv_buffer_size(RELAY_BUFFER_SIZE)?;
        socket.set_send_buffer_size(RELAY_BUFFER_SIZE)?;
    }
    Ok(())
}

/// Best effort: a socket that refuses an option still works.
pub fn configure_socket_silent(stream: &TcpStream, role: SocketRole) {
    if let Err(e) = configure_socket(stream, role) {
        tracing::debug!(?role, "Socket tuning failed: {}", e);
    }
}
