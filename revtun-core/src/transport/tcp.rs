//! Plain TCP listeners and dialers

use super::socket_tuning::{configure_socket_silent, SocketRole};
use revtun_common::{Result, TunnelError};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

pub struct TcpTransport;

impl TcpTransport {
    /// Bind a listener. Failing to bind is reported with the address.
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
        TcpListener::bind(addr).await.map_err(|e| {
            TunnelError::Io(io::Error::new(e.kind(), format!("bind {addr}: {e}")))
        })
    }

    pub async fn accept(listener: &TcpListener, role: SocketRole) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = listener.accept().await?;
        configure_socket_silent(&stream, role);
        Ok((stream, peer))
    }

    /// Dial `addr` (`host:port`, resolved if needed) within `limit`.
    pub async fn connect(addr: &str, role: SocketRole, limit: Duration) -> Result<TcpStream> {
        let stream = tokio::time::timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| TunnelError::Timeout(format!("connect {addr} after {limit:?}")))??;
        configure_socket_silent(&stream, role);
        Ok(stream)
    }

    pub async fn connect_addr(
        addr: SocketAddr,
        role: SocketRole,
        limit: Duration,
    ) -> Result<TcpStream> {
        let stream = tokio::time::timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| TunnelError::Timeout(format!("connect {addr} after {limit:?}")))??;
        configure_socket_silent(&stream, role);
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_conflict_is_error() {
        let first = TcpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = first.local_addr().unwrap();
        let err = TcpTransport::bind(addr).await.unwrap_err();
        assert!(err.to_string().contains(&addr.to_string()));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result =
            TcpTransport::connect_addr(addr, SocketRole::Relay, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
