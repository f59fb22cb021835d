#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for revtun
//!
//! Every test runs a real hub and real agents over loopback sockets.

mod concurrent_test;
mod error_test;
mod tunnel_test;

use revtun::config::Timeouts;
use revtun::{Agent, Hub, HubHandle, HubInfo};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

static NEXT_PORT: std::sync::atomic::AtomicU16 = std::sync::atomic::AtomicU16::new(31000);

pub fn get_free_port() -> u16 {
    use std::sync::atomic::Ordering;
    loop {
        let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
        if std::net::TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return port;
        }
    }
}

/// A loopback address nothing listens on yet
pub fn free_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], get_free_port()))
}

fn any_port() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short deadlines so failure paths finish quickly
pub fn test_timeouts() -> Timeouts {
    Timeouts {
        network: Duration::from_secs(2),
        heartbeat: Duration::from_millis(300),
        drain: Duration::from_millis(500),
        pending_ack: Duration::from_secs(3),
    }
}

pub async fn start_hub() -> (Hub, HubInfo) {
    init_tracing();
    let mut hub = Hub::builder()
        .control_bind(any_port())
        .tunnel_bind(any_port())
        .api_bind(any_port())
        .timeouts(test_timeouts())
        .build()
        .expect("Failed to build hub");
    let info = hub.start().await.expect("Failed to start hub");
    (hub, info)
}

pub fn start_agent(name: &str, hub: &HubInfo) -> Agent {
    let mut agent = Agent::builder(name)
        .hub_addr(hub.control_addr.to_string())
        .retry_interval(Duration::from_millis(100))
        .timeouts(test_timeouts())
        .build()
        .expect("Failed to build agent");
    agent.start().expect("Failed to start agent");
    agent
}

/// Poll the registry until it lists exactly `expected`.
pub async fn wait_for_agents(hub: &HubHandle, expected: &[&str], timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if let Ok(names) = hub.agents().await {
            if names == expected {
                return true;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Wait for a server to start listening
pub async fn wait_for_server(addr: SocketAddr, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(addr).await.is_ok() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Wait until nothing accepts on `addr`
pub async fn wait_for_closed(addr: SocketAddr, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(addr).await.is_err() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Start a TCP echo server on an ephemeral port
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind(any_port())
        .await
        .expect("Failed to bind echo server");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    if socket.write_all(&buf[..n]).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    addr
}

/// Send `payload` through `public_addr` and read the same number of bytes back.
pub async fn echo_through(public_addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(public_addr)
        .await
        .expect("Failed to connect to tunnel");
    client.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf))
        .await
        .expect("Timed out waiting for echo")
        .unwrap();
    buf
}

/// POST /tunnel on the hub API
pub async fn request_tunnel(
    hub: &HubInfo,
    public_addr: SocketAddr,
    target: SocketAddr,
    agent: &str,
) -> reqwest::StatusCode {
    let api = hub.api_addr.expect("API disabled");
    reqwest::Client::new()
        .post(format!("http://{api}/tunnel"))
        .json(&serde_json::json!({
            "m_addr": public_addr.to_string(),
            "s_addr": target.to_string(),
            "s_name": agent,
        }))
        .send()
        .await
        .expect("Failed to send build request")
        .status()
}
