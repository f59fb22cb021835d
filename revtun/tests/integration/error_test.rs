//! Failure paths: unknown agents, unreachable targets, duplicate names

use super::{
    free_addr, request_tunnel, start_agent, start_echo_server, start_hub, wait_for_agents,
    wait_for_closed, wait_for_server,
};
use revtun::protocol::codec::{decode_join_ack, expect_command};
use revtun::protocol::{Command, Encode, Join, Reply};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_unknown_agent_opens_no_listener() {
    let (mut hub, info) = start_hub().await;
    let echo = start_echo_server().await;

    let public = free_addr();
    assert_eq!(
        request_tunnel(&info, public, echo, "ghost").await,
        reqwest::StatusCode::OK
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(TcpStream::connect(public).await.is_err());

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_request_is_bad_request() {
    let (mut hub, info) = start_hub().await;
    let api = info.api_addr.unwrap();
    let client = reqwest::Client::new();

    let status = client
        .post(format!("http://{api}/tunnel"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

    let status = client
        .post(format!("http://{api}/tunnel"))
        .json(&serde_json::json!({
            "m_addr": "nowhere",
            "s_addr": "127.0.0.1:22",
            "s_name": "edge1",
        }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

    let index = client
        .get(format!("http://{api}/"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(index, "server running");

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_refused_target_closes_client() {
    let (mut hub, info) = start_hub().await;
    let handle = hub.handle().unwrap();
    let mut agent = start_agent("edge1", &info);
    assert!(wait_for_agents(&handle, &["edge1"], Duration::from_secs(5)).await);

    let dead_target = free_addr();
    let public = free_addr();
    request_tunnel(&info, public, dead_target, "edge1").await;
    assert!(wait_for_server(public, Duration::from_secs(5)).await);

    let mut client = TcpStream::connect(public).await.unwrap();
    let _ = client.write_all(b"hello").await;
    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut buf))
        .await
        .expect("client was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0);

    // The tunnel itself survives a refused connection.
    assert!(TcpStream::connect(public).await.is_ok());

    agent.shutdown().await.unwrap();
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_join_is_rejected() {
    let (mut hub, info) = start_hub().await;
    let handle = hub.handle().unwrap();
    let echo = start_echo_server().await;
    let mut agent = start_agent("edge1", &info);
    assert!(wait_for_agents(&handle, &["edge1"], Duration::from_secs(5)).await);

    let mut impostor = TcpStream::connect(info.control_addr).await.unwrap();
    impostor
        .write_all(&Join::new("edge1").unwrap().encode())
        .await
        .unwrap();
    expect_command(&mut impostor, Command::JoinAck).await.unwrap();
    let ack = decode_join_ack(&mut impostor).await.unwrap();
    assert_eq!(ack.reply, Reply::DuplicateName);

    // The first session is untouched.
    assert_eq!(handle.agents().await.unwrap(), vec!["edge1".to_string()]);
    let public = free_addr();
    request_tunnel(&info, public, echo, "edge1").await;
    assert!(wait_for_server(public, Duration::from_secs(5)).await);
    assert_eq!(super::echo_through(public, b"still here").await, b"still here");

    agent.shutdown().await.unwrap();
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_agent_teardown_closes_its_tunnels() {
    let (mut hub, info) = start_hub().await;
    let handle = hub.handle().unwrap();
    let echo = start_echo_server().await;
    let mut agent = start_agent("edge1", &info);
    assert!(wait_for_agents(&handle, &["edge1"], Duration::from_secs(5)).await);

    let public = free_addr();
    request_tunnel(&info, public, echo, "edge1").await;
    assert!(wait_for_server(public, Duration::from_secs(5)).await);

    let mut open = TcpStream::connect(public).await.unwrap();
    open.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    open.read_exact(&mut buf).await.unwrap();

    agent.shutdown().await.unwrap();

    assert!(wait_for_agents(&handle, &[], Duration::from_secs(5)).await);
    assert!(wait_for_closed(public, Duration::from_secs(5)).await);
    let mut rest = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), open.read_to_end(&mut rest))
        .await
        .expect("spliced client was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0);

    hub.shutdown().await.unwrap();
}
