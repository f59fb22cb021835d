//! Many clients through one tunnel, many agents on one hub

use super::{
    echo_through, free_addr, request_tunnel, start_agent, start_echo_server, start_hub,
    wait_for_agents, wait_for_server,
};
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_clients() {
    let (mut hub, info) = start_hub().await;
    let handle = hub.handle().unwrap();
    let echo = start_echo_server().await;
    let mut agent = start_agent("edge1", &info);
    assert!(wait_for_agents(&handle, &["edge1"], Duration::from_secs(5)).await);

    let public = free_addr();
    request_tunnel(&info, public, echo, "edge1").await;
    assert!(wait_for_server(public, Duration::from_secs(5)).await);

    let mut clients = Vec::new();
    for i in 0..32 {
        clients.push(tokio::spawn(async move {
            let payload = format!("client-{i}").into_bytes();
            let echoed = echo_through(public, &payload).await;
            assert_eq!(echoed, payload);
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    agent.shutdown().await.unwrap();
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_tunnels_per_agent_are_independent() {
    let (mut hub, info) = start_hub().await;
    let handle = hub.handle().unwrap();
    let echo = start_echo_server().await;
    let mut first = start_agent("edge1", &info);
    let mut second = start_agent("edge2", &info);
    assert!(wait_for_agents(&handle, &["edge1", "edge2"], Duration::from_secs(5)).await);

    let first_public = free_addr();
    let second_public = free_addr();
    request_tunnel(&info, first_public, echo, "edge1").await;
    request_tunnel(&info, second_public, echo, "edge2").await;
    assert!(wait_for_server(first_public, Duration::from_secs(5)).await);
    assert!(wait_for_server(second_public, Duration::from_secs(5)).await);

    first.shutdown().await.unwrap();
    assert!(wait_for_agents(&handle, &["edge2"], Duration::from_secs(5)).await);
    assert_eq!(echo_through(second_public, b"alive").await, b"alive");

    second.shutdown().await.unwrap();
    hub.shutdown().await.unwrap();
}
