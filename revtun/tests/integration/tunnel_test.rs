//! End-to-end tunnel tests: join, build, relay

use super::{
    echo_through, free_addr, request_tunnel, start_agent, start_echo_server, start_hub,
    test_timeouts, wait_for_agents, wait_for_server,
};
use revtun::BuildTunnelRequest;
use std::time::Duration;

#[tokio::test]
async fn test_echo_through_tunnel() {
    let (mut hub, info) = start_hub().await;
    let handle = hub.handle().unwrap();
    let echo = start_echo_server().await;
    let mut agent = start_agent("edge1", &info);
    assert!(wait_for_agents(&handle, &["edge1"], Duration::from_secs(5)).await);

    let public = free_addr();
    assert_eq!(
        request_tunnel(&info, public, echo, "edge1").await,
        reqwest::StatusCode::OK
    );
    assert!(wait_for_server(public, Duration::from_secs(5)).await);

    assert_eq!(echo_through(public, b"ping").await, b"ping");

    agent.shutdown().await.unwrap();
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_build_through_handle() {
    let (mut hub, info) = start_hub().await;
    let handle = hub.handle().unwrap();
    let echo = start_echo_server().await;
    let mut agent = start_agent("edge1", &info);
    assert!(wait_for_agents(&handle, &["edge1"], Duration::from_secs(5)).await);

    let public = free_addr();
    let request =
        BuildTunnelRequest::parse(&public.to_string(), &echo.to_string(), "edge1").unwrap();
    assert!(handle.build_tunnel(request).await);
    assert!(wait_for_server(public, Duration::from_secs(5)).await);

    // Large enough to need several reads on both legs
    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    assert_eq!(echo_through(public, &payload).await, payload);

    agent.shutdown().await.unwrap();
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_heartbeats_keep_session_alive() {
    let (mut hub, info) = start_hub().await;
    let handle = hub.handle().unwrap();
    let mut agent = start_agent("edge1", &info);
    assert!(wait_for_agents(&handle, &["edge1"], Duration::from_secs(5)).await);

    // Several network timeouts with no traffic other than heartbeats
    tokio::time::sleep(test_timeouts().network * 2).await;
    assert_eq!(handle.agents().await.unwrap(), vec!["edge1".to_string()]);

    agent.shutdown().await.unwrap();
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_agents_join_and_leave_independently() {
    let (mut hub, info) = start_hub().await;
    let handle = hub.handle().unwrap();
    let mut agent = start_agent("edge1", &info);
    assert!(wait_for_agents(&handle, &["edge1"], Duration::from_secs(5)).await);

    // A second agent under a different name coexists with the first.
    let mut other = start_agent("edge2", &info);
    assert!(wait_for_agents(&handle, &["edge1", "edge2"], Duration::from_secs(5)).await);

    other.shutdown().await.unwrap();
    assert!(wait_for_agents(&handle, &["edge1"], Duration::from_secs(5)).await);

    agent.shutdown().await.unwrap();
    hub.shutdown().await.unwrap();
}
