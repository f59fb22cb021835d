use super::agent::{AgentHandle, AgentSession};
use super::SessionOptions;
use crate::mailbox::{mailbox, Mailbox, MailboxSender};
use crate::transport::{SocketRole, TcpTransport};
use revtun_common::{HubConfig, Result, TunnelError};
use revtun_protocol::codec::{decode_build_tunnel_ack, decode_join, expect_command};
use revtun_protocol::{Address, BuildTunnelAck, Command, Encode, JoinAck, Reply};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Expose `target_addr` on `public_addr` through the agent named `agent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTunnelRequest {
    pub public_addr: SocketAddr,
    pub target_addr: Address,
    pub agent: String,
}

impl BuildTunnelRequest {
    /// Parse the textual form used by the HTTP API.
    pub fn parse(public_addr: &str, target_addr: &str, agent: &str) -> Result<Self> {
        let public_addr = public_addr
            .parse()
            .map_err(|_| TunnelError::Config(format!("invalid public address '{public_addr}'")))?;
        let target_addr = Address::parse(target_addr)?;
        if agent.is_empty() {
            return Err(TunnelError::Config("agent name is required".into()));
        }
        Ok(Self {
            public_addr,
            target_addr,
            agent: agent.to_string(),
        })
    }
}

#[derive(Debug)]
pub enum HubEvent {
    /// A control connection completed its JOIN read
    Join {
        name: String,
        stream: TcpStream,
        peer: SocketAddr,
    },
    /// A relay connection completed its BUILD_TUNNEL_ACK read
    TunnelAck {
        ack: BuildTunnelAck,
        stream: TcpStream,
    },
    BuildTunnel(BuildTunnelRequest),
    AgentLeft {
        name: String,
        session_id: u64,
    },
    ListAgents(oneshot::Sender<Vec<String>>),
    Shutdown,
}

/// Cloneable entry point into a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: MailboxSender<HubEvent>,
}

impl HubHandle {
    /// Queue a build request. `true` means the hub accepted it, not that the
    /// tunnel exists: unknown agents are dropped inside the hub.
    pub async fn build_tunnel(&self, request: BuildTunnelRequest) -> bool {
        self.tx.send(HubEvent::BuildTunnel(request)).await
    }

    /// Names of the currently registered agents, sorted.
    pub async fn agents(&self) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        if !self.tx.send(HubEvent::ListAgents(reply)).await {
            return Err(TunnelError::InvalidState("hub is not running".into()));
        }
        rx.await
            .map_err(|_| TunnelError::InvalidState("hub stopped before replying".into()))
    }

    pub fn shutdown(&self) -> bool {
        self.tx.try_send(HubEvent::Shutdown)
    }
}

pub struct HubServer {
    control: TcpListener,
    relay: TcpListener,
    opts: SessionOptions,
    mailbox: Mailbox<HubEvent>,
    tx: MailboxSender<HubEvent>,
}

impl HubServer {
    /// Validate `config` and bind the control and relay listeners.
    pub async fn bind(config: HubConfig) -> Result<Self> {
        config.validate()?;
        let control = TcpTransport::bind(config.control_addr).await?;
        let relay = TcpTransport::bind(config.tunnel_addr).await?;

        let relay_addr = match config.advertise_addr {
            Some(addr) => addr,
            None => relay.local_addr()?,
        };
        let (tx, mailbox) = mailbox("hub");

        Ok(Self {
            control,
            relay,
            opts: SessionOptions {
                timeouts: config.timeouts,
                relay_addr: Address::from(relay_addr),
                idle_timeout: config.splice_idle_timeout,
            },
            mailbox,
            tx,
        })
    }

    pub fn control_addr(&self) -> Result<SocketAddr> {
        Ok(self.control.local_addr()?)
    }

    pub fn tunnel_addr(&self) -> Result<SocketAddr> {
        Ok(self.relay.local_addr()?)
    }

    /// Relay address advertised to agents.
    pub fn relay_addr(&self) -> Address {
        self.opts.relay_addr
    }

    pub fn handle(&self) -> HubHandle {
        HubHandle {
            tx: self.tx.clone(),
        }
    }

    /// Drive the registry until [`HubHandle::shutdown`].
    pub async fn run(self) -> Result<()> {
        let Self {
            control,
            relay,
            opts,
            mut mailbox,
            tx,
        } = self;

        info!(
            control = %control.local_addr()?,
            tunnel = %relay.local_addr()?,
            advertise = %opts.relay_addr,
            "Hub listening"
        );

        let network = opts.timeouts.network;
        let join_loop = tokio::spawn(accept_joins(control, tx.clone(), network));
        let ack_loop = tokio::spawn(accept_acks(relay, tx.clone(), network));

        let mut registry = Registry::new(tx, opts);
        while let Some(event) = mailbox.recv().await {
            match event {
                HubEvent::Join { name, stream, peer } => registry.join(name, stream, peer),
                HubEvent::TunnelAck { ack, stream } => registry.route_ack(ack, stream).await,
                HubEvent::BuildTunnel(request) => registry.build_tunnel(request).await,
                HubEvent::AgentLeft { name, session_id } => registry.leave(&name, session_id),
                HubEvent::ListAgents(reply) => {
                    let _ = reply.send(registry.names());
                }
                HubEvent::Shutdown => break,
            }
        }

        info!("Hub shutting down");
        join_loop.abort();
        ack_loop.abort();
        registry.shutdown();
        mailbox.drain(opts.timeouts.drain).await;
        Ok(())
    }
}

/// Agent registry. Only the hub loop touches it.
struct Registry {
    agents: HashMap<String, AgentHandle>,
    next_session: u64,
    hub: MailboxSender<HubEvent>,
    opts: SessionOptions,
}

impl Registry {
    fn new(hub: MailboxSender<HubEvent>, opts: SessionOptions) -> Self {
        Self {
            agents: HashMap::new(),
            next_session: 0,
            hub,
            opts,
        }
    }

    fn join(&mut self, name: String, stream: TcpStream, peer: SocketAddr) {
        if self.agents.contains_key(&name) {
            warn!(agent = %name, %peer, "Rejecting duplicate agent name");
            record_join("duplicate");
            tokio::spawn(reject_join(stream, self.opts.timeouts.network));
            return;
        }

        self.next_session += 1;
        info!(agent = %name, %peer, session = self.next_session, "Agent joined");
        record_join("accepted");
        let handle = AgentSession::spawn(
            name.clone(),
            self.next_session,
            stream,
            self.hub.clone(),
            self.opts,
        );
        self.agents.insert(name, handle);
    }

    async fn route_ack(&self, ack: BuildTunnelAck, stream: TcpStream) {
        match self.agents.get(&ack.name) {
            Some(agent) => {
                agent.route_ack(ack.conn_id, ack.reply, stream).await;
            }
            None => {
                debug!(agent = %ack.name, conn_id = %ack.conn_id, "Ack from unknown agent, closing");
            }
        }
    }

    async fn build_tunnel(&self, request: BuildTunnelRequest) {
        match self.agents.get(&request.agent) {
            Some(agent) => {
                agent
                    .build_tunnel(request.public_addr, request.target_addr)
                    .await;
            }
            None => {
                info!(
                    agent = %request.agent,
                    public_addr = %request.public_addr,
                    "Dropping build request for unknown agent"
                );
            }
        }
    }

    fn leave(&mut self, name: &str, session_id: u64) {
        // A newer session may already hold the name.
        if self
            .agents
            .get(name)
            .is_some_and(|agent| agent.session_id() == session_id)
        {
            self.agents.remove(name);
            info!(agent = %name, "Agent left");
        }
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    fn shutdown(&mut self) {
        for (_, agent) in self.agents.drain() {
            agent.shutdown();
        }
    }
}

async fn accept_joins(listener: TcpListener, hub: MailboxSender<HubEvent>, limit: Duration) {
    loop {
        match TcpTransport::accept(&listener, SocketRole::Control).await {
            Ok((stream, peer)) => {
                let hub = hub.clone();
                tokio::spawn(async move {
                    match read_join(stream, limit).await {
                        Ok((name, stream)) => {
                            hub.send(HubEvent::Join { name, stream, peer }).await;
                        }
                        Err(e) => {
                            warn!(%peer, "JOIN handshake failed: {}", e);
                            record_join("invalid");
                        }
                    }
                });
            }
            Err(e) => error!("Control accept error: {}", e),
        }
    }
}

async fn read_join(mut stream: TcpStream, limit: Duration) -> Result<(String, TcpStream)> {
    let join = tokio::time::timeout(limit, async {
        expect_command(&mut stream, Command::Join).await?;
        decode_join(&mut stream).await
    })
    .await
    .map_err(|_| TunnelError::Timeout(format!("no JOIN within {limit:?}")))??;
    Ok((join.name, stream))
}

async fn reject_join(mut stream: TcpStream, limit: Duration) {
    let reply = JoinAck {
        reply: Reply::DuplicateName,
    }
    .encode();
    let _ = tokio::time::timeout(limit, stream.write_all(&reply)).await;
}

async fn accept_acks(listener: TcpListener, hub: MailboxSender<HubEvent>, limit: Duration) {
    loop {
        match TcpTransport::accept(&listener, SocketRole::Relay).await {
            Ok((stream, peer)) => {
                let hub = hub.clone();
                tokio::spawn(async move {
                    match read_ack(stream, limit).await {
                        Ok((ack, stream)) => {
                            hub.send(HubEvent::TunnelAck { ack, stream }).await;
                        }
                        Err(e) => warn!(%peer, "BUILD_TUNNEL_ACK handshake failed: {}", e),
                    }
                });
            }
            Err(e) => error!("Tunnel accept error: {}", e),
        }
    }
}

async fn read_ack(mut stream: TcpStream, limit: Duration) -> Result<(BuildTunnelAck, TcpStream)> {
    let ack = tokio::time::timeout(limit, async {
        expect_command(&mut stream, Command::BuildTunnelAck).await?;
        decode_build_tunnel_ack(&mut stream).await
    })
    .await
    .map_err(|_| TunnelError::Timeout(format!("no BUILD_TUNNEL_ACK within {limit:?}")))??;
    Ok((ack, stream))
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
fn record_join(result: &str) {
    #[cfg(feature = "metrics")]
    if let Some(m) = revtun_observability::tunnel_metrics() {
        m.record_join(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revtun_common::Timeouts;
    use revtun_protocol::codec::{decode_command, decode_join_ack};
    use revtun_protocol::Join;

    fn config() -> HubConfig {
        HubConfig {
            api_addr: "127.0.0.1:0".parse().unwrap(),
            control_addr: "127.0.0.1:0".parse().unwrap(),
            tunnel_addr: "127.0.0.1:0".parse().unwrap(),
            advertise_addr: None,
            timeouts: Timeouts {
                drain: Duration::from_millis(200),
                ..Timeouts::default()
            },
            splice_idle_timeout: None,
        }
    }

    async fn join(addr: SocketAddr, name: &str) -> (TcpStream, Reply) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&Join::new(name).unwrap().encode())
            .await
            .unwrap();
        expect_command(&mut stream, Command::JoinAck).await.unwrap();
        let ack = decode_join_ack(&mut stream).await.unwrap();
        (stream, ack.reply)
    }

    #[test]
    fn test_build_request_parse() {
        let req = BuildTunnelRequest::parse("127.0.0.1:9100", "127.0.0.1:8080", "edge1").unwrap();
        assert_eq!(req.public_addr.port(), 9100);
        assert_eq!(req.agent, "edge1");

        assert!(BuildTunnelRequest::parse("nope", "127.0.0.1:8080", "edge1").is_err());
        assert!(BuildTunnelRequest::parse("127.0.0.1:9100", "localhost:80", "edge1").is_err());
        assert!(BuildTunnelRequest::parse("127.0.0.1:9100", "127.0.0.1:8080", "").is_err());
    }

    #[tokio::test]
    async fn test_bind_advertises_bound_relay() {
        let server = HubServer::bind(config()).await.unwrap();
        let tunnel = server.tunnel_addr().unwrap();
        assert_eq!(server.relay_addr().socket_addr(), tunnel);
    }

    #[tokio::test]
    async fn test_bind_rejects_unspecified_relay() {
        let config = HubConfig {
            tunnel_addr: "0.0.0.0:0".parse().unwrap(),
            ..config()
        };
        assert!(matches!(
            HubServer::bind(config).await,
            Err(TunnelError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let server = HubServer::bind(config()).await.unwrap();
        let control = server.control_addr().unwrap();
        let hub = server.handle();
        tokio::spawn(server.run());

        let (_first, reply) = join(control, "edge1").await;
        assert_eq!(reply, Reply::Succeeds);

        let (mut second, reply) = join(control, "edge1").await;
        assert_eq!(reply, Reply::DuplicateName);
        assert!(decode_command(&mut second).await.unwrap_err().is_io());

        assert_eq!(hub.agents().await.unwrap(), vec!["edge1".to_string()]);
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_joins_admit_one() {
        let server = HubServer::bind(config()).await.unwrap();
        let control = server.control_addr().unwrap();
        let hub = server.handle();
        tokio::spawn(server.run());

        let joins: Vec<_> = (0..16)
            .map(|_| tokio::spawn(join(control, "edge1")))
            .collect();
        let mut streams = Vec::new();
        let mut admitted = 0;
        for task in joins {
            let (stream, reply) = task.await.unwrap();
            match reply {
                Reply::Succeeds => admitted += 1,
                other => assert_eq!(other, Reply::DuplicateName),
            }
            streams.push(stream);
        }

        assert_eq!(admitted, 1);
        assert_eq!(hub.agents().await.unwrap(), vec!["edge1".to_string()]);
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_garbage_join_is_not_fatal() {
        let server = HubServer::bind(config()).await.unwrap();
        let control = server.control_addr().unwrap();
        let hub = server.handle();
        tokio::spawn(server.run());

        let mut bogus = TcpStream::connect(control).await.unwrap();
        bogus.write_all(&[0x09, 0x00, 0x01, b'x']).await.unwrap();
        assert!(decode_command(&mut bogus).await.is_err());

        let (_stream, reply) = join(control, "edge2").await;
        assert_eq!(reply, Reply::Succeeds);
        assert_eq!(hub.agents().await.unwrap(), vec!["edge2".to_string()]);
    }

    #[tokio::test]
    async fn test_agents_error_after_shutdown() {
        let server = HubServer::bind(config()).await.unwrap();
        let hub = server.handle();
        let running = tokio::spawn(server.run());

        assert!(hub.shutdown());
        running.await.unwrap().unwrap();
        assert!(hub.agents().await.is_err());
    }
}
