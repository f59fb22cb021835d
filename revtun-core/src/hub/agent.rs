//! Hub-side session for one joined agent
//!
//! Owns the control socket. A reader task watches heartbeats with a rolling
//! deadline; a writer task drains the outbound frame queue. The session loop
//! owns the tunnels built for this agent and the table of connection ids
//! still waiting for their BUILD_TUNNEL_ACK.

use super::server::HubEvent;
use super::tunnel::{ProxyTunnel, TunnelHandle};
use super::SessionOptions;
use crate::conn_id::ConnIdAllocator;
use crate::mailbox::{mailbox, Mailbox, MailboxSender};
use crate::transport::run_control_writer;
use bytes::Bytes;
use kanal::{bounded_async, AsyncSender};
use revtun_common::{TunnelError, MAILBOX_CAPACITY};
use revtun_protocol::codec::decode_command;
use revtun_protocol::{
    Address, Command, ConnectionId, Encode, JoinAck, ProtocolError, Reply,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

#[derive(Debug)]
pub enum AgentEvent {
    /// Expose `target_addr` on `public_addr` through this agent
    BuildTunnel {
        public_addr: SocketAddr,
        target_addr: Address,
    },
    /// A tunnel accepted a client; send `command` and remember the id
    ConnectionPending {
        conn_id: ConnectionId,
        public_addr: SocketAddr,
        command: Bytes,
    },
    /// The connection ended; forget the id if it is still pending
    ConnectionReleased {
        conn_id: ConnectionId,
    },
    /// A BUILD_TUNNEL_ACK socket for this agent
    TunnelAck {
        conn_id: ConnectionId,
        reply: Reply,
        stream: TcpStream,
    },
    TunnelClosed {
        public_addr: SocketAddr,
    },
    /// Heartbeat timeout, read error or unexpected command
    ControlLost(TunnelError),
    WriteFailed(io::Error),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct AgentHandle {
    session_id: u64,
    tx: MailboxSender<AgentEvent>,
}

impl AgentHandle {
    /// Distinguishes successive sessions that reuse one name.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub async fn build_tunnel(&self, public_addr: SocketAddr, target_addr: Address) -> bool {
        self.tx
            .send(AgentEvent::BuildTunnel {
                public_addr,
                target_addr,
            })
            .await
    }

    pub async fn route_ack(&self, conn_id: ConnectionId, reply: Reply, stream: TcpStream) -> bool {
        self.tx
            .send(AgentEvent::TunnelAck {
                conn_id,
                reply,
                stream,
            })
            .await
    }

    pub fn shutdown(&self) -> bool {
        self.tx.try_send(AgentEvent::Shutdown)
    }
}

pub struct AgentSession {
    name: String,
    session_id: u64,
    hub: MailboxSender<HubEvent>,
    tunnels: HashMap<SocketAddr, TunnelHandle>,
    pending: HashMap<ConnectionId, SocketAddr>,
    ids: ConnIdAllocator,
    outbound: AsyncSender<Bytes>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    mailbox: Mailbox<AgentEvent>,
    tx: MailboxSender<AgentEvent>,
    opts: SessionOptions,
}

impl AgentSession {
    /// Take over a control socket whose JOIN was accepted. The session
    /// answers JOIN_ACK itself before any other frame.
    pub fn spawn(
        name: String,
        session_id: u64,
        control: TcpStream,
        hub: MailboxSender<HubEvent>,
        opts: SessionOptions,
    ) -> AgentHandle {
        let (tx, mailbox) = mailbox("agent");
        let (outbound, outbound_rx) = bounded_async::<Bytes>(MAILBOX_CAPACITY);
        let (read_half, write_half) = control.into_split();

        // Queued before the writer starts, so it is the first frame out.
        let _ = outbound.try_send(
            JoinAck {
                reply: Reply::Succeeds,
            }
            .encode(),
        );

        let writer = {
            let tx = tx.clone();
            let limit = opts.timeouts.network;
            tokio::spawn(async move {
                if let Some(e) = run_control_writer(outbound_rx, write_half, limit).await {
                    tx.send(AgentEvent::WriteFailed(e)).await;
                }
            })
        };
        let reader = tokio::spawn(watch_heartbeats(read_half, tx.clone(), opts.timeouts.network));

        let session = Self {
            name,
            session_id,
            hub,
            tunnels: HashMap::new(),
            pending: HashMap::new(),
            ids: ConnIdAllocator::new(),
            outbound,
            reader,
            writer,
            mailbox,
            tx: tx.clone(),
            opts,
        };
        tokio::spawn(session.run());

        AgentHandle {
            session_id,
            tx,
        }
    }

    async fn run(mut self) {
        info!(agent = %self.name, session = self.session_id, "Agent session started");
        #[cfg(feature = "metrics")]
        if let Some(m) = revtun_observability::tunnel_metrics() {
            m.agent_joined();
        }

        while let Some(event) = self.mailbox.recv().await {
            match event {
                AgentEvent::BuildTunnel {
                    public_addr,
                    target_addr,
                } => self.build_tunnel(public_addr, target_addr).await,
                AgentEvent::ConnectionPending {
                    conn_id,
                    public_addr,
                    command,
                } => self.register_waiting_connection(conn_id, public_addr, command).await,
                AgentEvent::ConnectionReleased { conn_id } => {
                    self.pending.remove(&conn_id);
                }
                AgentEvent::TunnelAck {
                    conn_id,
                    reply,
                    stream,
                } => self.route_ack(conn_id, reply, stream).await,
                AgentEvent::TunnelClosed { public_addr } => {
                    self.tunnels.remove(&public_addr);
                    self.pending.retain(|_, addr| *addr != public_addr);
                    debug!(agent = %self.name, %public_addr, "Tunnel removed");
                }
                AgentEvent::ControlLost(e) => {
                    warn!(agent = %self.name, "Control channel lost: {}", e);
                    break;
                }
                AgentEvent::WriteFailed(e) => {
                    warn!(agent = %self.name, "Control write failed: {}", e);
                    break;
                }
                AgentEvent::Shutdown => {
                    info!(agent = %self.name, "Agent session shutting down");
                    break;
                }
            }
        }

        self.terminate().await;
    }

    async fn build_tunnel(&mut self, public_addr: SocketAddr, target_addr: Address) {
        if self.tunnels.contains_key(&public_addr) {
            debug!(agent = %self.name, %public_addr, "Tunnel already exists");
            return;
        }
        match ProxyTunnel::spawn(
            public_addr,
            target_addr,
            self.tx.clone(),
            self.ids.clone(),
            self.opts,
        )
        .await
        {
            Ok(tunnel) => {
                self.tunnels.insert(public_addr, tunnel);
            }
            Err(e) => {
                warn!(agent = %self.name, %public_addr, "Failed to build tunnel: {}", e);
            }
        }
    }

    async fn register_waiting_connection(
        &mut self,
        conn_id: ConnectionId,
        public_addr: SocketAddr,
        command: Bytes,
    ) {
        self.pending.insert(conn_id, public_addr);
        let queued =
            tokio::time::timeout(self.opts.timeouts.network, self.outbound.send(command)).await;
        if !matches!(queued, Ok(Ok(()))) {
            warn!(agent = %self.name, %conn_id, "Could not queue BUILD_TUNNEL");
            self.pending.remove(&conn_id);
        }
    }

    async fn route_ack(&mut self, conn_id: ConnectionId, reply: Reply, stream: TcpStream) {
        let Some(tunnel) = self
            .pending
            .remove(&conn_id)
            .and_then(|addr| self.tunnels.get(&addr))
        else {
            debug!(agent = %self.name, %conn_id, "Ack for unknown connection, closing relay");
            return;
        };
        tunnel.route_ack(conn_id, reply, stream).await;
    }

    async fn terminate(self) {
        let Self {
            name,
            session_id,
            hub,
            tunnels,
            outbound,
            reader,
            writer,
            mailbox,
            opts,
            ..
        } = self;

        hub.send(HubEvent::AgentLeft {
            name: name.clone(),
            session_id,
        })
        .await;

        let _ = outbound.close();
        reader.abort();
        writer.abort();
        for tunnel in tunnels.values() {
            tunnel.shutdown();
        }
        info!(agent = %name, tunnels = tunnels.len(), "Agent session closed");

        #[cfg(feature = "metrics")]
        if let Some(m) = revtun_observability::tunnel_metrics() {
            m.agent_left();
        }

        mailbox.drain(opts.timeouts.drain).await;
    }
}

/// Read HEARTBEATs until one is late, the socket fails, or anything other
/// than a heartbeat arrives.
async fn watch_heartbeats(
    mut control: OwnedReadHalf,
    session: MailboxSender<AgentEvent>,
    deadline: Duration,
) {
    let err = loop {
        match tokio::time::timeout(deadline, decode_command(&mut control)).await {
            Ok(Ok(Command::Heartbeat)) => trace!("Heartbeat"),
            Ok(Ok(got)) => {
                break TunnelError::Protocol(ProtocolError::UnexpectedCommand {
                    expected: Command::Heartbeat,
                    got,
                })
            }
            Ok(Err(e)) => break e.into(),
            Err(_) => break TunnelError::Timeout(format!("no heartbeat within {deadline:?}")),
        }
    };
    session.send(AgentEvent::ControlLost(err)).await;
}
