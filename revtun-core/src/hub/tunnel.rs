//! Public listener multiplexed onto one agent
//!
//! Every accepted client gets a fresh connection id and a WAITING
//! [`ProxyTunnelConn`]. The tunnel then asks its agent session to send
//! BUILD_TUNNEL for that id, and pairs the relay socket with the client
//! once the matching BUILD_TUNNEL_ACK comes back.

use super::agent::AgentEvent;
use super::SessionOptions;
use crate::conn::{ConnHandle, ProxyTunnelConn};
use crate::conn_id::ConnIdAllocator;
use crate::mailbox::{mailbox, Mailbox, MailboxSender};
use crate::transport::{SocketRole, TcpTransport};
use revtun_common::Result;
use revtun_protocol::{Address, BuildTunnelPrefix, ConnectionId, Reply};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum TunnelEvent {
    /// A relay socket announced itself for `conn_id`
    ConnAck {
        conn_id: ConnectionId,
        reply: Reply,
        stream: TcpStream,
    },
    ConnClosed {
        conn_id: ConnectionId,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct TunnelHandle {
    public_addr: SocketAddr,
    local_addr: SocketAddr,
    tx: MailboxSender<TunnelEvent>,
}

impl TunnelHandle {
    /// The bind address the tunnel was requested for.
    pub fn public_addr(&self) -> SocketAddr {
        self.public_addr
    }

    /// The address actually bound (differs from `public_addr` for port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn route_ack(&self, conn_id: ConnectionId, reply: Reply, stream: TcpStream) -> bool {
        self.tx
            .send(TunnelEvent::ConnAck {
                conn_id,
                reply,
                stream,
            })
            .await
    }

    pub fn shutdown(&self) -> bool {
        self.tx.try_send(TunnelEvent::Shutdown)
    }
}

pub struct ProxyTunnel {
    public_addr: SocketAddr,
    listener: TcpListener,
    prefix: BuildTunnelPrefix,
    conns: HashMap<ConnectionId, ConnHandle>,
    ids: ConnIdAllocator,
    agent: MailboxSender<AgentEvent>,
    mailbox: Mailbox<TunnelEvent>,
    tx: MailboxSender<TunnelEvent>,
    opts: SessionOptions,
}

impl ProxyTunnel {
    /// Bind `public_addr` and start accepting clients for `target_addr`.
    pub async fn spawn(
        public_addr: SocketAddr,
        target_addr: Address,
        agent: MailboxSender<AgentEvent>,
        ids: ConnIdAllocator,
        opts: SessionOptions,
    ) -> Result<TunnelHandle> {
        let listener = TcpTransport::bind(public_addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, mailbox) = mailbox("tunnel");

        let tunnel = Self {
            public_addr,
            listener,
            prefix: BuildTunnelPrefix::new(&opts.relay_addr, &target_addr),
            conns: HashMap::new(),
            ids,
            agent,
            mailbox,
            tx: tx.clone(),
            opts,
        };
        info!(%public_addr, %target_addr, "Tunnel listening");
        tokio::spawn(tunnel.run());

        Ok(TunnelHandle {
            public_addr,
            local_addr,
            tx,
        })
    }

    async fn run(mut self) {
        #[cfg(feature = "metrics")]
        if let Some(m) = revtun_observability::tunnel_metrics() {
            m.tunnel_opened();
        }

        loop {
            tokio::select! {
                accepted = TcpTransport::accept(&self.listener, SocketRole::Relay) => match accepted {
                    Ok((stream, peer)) => self.on_client(stream, peer).await,
                    Err(e) => {
                        warn!(public_addr = %self.public_addr, "Accept failed, closing tunnel: {}", e);
                        break;
                    }
                },
                event = self.mailbox.recv() => match event {
                    Some(TunnelEvent::ConnAck { conn_id, reply, stream }) => {
                        self.on_ack(conn_id, reply, stream).await;
                    }
                    Some(TunnelEvent::ConnClosed { conn_id }) => self.on_conn_closed(conn_id).await,
                    Some(TunnelEvent::Shutdown) | None => break,
                },
            }
        }

        self.terminate().await;
    }

    async fn on_client(&mut self, stream: TcpStream, peer: SocketAddr) {
        let conn_id = match self.ids.next_id() {
            Ok(id) => id,
            Err(e) => {
                warn!(public_addr = %self.public_addr, %peer, "Rejecting client: {}", e);
                return;
            }
        };

        let conn = ProxyTunnelConn::spawn_waiting(
            stream,
            conn_id,
            self.tx.clone(),
            |conn_id| TunnelEvent::ConnClosed { conn_id },
            self.opts.conn_options(),
        );
        debug!(public_addr = %self.public_addr, %peer, %conn_id, "Client waiting for relay");

        let pending = AgentEvent::ConnectionPending {
            conn_id,
            public_addr: self.public_addr,
            command: self.prefix.command(conn_id),
        };
        if !self.agent.send(pending).await {
            conn.close();
        }
        self.conns.insert(conn_id, conn);
    }

    async fn on_ack(&mut self, conn_id: ConnectionId, reply: Reply, stream: TcpStream) {
        let Some(conn) = self.conns.get(&conn_id) else {
            debug!(public_addr = %self.public_addr, %conn_id, "Ack for unknown connection, closing relay");
            return;
        };

        if reply.is_success() {
            conn.attach_relay(stream).await;
            return;
        }

        info!(public_addr = %self.public_addr, %conn_id, ?reply, "Agent could not reach target");
        drop(stream);
        conn.close();

        #[cfg(feature = "metrics")]
        if let Some(m) = revtun_observability::tunnel_metrics() {
            m.record_connection(revtun_observability::ConnectionOutcome::Refused);
        }
    }

    async fn on_conn_closed(&mut self, conn_id: ConnectionId) {
        if self.conns.remove(&conn_id).is_some() {
            self.agent
                .send(AgentEvent::ConnectionReleased { conn_id })
                .await;
        }
    }

    async fn terminate(self) {
        let Self {
            public_addr,
            listener,
            conns,
            agent,
            mailbox,
            opts,
            ..
        } = self;

        drop(listener);
        agent.send(AgentEvent::TunnelClosed { public_addr }).await;
        for conn in conns.values() {
            conn.close();
        }
        info!(%public_addr, connections = conns.len(), "Tunnel closed");

        #[cfg(feature = "metrics")]
        if let Some(m) = revtun_observability::tunnel_metrics() {
            m.tunnel_closed();
        }

        mailbox.drain(opts.timeouts.drain).await;
    }
}
