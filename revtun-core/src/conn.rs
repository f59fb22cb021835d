//! Per-connection handshake and relay state machine
//!
//! A [`ProxyTunnelConn`] pairs one local socket with one relay socket:
//!
//! - hub side: the public client and the connection the agent dialled back
//! - agent side: the target service and the connection dialled to the hub
//!
//! ```text
//! hub:   WAITING --RelayAttached--> TRANSPORT --> CLOSE
//! agent: READY   --TransStart-----> TRANSPORT --> CLOSE
//!        any state --Close--------------------> CLOSE
//! ```
//!
//! States only move forward. Whatever the path, termination closes both
//! sockets and notifies the owner exactly once so it can free the id.

use crate::mailbox::{mailbox, Mailbox, MailboxSender};
use crate::transport::splice;
use revtun_protocol::ConnectionId;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Hub side: client accepted, relay not attached yet
    Waiting,
    /// Agent side: both sockets dialled, not splicing yet
    Ready,
    Transport,
    Close,
}

#[derive(Debug)]
pub enum ConnEvent {
    /// Relay socket for a WAITING connection
    RelayAttached(TcpStream),
    /// Start splicing a READY connection
    TransStart,
    Close,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnOptions {
    /// How long a WAITING connection waits for its relay
    pub pending_timeout: Option<Duration>,
    /// Passed through to [`splice`]
    pub idle_timeout: Option<Duration>,
    pub drain_timeout: Duration,
}

/// Mailbox address of a running connection.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    id: ConnectionId,
    tx: MailboxSender<ConnEvent>,
}

impl ConnHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn attach_relay(&self, relay: TcpStream) -> bool {
        self.tx.send(ConnEvent::RelayAttached(relay)).await
    }

    pub fn trans_start(&self) -> bool {
        self.tx.try_send(ConnEvent::TransStart)
    }

    pub fn close(&self) -> bool {
        self.tx.try_send(ConnEvent::Close)
    }
}

pub struct ProxyTunnelConn<E> {
    id: ConnectionId,
    state: ConnState,
    local: Option<TcpStream>,
    relay: Option<TcpStream>,
    mailbox: Mailbox<ConnEvent>,
    owner: MailboxSender<E>,
    on_close: fn(ConnectionId) -> E,
    opts: ConnOptions,
}

impl<E: Send + 'static> ProxyTunnelConn<E> {
    /// Hub side: start WAITING on `client` until a relay is attached.
    pub fn spawn_waiting(
        client: TcpStream,
        id: ConnectionId,
        owner: MailboxSender<E>,
        on_close: fn(ConnectionId) -> E,
        opts: ConnOptions,
    ) -> ConnHandle {
        Self::spawn(ConnState::Waiting, client, None, id, owner, on_close, opts)
    }

    /// Agent side: both sockets are dialled; splice after TRANS_START.
    pub fn spawn_ready(
        target: TcpStream,
        relay: TcpStream,
        id: ConnectionId,
        owner: MailboxSender<E>,
        on_close: fn(ConnectionId) -> E,
        opts: ConnOptions,
    ) -> ConnHandle {
        Self::spawn(ConnState::Ready, target, Some(relay), id, owner, on_close, opts)
    }

    fn spawn(
        state: ConnState,
        local: TcpStream,
        relay: Option<TcpStream>,
        id: ConnectionId,
        owner: MailboxSender<E>,
        on_close: fn(ConnectionId) -> E,
        opts: ConnOptions,
    ) -> ConnHandle {
        let (tx, mailbox) = mailbox("conn");
        let conn = Self {
            id,
            state,
            local: Some(local),
            relay,
            mailbox,
            owner,
            on_close,
            opts,
        };
        tokio::spawn(conn.run());
        ConnHandle { id, tx }
    }

    async fn run(mut self) {
        let started_waiting = self.state == ConnState::Waiting;
        match self.state {
            ConnState::Waiting => self.wait_for_relay().await,
            ConnState::Ready => self.wait_for_start().await,
            ConnState::Transport | ConnState::Close => {}
        }

        if self.state == ConnState::Transport {
            self.transport(started_waiting).await;
        } else if started_waiting {
            #[cfg(feature = "metrics")]
            if let Some(m) = revtun_observability::tunnel_metrics() {
                m.record_connection(revtun_observability::ConnectionOutcome::Dropped);
            }
        }

        self.terminate().await;
    }

    async fn wait_for_relay(&mut self) {
        let deadline = self.opts.pending_timeout.map(|d| Instant::now() + d);
        loop {
            let event = match deadline {
                Some(at) => {
                    if let Ok(event) = tokio::time::timeout_at(at, self.mailbox.recv()).await {
                        event
                    } else {
                        info!(conn_id = %self.id, "No relay arrived in time, closing client");
                        return;
                    }
                }
                None => self.mailbox.recv().await,
            };

            match event {
                Some(ConnEvent::RelayAttached(relay)) => {
                    self.relay = Some(relay);
                    self.state = ConnState::Transport;
                    return;
                }
                Some(ConnEvent::TransStart) => {
                    debug!(conn_id = %self.id, "Ignoring TRANS_START while waiting");
                }
                Some(ConnEvent::Close) | None => return,
            }
        }
    }

    async fn wait_for_start(&mut self) {
        loop {
            match self.mailbox.recv().await {
                Some(ConnEvent::TransStart) => {
                    self.state = ConnState::Transport;
                    return;
                }
                Some(ConnEvent::RelayAttached(_)) => {
                    debug!(conn_id = %self.id, "Ignoring relay for a ready connection");
                }
                Some(ConnEvent::Close) | None => return,
            }
        }
    }

    async fn transport(&mut self, hub_side: bool) {
        let (Some(local), Some(relay)) = (self.local.take(), self.relay.take()) else {
            return;
        };
        debug!(conn_id = %self.id, "Splicing");

        #[cfg(feature = "metrics")]
        if hub_side {
            if let Some(m) = revtun_observability::tunnel_metrics() {
                m.record_connection(revtun_observability::ConnectionOutcome::Spliced);
            }
        }

        let relay_fut = splice(local, relay, self.opts.idle_timeout);
        tokio::pin!(relay_fut);

        loop {
            tokio::select! {
                stats = &mut relay_fut => {
                    debug!(
                        conn_id = %self.id,
                        sent = stats.a_to_b,
                        received = stats.b_to_a,
                        end = ?stats.end,
                        "Relay finished"
                    );
                    record_bytes(hub_side, stats.a_to_b, stats.b_to_a);
                    return;
                }
                event = self.mailbox.recv() => match event {
                    Some(ConnEvent::Close) => {
                        debug!(conn_id = %self.id, "Relay closed by owner");
                        return;
                    }
                    Some(_) => {}
                    // Every handle is gone, so the owner has torn down.
                    None => {
                        debug!(conn_id = %self.id, "Owner dropped the connection, closing relay");
                        return;
                    }
                },
            }
        }
    }

    async fn terminate(mut self) {
        self.state = ConnState::Close;
        self.local = None;
        self.relay = None;
        self.owner.send((self.on_close)(self.id)).await;
        self.mailbox.drain(self.opts.drain_timeout).await;
    }
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
fn record_bytes(hub_side: bool, local_to_relay: u64, relay_to_local: u64) {
    #[cfg(feature = "metrics")]
    if let Some(m) = revtun_observability::tunnel_metrics() {
        use revtun_observability::Direction;
        // Directions are named from the public client's point of view.
        let (ingress, egress) = if hub_side {
            (local_to_relay, relay_to_local)
        } else {
            (relay_to_local, local_to_relay)
        };
        m.record_bytes(Direction::Ingress, ingress);
        m.record_bytes(Direction::Egress, egress);
    }
}
