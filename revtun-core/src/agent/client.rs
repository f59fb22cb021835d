//! Agent runtime: join the hub, answer BUILD_TUNNEL, relay bytes
//!
//! ```text
//!   ┌──────────┐ JOIN_ACK ok ┌─────────┐ control lost ┌─────────┐
//!   │ Joining  │────────────▶│ Serving │─────────────▶│ Backoff │
//!   └──────────┘             └─────────┘              └─────────┘
//!        ▲  │ failure                                      │
//!        │  └──────────────────────────────────────────────▶│
//!        └──────────────────── retry_interval ─────────────┘
//! ```
//!
//! The loop only ends when the caller's cancellation token fires.

use crate::conn::{ConnHandle, ConnOptions, ProxyTunnelConn};
use crate::mailbox::{mailbox, MailboxSender};
use crate::reconnect::ReconnectManager;
use crate::transport::{run_control_writer, SocketRole, TcpTransport};
use bytes::Bytes;
use kanal::{bounded_async, AsyncSender};
use revtun_common::{AgentConfig, Result, TunnelError, MAILBOX_CAPACITY};
use revtun_protocol::codec::{decode_build_tunnel, decode_command, decode_join_ack, expect_command};
use revtun_protocol::{
    BuildTunnel, BuildTunnelAck, CodecError, Command, ConnectionId, Encode, Heartbeat, Join,
    ProtocolError, Reply,
};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum ClientEvent {
    /// A BUILD_TUNNEL arrived on the control channel
    BuildInfo(BuildTunnel),
    /// Both dials succeeded and the ack is written
    ConnReady {
        conn_id: ConnectionId,
        conn: ConnHandle,
    },
    ConnClosed {
        conn_id: ConnectionId,
    },
    /// A malformed or stalled frame; the session keeps reading
    CommandError(TunnelError),
    ControlLost(TunnelError),
    WriteFailed(io::Error),
}

pub struct AgentClient {
    config: AgentConfig,
    join_frame: Bytes,
}

impl AgentClient {
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let join_frame = Join::new(config.name.clone())?.encode();
        Ok(Self { config, join_frame })
    }

    /// Join, serve, and rejoin until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut reconnect = ReconnectManager::new(self.config.retry_interval);

        loop {
            let joined = tokio::select! {
                () = cancel.cancelled() => break,
                joined = self.join() => joined,
            };

            match joined {
                Ok(control) => {
                    reconnect.on_connected();
                    info!(agent = %self.config.name, hub = %self.config.hub_addr, "Joined hub");
                    match self.serve(control, &cancel).await {
                        Some(reason) => warn!(agent = %self.config.name, "Session ended: {}", reason),
                        None => break,
                    }
                }
                Err(e) => {
                    warn!(
                        agent = %self.config.name,
                        hub = %self.config.hub_addr,
                        attempt = reconnect.attempts() + 1,
                        "Join failed: {}",
                        e
                    );
                }
            }

            let delay = reconnect.on_disconnected();
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!(agent = %self.config.name, "Agent stopped");
        Ok(())
    }

    /// One JOIN handshake. Returns the control socket on success.
    pub async fn join(&self) -> Result<TcpStream> {
        let limit = self.config.timeouts.network;
        let mut control =
            TcpTransport::connect(&self.config.hub_addr, SocketRole::Control, limit).await?;

        let reply = tokio::time::timeout(limit, async {
            control.write_all(&self.join_frame).await?;
            expect_command(&mut control, Command::JoinAck).await?;
            Ok::<_, CodecError>(decode_join_ack(&mut control).await?.reply)
        })
        .await
        .map_err(|_| TunnelError::Timeout(format!("no JOIN_ACK within {limit:?}")))??;

        match reply {
            Reply::Succeeds => Ok(control),
            Reply::DuplicateName => Err(TunnelError::DuplicateAgentName(self.config.name.clone())),
            other => Err(TunnelError::JoinRejected(other)),
        }
    }

    fn conn_options(&self) -> ConnOptions {
        ConnOptions {
            pending_timeout: None,
            idle_timeout: self.config.splice_idle_timeout,
            drain_timeout: self.config.timeouts.drain,
        }
    }

    /// Serve one joined session. Returns why it ended, or `None` if cancelled.
    async fn serve(&self, control: TcpStream, cancel: &CancellationToken) -> Option<TunnelError> {
        let timeouts = self.config.timeouts;
        let name: Arc<str> = Arc::from(self.config.name.as_str());
        let (tx, mut mailbox) = mailbox::<ClientEvent>("client");
        let (outbound, outbound_rx) = bounded_async::<Bytes>(MAILBOX_CAPACITY);
        let (read_half, write_half) = control.into_split();

        let writer = {
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(e) = run_control_writer(outbound_rx, write_half, timeouts.network).await
                {
                    tx.send(ClientEvent::WriteFailed(e)).await;
                }
            })
        };
        let reader = tokio::spawn(read_commands(read_half, tx.clone(), timeouts.network));
        let heartbeat = tokio::spawn(send_heartbeats(outbound.clone(), timeouts.heartbeat));
        let mut conns: HashMap<ConnectionId, ConnHandle> = HashMap::new();

        let reason = loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break None,
                event = mailbox.recv() => event,
            };
            match event {
                Some(ClientEvent::BuildInfo(command)) => {
                    debug!(conn_id = %command.conn_id, target = %command.target_addr, "BUILD_TUNNEL");
                    tokio::spawn(dial_relay(
                        name.clone(),
                        command,
                        tx.clone(),
                        self.conn_options(),
                        timeouts.network,
                    ));
                }
                Some(ClientEvent::ConnReady { conn_id, conn }) => {
                    conn.trans_start();
                    conns.insert(conn_id, conn);
                }
                Some(ClientEvent::ConnClosed { conn_id }) => {
                    conns.remove(&conn_id);
                }
                Some(ClientEvent::CommandError(e)) => {
                    warn!(agent = %name, "Ignoring malformed command: {}", e);
                }
                Some(ClientEvent::ControlLost(e)) => break Some(e),
                Some(ClientEvent::WriteFailed(e)) => break Some(e.into()),
                None => break Some(TunnelError::InvalidState("client mailbox closed".into())),
            }
        };

        reader.abort();
        writer.abort();
        heartbeat.abort();
        let _ = outbound.close();
        for conn in conns.values() {
            conn.close();
        }
        info!(agent = %name, connections = conns.len(), "Session closed");

        drop(tx);
        mailbox.drain(timeouts.drain).await;
        reason
    }
}

async fn send_heartbeats(outbound: AsyncSender<Bytes>, every: Duration) {
    let frame = Heartbeat.encode();
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if outbound.send(frame.clone()).await.is_err() {
            return;
        }
    }
}

/// Wait for the next command, then read its payload under `limit`.
async fn read_build_tunnel<R>(control: &mut R, limit: Duration) -> Result<BuildTunnel>
where
    R: AsyncRead + Unpin,
{
    match decode_command(control).await? {
        Command::BuildTunnel => tokio::time::timeout(limit, decode_build_tunnel(control))
            .await
            .map_err(|_| TunnelError::Timeout(format!("BUILD_TUNNEL payload stalled for {limit:?}")))?
            .map_err(Into::into),
        got => Err(ProtocolError::UnexpectedCommand {
            expected: Command::BuildTunnel,
            got,
        }
        .into()),
    }
}

/// Protocol errors and stalled payloads are reported and skipped; I/O
/// errors end the session.
async fn read_commands<R>(mut control: R, session: MailboxSender<ClientEvent>, limit: Duration)
where
    R: AsyncRead + Unpin,
{
    loop {
        let event = match read_build_tunnel(&mut control, limit).await {
            Ok(command) => ClientEvent::BuildInfo(command),
            Err(TunnelError::Io(e)) => {
                session.send(ClientEvent::ControlLost(e.into())).await;
                return;
            }
            Err(e) => ClientEvent::CommandError(e),
        };
        session.send(event).await;
    }
}

/// Dial the hub relay, then the target, and announce the result on the
/// relay socket. A refused target still gets an ack so the hub can free
/// the id; the relay is then closed without carrying data.
async fn dial_relay(
    name: Arc<str>,
    command: BuildTunnel,
    session: MailboxSender<ClientEvent>,
    opts: ConnOptions,
    limit: Duration,
) {
    let BuildTunnel {
        relay_addr,
        target_addr,
        conn_id,
    } = command;

    let mut relay =
        match TcpTransport::connect_addr(relay_addr.socket_addr(), SocketRole::Relay, limit).await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%conn_id, %relay_addr, "Cannot reach hub relay: {}", e);
                return;
            }
        };

    let target = TcpTransport::connect_addr(target_addr.socket_addr(), SocketRole::Relay, limit).await;
    let reply = match &target {
        Ok(_) => Reply::Succeeds,
        Err(e) => {
            warn!(%conn_id, %target_addr, "Cannot reach target: {}", e);
            Reply::ConnectionRefused
        }
    };

    let ack = match BuildTunnelAck::new(name.as_ref(), conn_id, reply) {
        Ok(ack) => ack.encode(),
        Err(e) => {
            warn!(%conn_id, "Cannot encode ack: {}", e);
            return;
        }
    };
    match tokio::time::timeout(limit, relay.write_all(&ack)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(%conn_id, "Writing ack failed: {}", e);
            return;
        }
        Err(_) => {
            warn!(%conn_id, "Writing ack timed out");
            return;
        }
    }

    let Ok(target) = target else {
        return;
    };
    let conn = ProxyTunnelConn::spawn_ready(
        target,
        relay,
        conn_id,
        session.clone(),
        |conn_id| ClientEvent::ConnClosed { conn_id },
        opts,
    );
    session.send(ClientEvent::ConnReady { conn_id, conn }).await;
}
