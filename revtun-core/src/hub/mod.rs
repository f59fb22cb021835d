//! Hub-side actors
//!
//! [`HubServer`] owns the agent registry. Each joined agent is an
//! [`AgentSession`](agent::AgentSession) owning its control socket and its
//! [`ProxyTunnel`](tunnel::ProxyTunnel)s; each tunnel owns the
//! [`ProxyTunnelConn`](crate::conn::ProxyTunnelConn)s for its clients.

pub mod agent;
pub mod server;
pub mod tunnel;

pub use agent::{AgentEvent, AgentHandle};
pub use server::{BuildTunnelRequest, HubEvent, HubHandle, HubServer};
pub use tunnel::{TunnelEvent, TunnelHandle};

use crate::conn::ConnOptions;
use revtun_common::Timeouts;
use revtun_protocol::Address;
use std::time::Duration;

/// Settings every hub-side actor inherits from the server
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub timeouts: Timeouts,
    /// Relay address sent to agents in BUILD_TUNNEL
    pub relay_addr: Address,
    pub idle_timeout: Option<Duration>,
}

impl SessionOptions {
    pub(crate) fn conn_options(&self) -> ConnOptions {
        ConnOptions {
            pending_timeout: Some(self.timeouts.pending_ack),
            idle_timeout: self.idle_timeout,
            drain_timeout: self.timeouts.drain,
        }
    }
}
