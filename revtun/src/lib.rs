//! # revtun
//!
//! A reverse TCP tunnel. Agents behind NAT join a public hub over a
//! long-lived control connection; the hub opens public listeners on request
//! and, for every client that connects, tells the owning agent to dial back a
//! relay connection and to connect to a local target. The two sockets are
//! then spliced byte for byte.
//!
//! ```text
//! client ──▶ hub public listener          agent ──▶ target service
//!               │                            ▲
//!               └──── relay (dialled back) ──┘
//! ```
//!
//! ## Crates
//!
//! - `revtun-protocol` - wire messages and their async codec
//! - `revtun-common` - errors, configuration, defaults
//! - `revtun-core` - hub and agent actors
//! - `revtun-observability` - logging and Prometheus metrics
//!
//! This crate adds embeddable [`Hub`] and [`Agent`] builders and the hub's
//! HTTP [`api`].

pub mod agent;
pub mod api;
pub mod config;
pub mod hub;

pub use revtun_common as common;
pub use revtun_protocol as protocol;

pub use agent::{Agent, AgentBuilder};
pub use hub::{Hub, HubBuilder, HubInfo};

pub use common::{Result, TunnelError};
pub use revtun_core::{BuildTunnelRequest, HubHandle};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::common::{Result, TunnelError};
    pub use crate::{Agent, BuildTunnelRequest, Hub, HubHandle};
}
