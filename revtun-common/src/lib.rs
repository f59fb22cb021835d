//! Common utilities and types for revtun

pub mod config;
pub mod constants;
pub mod error;

pub use config::{AgentConfig, Config, HubConfig, Role, Timeouts};
pub use constants::{
    DEFAULT_API_BIND, DEFAULT_CONTROL_BIND, DEFAULT_HUB_ADDR, DEFAULT_TUNNEL_BIND,
    MAILBOX_CAPACITY,
};
pub use error::{Result, TunnelError};
