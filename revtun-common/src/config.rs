//! Configuration types for revtun hubs and agents

use crate::constants::{
    DEFAULT_API_BIND, DEFAULT_CONTROL_BIND, DEFAULT_DRAIN_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_HUB_ADDR, DEFAULT_NETWORK_TIMEOUT, DEFAULT_PENDING_ACK_TIMEOUT,
    DEFAULT_RETRY_INTERVAL, DEFAULT_TUNNEL_BIND,
};
use crate::error::{Result, TunnelError};
use revtun_protocol::validation::validate_name;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Which side of the tunnel a config file describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "master")]
    Hub,
    #[serde(alias = "slaver")]
    Agent,
}

/// On-disk JSON config shared by both roles.
///
/// Fields that do not apply to the selected role are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub role: Role,
    /// Agent name (agent only)
    #[serde(default)]
    pub name: Option<String>,
    /// HTTP API bind address (hub only)
    #[serde(default)]
    pub client_addr: Option<String>,
    /// Control listener bind address (hub only)
    #[serde(default)]
    pub ctrl_addr: Option<String>,
    /// Relay listener bind address (hub only)
    #[serde(default)]
    pub tunnel_addr: Option<String>,
    /// Relay address agents are told to dial (hub only)
    #[serde(default)]
    pub advertise_addr: Option<String>,
    /// Hub control address to join (agent only)
    #[serde(default)]
    pub join: Option<String>,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TunnelError::Config(format!("invalid config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TunnelError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Build a validated hub config, falling back to defaults for unset fields.
    pub fn hub_config(&self) -> Result<HubConfig> {
        let cfg = self.hub_config_unvalidated()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like [`hub_config`](Self::hub_config) but leaves validation to the
    /// caller, for layering command line overrides on top.
    pub fn hub_config_unvalidated(&self) -> Result<HubConfig> {
        if self.role != Role::Hub {
            return Err(TunnelError::Config("config role is not hub".into()));
        }
        let mut cfg = HubConfig::default();
        if let Some(addr) = &self.client_addr {
            cfg.api_addr = parse_addr("client_addr", addr)?;
        }
        if let Some(addr) = &self.ctrl_addr {
            cfg.control_addr = parse_addr("ctrl_addr", addr)?;
        }
        if let Some(addr) = &self.tunnel_addr {
            cfg.tunnel_addr = parse_addr("tunnel_addr", addr)?;
        }
        if let Some(addr) = &self.advertise_addr {
            cfg.advertise_addr = Some(parse_addr("advertise_addr", addr)?);
        }
        Ok(cfg)
    }

    /// Build a validated agent config, falling back to defaults for unset fields.
    pub fn agent_config(&self) -> Result<AgentConfig> {
        let cfg = self.agent_config_unvalidated()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn agent_config_unvalidated(&self) -> Result<AgentConfig> {
        if self.role != Role::Agent {
            return Err(TunnelError::Config("config role is not agent".into()));
        }
        let name = self
            .name
            .clone()
            .ok_or_else(|| TunnelError::Config("agent config requires a name".into()))?;
        let mut cfg = AgentConfig::new(name);
        if let Some(join) = &self.join {
            cfg.hub_addr.clone_from(join);
        }
        Ok(cfg)
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|_| TunnelError::Config(format!("{field}: '{value}' is not ip:port")))
}

/// Deadlines shared by every actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Handshake and control I/O deadline; also the heartbeat read deadline
    pub network: Duration,
    /// Heartbeat write cadence
    pub heartbeat: Duration,
    /// How long a terminating actor drains its mailbox
    pub drain: Duration,
    /// How long a client connection waits for its relay (hub only)
    pub pending_ack: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK_TIMEOUT,
            heartbeat: DEFAULT_HEARTBEAT_INTERVAL,
            drain: DEFAULT_DRAIN_TIMEOUT,
            pending_ack: DEFAULT_PENDING_ACK_TIMEOUT,
        }
    }
}

impl Timeouts {
    pub fn validate(&self) -> Result<()> {
        if self.network.is_zero() || self.heartbeat.is_zero() {
            return Err(TunnelError::Config(
                "network and heartbeat timeouts must be non-zero".into(),
            ));
        }
        if self.heartbeat >= self.network {
            return Err(TunnelError::Config(format!(
                "heartbeat interval {:?} must be shorter than network timeout {:?}",
                self.heartbeat, self.network
            )));
        }
        Ok(())
    }
}

/// Hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// HTTP API bind address
    pub api_addr: SocketAddr,
    /// Control listener (agents JOIN here)
    pub control_addr: SocketAddr,
    /// Relay listener (agents dial back here)
    pub tunnel_addr: SocketAddr,
    /// Relay address sent to agents; defaults to `tunnel_addr`
    pub advertise_addr: Option<SocketAddr>,
    pub timeouts: Timeouts,
    /// Close spliced pairs idle for this long
    pub splice_idle_timeout: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            api_addr: default_addr(DEFAULT_API_BIND),
            control_addr: default_addr(DEFAULT_CONTROL_BIND),
            tunnel_addr: default_addr(DEFAULT_TUNNEL_BIND),
            advertise_addr: None,
            timeouts: Timeouts::default(),
            splice_idle_timeout: None,
        }
    }
}

fn default_addr(s: &str) -> SocketAddr {
    s.parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)))
}

impl HubConfig {
    /// Address agents dial for BUILD_TUNNEL_ACK connections.
    pub fn relay_addr(&self) -> SocketAddr {
        self.advertise_addr.unwrap_or(self.tunnel_addr)
    }

    pub fn validate(&self) -> Result<()> {
        if self.relay_addr().ip().is_unspecified() {
            return Err(TunnelError::Config(format!(
                "tunnel_addr {} is unspecified; set advertise_addr to a routable address",
                self.tunnel_addr
            )));
        }
        self.timeouts.validate()
    }
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    /// Hub control address (`host:port`)
    pub hub_addr: String,
    /// Fixed delay between join attempts
    pub retry_interval: Duration,
    pub timeouts: Timeouts,
    pub splice_idle_timeout: Option<Duration>,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hub_addr: DEFAULT_HUB_ADDR.to_string(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            timeouts: Timeouts::default(),
            splice_idle_timeout: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)
            .map_err(|e| TunnelError::Config(format!("agent name: {e}")))?;
        if self.hub_addr.is_empty() {
            return Err(TunnelError::Config("hub address is required".into()));
        }
        if self.retry_interval.is_zero() {
            return Err(TunnelError::Config("retry interval must be non-zero".into()));
        }
        self.timeouts.validate()
    }
}
