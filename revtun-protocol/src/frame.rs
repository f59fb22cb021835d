//! Control message definitions
//!
//! Every framed message starts with the version byte followed by a
//! command byte. Multi-byte integers are big-endian.
//!
//! ```text
//! JOIN              VER | 0x00 | NAME.LEN(1) | NAME(1..64)
//! JOIN_ACK          VER | 0x01 | REP(1)
//! BUILD_TUNNEL      VER | 0x02 | M.ATYP | M.ADDR | M.PORT | S.ATYP | S.ADDR | S.PORT | ID(8)
//! BUILD_TUNNEL_ACK  VER | 0x03 | NAME.LEN(1) | NAME | ID(8) | REP(1)
//! HEARTBEAT         VER | 0x04
//! ```

use crate::address::Address;
use crate::validation::{validate_name, ProtocolError};
use std::fmt;

/// Command byte following the version byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Agent asks to join the hub
    Join = 0x00,
    /// Hub answers a join request
    JoinAck = 0x01,
    /// Hub asks the agent to dial back for one client connection
    BuildTunnel = 0x02,
    /// Agent announces a dialled-back relay connection
    BuildTunnelAck = 0x03,
    /// Agent liveness signal
    Heartbeat = 0x04,
}

impl Command {
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x00 => Ok(Self::Join),
            0x01 => Ok(Self::JoinAck),
            0x02 => Ok(Self::BuildTunnel),
            0x03 => Ok(Self::BuildTunnelAck),
            0x04 => Ok(Self::Heartbeat),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Join => "JOIN",
            Self::JoinAck => "JOIN_ACK",
            Self::BuildTunnel => "BUILD_TUNNEL",
            Self::BuildTunnelAck => "BUILD_TUNNEL_ACK",
            Self::Heartbeat => "HEARTBEAT",
        };
        f.write_str(name)
    }
}

/// Reply byte carried by JOIN_ACK and BUILD_TUNNEL_ACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Succeeds,
    /// JOIN rejected: another agent holds the name
    DuplicateName,
    /// BUILD_TUNNEL could not reach the target service
    ConnectionRefused,
    Other(u8),
}

impl Reply {
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Succeeds => 0x00,
            Self::DuplicateName => 0x01,
            Self::ConnectionRefused => 0x02,
            Self::Other(b) => b,
        }
    }

    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Succeeds,
            0x01 => Self::DuplicateName,
            0x02 => Self::ConnectionRefused,
            b => Self::Other(b),
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeds)
    }
}

/// Per-agent identifier correlating a public client with its relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// JOIN payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub name: String,
}

impl Join {
    pub fn new(name: impl Into<String>) -> Result<Self, ProtocolError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name })
    }
}

/// JOIN_ACK payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAck {
    pub reply: Reply,
}

/// HEARTBEAT has no payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat;

/// BUILD_TUNNEL payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildTunnel {
    /// Hub relay address the agent dials back to
    pub relay_addr: Address,
    /// Service address the agent connects to locally
    pub target_addr: Address,
    pub conn_id: ConnectionId,
}

/// BUILD_TUNNEL_ACK payload, written first on a dialled-back relay socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTunnelAck {
    pub name: String,
    pub conn_id: ConnectionId,
    pub reply: Reply,
}

impl BuildTunnelAck {
    pub fn new(
        name: impl Into<String>,
        conn_id: ConnectionId,
        reply: Reply,
    ) -> Result<Self, ProtocolError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            conn_id,
            reply,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        for byte in 0x00..=0x04 {
            let cmd = Command::try_from(byte).unwrap();
            assert_eq!(cmd.as_byte(), byte);
        }
        assert_eq!(
            Command::try_from(0xff),
            Err(ProtocolError::UnknownCommand(0xff))
        );
    }

    #[test]
    fn test_reply_bytes() {
        assert_eq!(Reply::from_byte(0x00), Reply::Succeeds);
        assert_eq!(Reply::from_byte(0x01), Reply::DuplicateName);
        assert_eq!(Reply::from_byte(0x02), Reply::ConnectionRefused);
        assert_eq!(Reply::from_byte(0x7f), Reply::Other(0x7f));
        assert_eq!(Reply::Other(0x7f).as_byte(), 0x7f);
        assert!(!Reply::ConnectionRefused.is_success());
    }

    #[test]
    fn test_join_rejects_bad_names() {
        assert!(Join::new("edge1").is_ok());
        assert!(Join::new("").is_err());
        assert!(Join::new("n".repeat(65)).is_err());
    }
}
