//! Protocol constants

use std::time::Duration;

/// Protocol version byte that opens every framed message
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Maximum agent name length in bytes
pub const MAX_NAME_LEN: usize = 64;

/// Width of a connection id on the wire
pub const CONN_ID_LEN: usize = 8;

/// Address type byte for IPv4 (4 address bytes follow)
pub const ATYP_IPV4: u8 = 0x01;

/// Address type byte for IPv6 (16 address bytes follow)
pub const ATYP_IPV6: u8 = 0x02;

/// Interval between agent heartbeats
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Deadline applied to handshakes and control-channel reads/writes
pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(4);
