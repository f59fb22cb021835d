//! Default ports, addresses and timing for revtun services.
//!
//! Use these constants instead of magic numbers so defaults stay consistent
//! across the library, CLI, and tests.

use revtun_protocol::constants::{HEARTBEAT_INTERVAL, NETWORK_TIMEOUT};
use std::time::Duration;

/// Default bind address for the build-request HTTP API.
pub const DEFAULT_API_BIND: &str = "0.0.0.0:7700";

/// Default bind address for agent control connections (JOIN).
pub const DEFAULT_CONTROL_BIND: &str = "0.0.0.0:7701";

/// Default bind address for dialled-back relay connections (BUILD_TUNNEL_ACK).
pub const DEFAULT_TUNNEL_BIND: &str = "0.0.0.0:7702";

/// Default hub control address an agent joins.
pub const DEFAULT_HUB_ADDR: &str = "127.0.0.1:7701";

/// Delay between join attempts. The agent retries forever.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Default heartbeat cadence on the control channel.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = HEARTBEAT_INTERVAL;

/// Default deadline for handshakes and control-channel I/O.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = NETWORK_TIMEOUT;

/// How long a terminating actor keeps draining its mailbox.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a hub-side client connection waits for its relay.
pub const DEFAULT_PENDING_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of every actor mailbox and outbound byte queue.
pub const MAILBOX_CAPACITY: usize = 100;
