//! revtun wire protocol
//!
//! Fixed-layout binary messages exchanged between a hub and its agents on
//! the control channel and on dialled-back relay connections.

pub mod address;
pub mod codec;
pub mod constants;
pub mod frame;
pub mod validation;

pub use address::Address;
pub use codec::{BuildTunnelPrefix, CodecError, Encode};
pub use frame::{
    BuildTunnel, BuildTunnelAck, Command, ConnectionId, Heartbeat, Join, JoinAck, Reply,
};
pub use validation::ProtocolError;
