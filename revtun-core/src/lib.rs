pub mod agent;
pub mod conn;
pub mod conn_id;
pub mod hub;
pub mod mailbox;
pub mod reconnect;
pub mod transport;

// Re-export specific items for convenience
pub use agent::AgentClient;
pub use hub::{BuildTunnelRequest, HubHandle, HubServer};
