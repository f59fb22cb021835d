//! Configuration types for embedding revtun.
//!
//! Hubs and agents can be configured through their builders or from the
//! JSON file format shared with the CLI:
//!
//! ```rust,no_run
//! use revtun::config::Config;
//!
//! # fn example() -> revtun::Result<()> {
//! let hub = Config::from_file("hub.json")?.hub_config()?;
//! let hub = revtun::Hub::builder().config(hub).build()?;
//! # Ok(())
//! # }
//! ```

pub use revtun_common::config::{AgentConfig, Config, HubConfig, Role, Timeouts};
pub use revtun_common::constants::*;
