//! Embeddable agent with builder pattern.
//!
//! # Example
//!
//! ```rust,no_run
//! use revtun::Agent;
//!
//! # async fn example() -> revtun::Result<()> {
//! let mut agent = Agent::builder("edge1")
//!     .hub_addr("hub.example.com:7701")
//!     .build()?;
//!
//! agent.start()?;
//! // ... later
//! agent.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use revtun_common::{AgentConfig, Result, Timeouts, TunnelError};
use revtun_core::AgentClient;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// An agent that joins a hub and serves its tunnels in the background.
///
/// The agent rejoins forever after failures; only [`shutdown`](Self::shutdown)
/// stops it.
#[derive(Debug)]
pub struct Agent {
    config: AgentConfig,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<Result<()>>>,
}

#[derive(Debug)]
pub struct AgentBuilder {
    config: AgentConfig,
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder {
            config: AgentConfig::new(name),
        }
    }

    /// Spawn the join loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Err(TunnelError::InvalidState("agent already started".into()));
        }

        let client = AgentClient::new(self.config.clone())?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        self.task = Some(tokio::spawn(async move { client.run(token).await }));
        self.cancel = Some(cancel);
        Ok(())
    }

    /// Run the join loop on the current task until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        AgentClient::new(self.config.clone())?.run(cancel).await
    }

    /// Stop the join loop and close every relay it owns.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stop();
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| TunnelError::Connection(format!("agent task panicked: {e}")))?,
            None => Ok(()),
        }
    }

    /// Signal the agent to stop without waiting.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop();
    }
}

impl AgentBuilder {
    /// Hub control address (`host:port`). Default: `127.0.0.1:7701`
    #[must_use]
    pub fn hub_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.hub_addr = addr.into();
        self
    }

    /// Fixed delay between join attempts. Default: 2 s
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    #[must_use]
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn splice_idle_timeout(mut self, idle: Duration) -> Self {
        self.config.splice_idle_timeout = Some(idle);
        self
    }

    /// Replace everything except the name with `config`.
    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = AgentConfig {
            name: self.config.name,
            ..config
        };
        self
    }

    /// # Errors
    ///
    /// Returns an error if the name or timeouts do not validate.
    pub fn build(self) -> Result<Agent> {
        self.config.validate()?;
        Ok(Agent {
            config: self.config,
            cancel: None,
            task: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_bad_name() {
        assert!(Agent::builder("").build().is_err());
        assert!(Agent::builder("x".repeat(300)).build().is_err());
        assert!(Agent::builder("edge1").build().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_while_hub_unreachable() {
        let mut agent = Agent::builder("edge1")
            .hub_addr("127.0.0.1:1")
            .retry_interval(Duration::from_millis(20))
            .build()
            .unwrap();

        agent.start().unwrap();
        assert!(agent.start().is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(2), agent.shutdown())
            .await
            .unwrap()
            .unwrap();
        assert!(!agent.is_running());
    }
}
