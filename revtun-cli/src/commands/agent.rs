//! Agent subcommand implementation

use super::{shutdown_signal, LogArgs};
use anyhow::{bail, Context, Result};
use clap::Args;
use revtun::config::{AgentConfig, Config};
use revtun::Agent;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Args, Debug)]
pub struct AgentArgs {
    /// JSON config file; flags override its values
    #[arg(long, short, env = "REVTUN_CONFIG")]
    config: Option<PathBuf>,

    /// Agent name, unique per hub
    #[arg(long, env = "REVTUN_NAME")]
    name: Option<String>,

    /// Hub control address (host:port)
    #[arg(long, env = "REVTUN_HUB")]
    hub: Option<String>,

    /// Delay between join attempts, in milliseconds
    #[arg(long, env = "REVTUN_RETRY_MS")]
    retry_ms: Option<u64>,

    #[command(flatten)]
    log: LogArgs,
}

impl AgentArgs {
    fn agent_config(&self) -> Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let mut file = Config::from_file(path)
                    .with_context(|| format!("loading {}", path.display()))?;
                if self.name.is_some() {
                    file.name.clone_from(&self.name);
                }
                file.agent_config_unvalidated()?
            }
            None => match &self.name {
                Some(name) => AgentConfig::new(name.clone()),
                None => bail!("an agent name is required (--name or config file)"),
            },
        };
        if let Some(name) = &self.name {
            config.name.clone_from(name);
        }
        if let Some(hub) = &self.hub {
            config.hub_addr.clone_from(hub);
        }
        if let Some(ms) = self.retry_ms {
            config.retry_interval = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

pub async fn run(args: AgentArgs) -> Result<()> {
    args.log.init()?;

    let config = args.agent_config()?;
    let agent = Agent::builder(config.name.clone()).config(config).build()?;
    info!(
        agent = %agent.name(),
        hub = %agent.config().hub_addr,
        "Starting revtun agent v{}",
        env!("CARGO_PKG_VERSION")
    );

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested");
        stop.cancel();
    });

    agent.run(cancel).await?;
    Ok(())
}
