//! Hub subcommand implementation

use super::{shutdown_signal, LogArgs};
use anyhow::{Context, Result};
use clap::Args;
use revtun::config::{Config, HubConfig};
use revtun::Hub;
use revtun_observability::init_metrics;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct HubArgs {
    /// JSON config file; flags override its values
    #[arg(long, short, env = "REVTUN_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP API bind address
    #[arg(long, env = "REVTUN_API_BIND")]
    api_bind: Option<SocketAddr>,

    /// Control listener agents join
    #[arg(long, env = "REVTUN_CONTROL_BIND")]
    control_bind: Option<SocketAddr>,

    /// Relay listener agents dial back to
    #[arg(long, env = "REVTUN_TUNNEL_BIND")]
    tunnel_bind: Option<SocketAddr>,

    /// Relay address sent to agents (required when the relay binds 0.0.0.0)
    #[arg(long, env = "REVTUN_ADVERTISE")]
    advertise: Option<SocketAddr>,

    /// Expose Prometheus metrics on the API at /metrics
    #[arg(long, env = "REVTUN_METRICS")]
    metrics: bool,

    #[command(flatten)]
    log: LogArgs,
}

impl HubArgs {
    fn hub_config(&self) -> Result<HubConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let file = Config::from_file(path)
                    .with_context(|| format!("loading {}", path.display()))?;
                file.hub_config_unvalidated()?
            }
            None => HubConfig::default(),
        };
        if let Some(addr) = self.api_bind {
            config.api_addr = addr;
        }
        if let Some(addr) = self.control_bind {
            config.control_addr = addr;
        }
        if let Some(addr) = self.tunnel_bind {
            config.tunnel_addr = addr;
        }
        if let Some(addr) = self.advertise {
            config.advertise_addr = Some(addr);
        }
        Ok(config)
    }
}

pub async fn run(args: HubArgs) -> Result<()> {
    args.log.init()?;
    if args.metrics {
        init_metrics();
    }

    let config = args.hub_config()?;
    info!("Starting revtun hub v{}", env!("CARGO_PKG_VERSION"));

    let mut hub = Hub::builder().config(config).build()?;
    let info = hub.start().await?;
    info!(
        control = %info.control_addr,
        tunnel = %info.tunnel_addr,
        api = ?info.api_addr,
        "Hub ready"
    );

    tokio::select! {
        result = hub.wait() => result?,
        () = shutdown_signal() => {
            info!("Shutdown requested");
            hub.shutdown().await?;
        }
    }

    Ok(())
}
