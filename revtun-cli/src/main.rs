//! revtun command line
//!
//! Runs either side of a reverse TCP tunnel.

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "revtun",
    author,
    version,
    about = "Reverse TCP tunnel: expose services behind NAT through a public hub",
    long_about = "revtun runs a public hub that agents behind NAT join over a control connection.\n\n\
                  Tunnels are built through the hub's HTTP API: POST /tunnel with\n\
                  {\"m_addr\": \"<public bind>\", \"s_addr\": \"<target>\", \"s_name\": \"<agent>\"}.",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub (public side)
    Hub(commands::hub::HubArgs),

    /// Run an agent (private side)
    Agent(commands::agent::AgentArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Hub(args) => commands::hub::run(args).await,
        Commands::Agent(args) => commands::agent::run(args).await,
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
    }
}
