pub mod agent;
pub mod hub;
pub mod version;

use clap::{Args, ValueEnum};
use revtun_observability::{init_logging, LogFormat, LoggingConfig};

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum LogFormatArg {
    #[default]
    Pretty,
    Json,
}

/// Logging flags shared by every subcommand
#[derive(Args, Debug)]
pub struct LogArgs {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info", env = "REVTUN_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormatArg::Pretty, env = "REVTUN_LOG_FORMAT")]
    pub log_format: LogFormatArg,
}

impl LogArgs {
    pub fn init(&self) -> anyhow::Result<()> {
        let format = match self.log_format {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        };
        init_logging(&LoggingConfig {
            level: self.log_level.clone(),
            format,
            ..LoggingConfig::default()
        })
    }
}

/// Resolve on Ctrl-C (or SIGTERM on unix).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
