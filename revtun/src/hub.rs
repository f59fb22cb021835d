//! Embeddable hub with builder pattern.
//!
//! # Example
//!
//! ```rust,no_run
//! use revtun::Hub;
//!
//! # async fn example() -> revtun::Result<()> {
//! let mut hub = Hub::builder()
//!     .control_bind("0.0.0.0:7701".parse().unwrap())
//!     .tunnel_bind("0.0.0.0:7702".parse().unwrap())
//!     .advertise("203.0.113.7:7702".parse().unwrap())
//!     .build()?;
//!
//! let info = hub.start().await?;
//! println!("control on {}", info.control_addr);
//! hub.wait().await?;
//! # Ok(())
//! # }
//! ```

use crate::api;
use revtun_common::{HubConfig, Result, Timeouts, TunnelError};
use revtun_core::{HubHandle, HubServer};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Addresses a started hub actually bound.
#[derive(Debug, Clone, Copy)]
pub struct HubInfo {
    pub control_addr: SocketAddr,
    pub tunnel_addr: SocketAddr,
    /// `None` when the HTTP API is disabled
    pub api_addr: Option<SocketAddr>,
}

/// A hub that can be embedded in your application.
///
/// Use [`Hub::builder()`] to create one.
#[derive(Debug)]
pub struct Hub {
    config: HubConfig,
    serve_api: bool,
    handle: Option<HubHandle>,
    api_stop: Option<CancellationToken>,
    task: Option<JoinHandle<Result<()>>>,
    api_task: Option<JoinHandle<()>>,
}

/// Builder for constructing a [`Hub`].
#[derive(Debug)]
pub struct HubBuilder {
    config: HubConfig,
    serve_api: bool,
}

impl Default for HubBuilder {
    fn default() -> Self {
        Self {
            config: HubConfig::default(),
            serve_api: true,
        }
    }
}

impl Hub {
    pub fn builder() -> HubBuilder {
        HubBuilder::default()
    }

    /// Bind every listener and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is already running or a listener cannot
    /// be bound.
    pub async fn start(&mut self) -> Result<HubInfo> {
        if self.task.is_some() {
            return Err(TunnelError::InvalidState("hub already started".into()));
        }

        let server = HubServer::bind(self.config.clone()).await?;
        let control_addr = server.control_addr()?;
        let tunnel_addr = server.tunnel_addr()?;
        let handle = server.handle();

        let api_addr = if self.serve_api {
            let listener = TcpListener::bind(self.config.api_addr).await.map_err(|e| {
                TunnelError::Io(std::io::Error::new(
                    e.kind(),
                    format!("bind {}: {e}", self.config.api_addr),
                ))
            })?;
            let api_addr = listener.local_addr()?;
            let stop = CancellationToken::new();
            let app = api::router(handle.clone());
            let shutdown = stop.clone();
            self.api_task = Some(tokio::spawn(async move {
                info!("API listening on http://{}", api_addr);
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
                {
                    error!("API server error: {}", e);
                }
            }));
            self.api_stop = Some(stop);
            Some(api_addr)
        } else {
            None
        };

        self.task = Some(tokio::spawn(server.run()));
        self.handle = Some(handle);

        Ok(HubInfo {
            control_addr,
            tunnel_addr,
            api_addr,
        })
    }

    /// Handle for issuing build requests; `None` before [`start`](Self::start).
    pub fn handle(&self) -> Option<HubHandle> {
        self.handle.clone()
    }

    /// Wait until the hub stops on its own or via [`stop`](Self::stop).
    pub async fn wait(&mut self) -> Result<()> {
        let result = match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| TunnelError::Connection(format!("hub task panicked: {e}")))?,
            None => Ok(()),
        };
        self.stop_api().await;
        result
    }

    /// Shut the hub down and wait for every agent session to be told.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stop();
        self.wait().await
    }

    /// Signal the hub to stop without waiting.
    pub fn stop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.shutdown();
        }
        if let Some(stop) = &self.api_stop {
            stop.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    async fn stop_api(&mut self) {
        if let Some(stop) = self.api_stop.take() {
            stop.cancel();
        }
        if let Some(task) = self.api_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.stop();
    }
}

impl HubBuilder {
    /// Control listener. Default: `0.0.0.0:7701`
    #[must_use]
    pub fn control_bind(mut self, addr: SocketAddr) -> Self {
        self.config.control_addr = addr;
        self
    }

    /// Relay listener. Default: `0.0.0.0:7702`
    #[must_use]
    pub fn tunnel_bind(mut self, addr: SocketAddr) -> Self {
        self.config.tunnel_addr = addr;
        self
    }

    /// HTTP API listener. Default: `0.0.0.0:7700`
    #[must_use]
    pub fn api_bind(mut self, addr: SocketAddr) -> Self {
        self.config.api_addr = addr;
        self
    }

    /// Do not serve the HTTP API; tunnels are then built through
    /// [`Hub::handle`] only.
    #[must_use]
    pub fn without_api(mut self) -> Self {
        self.serve_api = false;
        self
    }

    /// Relay address agents are told to dial back to. Required when the
    /// relay listener binds an unspecified address.
    #[must_use]
    pub fn advertise(mut self, addr: SocketAddr) -> Self {
        self.config.advertise_addr = Some(addr);
        self
    }

    #[must_use]
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    /// Close spliced connections that carry no data for `idle`.
    #[must_use]
    pub fn splice_idle_timeout(mut self, idle: Duration) -> Self {
        self.config.splice_idle_timeout = Some(idle);
        self
    }

    /// Start from a config loaded elsewhere, e.g. a JSON file.
    #[must_use]
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn build(self) -> Result<Hub> {
        self.config.validate()?;
        Ok(Hub {
            config: self.config,
            serve_api: self.serve_api,
            handle: None,
            api_stop: None,
            task: None,
            api_task: None,
        })
    }
}
