//! Prometheus metrics for hubs and agents
//!
//! Metrics are registered lazily into [`REGISTRY`] the first time
//! [`init_metrics`] runs. Until then [`tunnel_metrics`] returns `None` and
//! recording sites cost a single atomic load.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static ENABLED: AtomicBool = AtomicBool::new(false);

static METRICS: LazyLock<TunnelMetrics> = LazyLock::new(|| TunnelMetrics::register(&REGISTRY));

/// How a public client connection ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Paired with a relay and spliced
    Spliced,
    /// Agent could not reach the target
    Refused,
    /// Closed before a relay arrived
    Dropped,
}

impl ConnectionOutcome {
    fn label(self) -> &'static str {
        match self {
            Self::Spliced => "spliced",
            Self::Refused => "refused",
            Self::Dropped => "dropped",
        }
    }
}

/// Direction of relayed bytes, seen from the public client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Egress => "egress",
        }
    }
}

pub struct TunnelMetrics {
    agents_connected: IntGauge,
    active_tunnels: IntGauge,
    connections_total: IntCounterVec,
    bytes_relayed_total: IntCounterVec,
    join_attempts_total: IntCounterVec,
}

impl TunnelMetrics {
    fn register(registry: &Registry) -> Self {
        let agents_connected =
            IntGauge::new("revtun_agents_connected", "Agents currently joined to the hub")
                .unwrap();
        let active_tunnels =
            IntGauge::new("revtun_active_tunnels", "Public listeners currently open").unwrap();
        let connections_total = IntCounterVec::new(
            Opts::new(
                "revtun_connections_total",
                "Public client connections by outcome",
            ),
            &["outcome"],
        )
        .unwrap();
        let bytes_relayed_total = IntCounterVec::new(
            Opts::new("revtun_bytes_relayed_total", "Bytes spliced by direction"),
            &["direction"],
        )
        .unwrap();
        let join_attempts_total = IntCounterVec::new(
            Opts::new("revtun_join_attempts_total", "JOIN handshakes by result"),
            &["result"],
        )
        .unwrap();

        registry.register(Box::new(agents_connected.clone())).unwrap();
        registry.register(Box::new(active_tunnels.clone())).unwrap();
        registry.register(Box::new(connections_total.clone())).unwrap();
        registry.register(Box::new(bytes_relayed_total.clone())).unwrap();
        registry.register(Box::new(join_attempts_total.clone())).unwrap();

        Self {
            agents_connected,
            active_tunnels,
            connections_total,
            bytes_relayed_total,
            join_attempts_total,
        }
    }

    pub fn agent_joined(&self) {
        self.agents_connected.inc();
    }

    pub fn agent_left(&self) {
        self.agents_connected.dec();
    }

    pub fn tunnel_opened(&self) {
        self.active_tunnels.inc();
    }

    pub fn tunnel_closed(&self) {
        self.active_tunnels.dec();
    }

    pub fn record_connection(&self, outcome: ConnectionOutcome) {
        self.connections_total
            .with_label_values(&[outcome.label()])
            .inc();
    }

    pub fn record_bytes(&self, direction: Direction, bytes: u64) {
        self.bytes_relayed_total
            .with_label_values(&[direction.label()])
            .inc_by(bytes);
    }

    /// `result` is a short reason such as `accepted` or `duplicate`.
    pub fn record_join(&self, result: &str) {
        self.join_attempts_total.with_label_values(&[result]).inc();
    }
}

/// Register all metrics and start recording.
pub fn init_metrics() {
    LazyLock::force(&METRICS);
    ENABLED.store(true, Ordering::Release);
}

pub fn metrics_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

pub fn tunnel_metrics() -> Option<&'static TunnelMetrics> {
    if metrics_enabled() {
        Some(&METRICS)
    } else {
        None
    }
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_after_init() {
        init_metrics();
        let m = tunnel_metrics().unwrap();
        m.agent_joined();
        m.record_connection(ConnectionOutcome::Spliced);
        m.record_bytes(Direction::Ingress, 4);
        m.record_join("accepted");

        let text = gather_metrics();
        assert!(text.contains("revtun_agents_connected"));
        assert!(text.contains("revtun_connections_total{outcome=\"spliced\"}"));
        assert!(text.contains("revtun_bytes_relayed_total{direction=\"ingress\"}"));
        assert!(text.contains("revtun_join_attempts_total{result=\"accepted\"}"));
    }
}
