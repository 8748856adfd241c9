// src/metrics/collector.rs
use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Text exposition of every registered metric.
    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("Failed to encode metrics")?;
        Ok(buffer)
    }
}

/// Outcome label for `lb_connections_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Proxied,
    NoBackend,
    DialFailed,
    Failed,
}

impl ConnectionOutcome {
    fn as_str(self) -> &'static str {
        match self {
            ConnectionOutcome::Proxied => "proxied",
            ConnectionOutcome::NoBackend => "no_backend",
            ConnectionOutcome::DialFailed => "dial_failed",
            ConnectionOutcome::Failed => "failed",
        }
    }
}

pub struct MetricsCollector {
    // Backend metrics
    pub backend_requests_total: IntCounterVec,
    pub backend_health_status: IntGaugeVec,
    pub probe_duration_seconds: HistogramVec,

    // Connection metrics
    pub connections_total: IntCounterVec,
    pub bytes_transferred_total: IntCounterVec,
    pub pool_checkouts_total: IntCounterVec,

    // System metrics
    pub active_connections: IntGauge,
    pub healthy_backends: IntGauge,
    pub total_backends: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let backend_requests_total = IntCounterVec::new(
            Opts::new(
                "lb_backend_requests_total",
                "Connections routed to each backend",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_requests_total.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "lb_backend_health_status",
                "Backend health status (1=healthy, 0=unhealthy)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let probe_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_probe_duration_seconds",
                "Health probe duration in seconds",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(probe_duration_seconds.clone()))?;

        let connections_total = IntCounterVec::new(
            Opts::new("lb_connections_total", "Accepted client connections"),
            &["listener", "outcome"],
        )?;
        registry.register(Box::new(connections_total.clone()))?;

        let bytes_transferred_total = IntCounterVec::new(
            Opts::new(
                "lb_bytes_transferred_total",
                "Bytes proxied between clients and backends",
            ),
            &["direction"],
        )?;
        registry.register(Box::new(bytes_transferred_total.clone()))?;

        let pool_checkouts_total = IntCounterVec::new(
            Opts::new(
                "lb_pool_checkouts_total",
                "Outbound connections obtained from the idle pool or dialed",
            ),
            &["result"],
        )?;
        registry.register(Box::new(pool_checkouts_total.clone()))?;

        let active_connections =
            IntGauge::new("lb_active_connections", "Total active connections")?;
        registry.register(Box::new(active_connections.clone()))?;

        let healthy_backends =
            IntGauge::new("lb_healthy_backends", "Number of healthy backends")?;
        registry.register(Box::new(healthy_backends.clone()))?;

        let total_backends =
            IntGauge::new("lb_total_backends", "Total number of backends")?;
        registry.register(Box::new(total_backends.clone()))?;

        Ok(Self {
            backend_requests_total,
            backend_health_status,
            probe_duration_seconds,
            connections_total,
            bytes_transferred_total,
            pool_checkouts_total,
            active_connections,
            healthy_backends,
            total_backends,
        })
    }

    pub fn record_selection(&self, backend: &str) {
        self.backend_requests_total
            .with_label_values(&[backend])
            .inc();
    }

    pub fn update_backend_health(&self, backend: &str, healthy: bool) {
        let value = if healthy { 1 } else { 0 };
        self.backend_health_status
            .with_label_values(&[backend])
            .set(value);
    }

    pub fn update_backend_counts(&self, healthy: usize, total: usize) {
        self.healthy_backends.set(healthy as i64);
        self.total_backends.set(total as i64);
    }

    pub fn record_probe(&self, backend: &str, duration: Duration) {
        self.probe_duration_seconds
            .with_label_values(&[backend])
            .observe(duration.as_secs_f64());
    }

    pub fn record_connection(&self, listener: &str, outcome: ConnectionOutcome) {
        self.connections_total
            .with_label_values(&[listener, outcome.as_str()])
            .inc();
    }

    pub fn record_transfer(&self, sent: u64, received: u64) {
        self.bytes_transferred_total
            .with_label_values(&["upstream"])
            .inc_by(sent);
        self.bytes_transferred_total
            .with_label_values(&["downstream"])
            .inc_by(received);
    }

    pub fn record_checkout(&self, reused: bool) {
        let result = if reused { "reused" } else { "dialed" };
        self.pool_checkouts_total.with_label_values(&[result]).inc();
    }

    pub fn increment_active_connections(&self) {
        self.active_connections.inc();
    }

    pub fn decrement_active_connections(&self) {
        self.active_connections.dec();
    }
}
