// src/health/prober.rs
use crate::backend::{Backend, ProbeOutcome, ProbeReason, Registry};
use crate::cluster::NodeReadiness;
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use reqwest::{Client, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Periodically probes every registered backend and writes the results into
/// the [`Registry`].
pub struct HealthProber {
    config: HealthCheckConfig,
    registry: Arc<Registry>,
    readiness: Option<Arc<dyn NodeReadiness>>,
    client: Client,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl HealthProber {
    pub fn new(
        config: HealthCheckConfig,
        registry: Arc<Registry>,
        readiness: Option<Arc<dyn NodeReadiness>>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .no_proxy()
            .build()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Ok(Self {
            config,
            registry,
            readiness,
            client,
            metrics,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Run the probe loop until [`HealthProber::shutdown`] is called.
    ///
    /// Each tick spawns one probe per backend and returns to the timer
    /// immediately; a slow backend never delays the others, and a probe that
    /// outlives its tick may overlap with the next one.
    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            interval = ?self.config.interval(),
            backends = self.registry.len(),
            readiness = self.readiness.is_some(),
            "Starting health prober"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.clone().probe_all();
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Health prober shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn probe_all(self: Arc<Self>) {
        debug!(backends = self.registry.len(), "Probing backends");
        for backend in self.registry.backends() {
            let prober = self.clone();
            let backend = backend.clone();
            tokio::spawn(async move {
                prober.probe_backend(&backend).await;
            });
        }
    }

    /// Probe one backend, record the outcome and update its health.
    pub async fn probe_backend(&self, backend: &Backend) -> ProbeOutcome {
        let start = Instant::now();
        let (healthy, reason) = self.evaluate(backend).await;
        let elapsed = start.elapsed();

        if let Some(metrics) = &self.metrics {
            metrics.record_probe(&backend.name, elapsed);
        }

        let outcome = ProbeOutcome::new(healthy, reason, elapsed.as_millis() as u64);
        let failures = backend.record_probe(outcome.clone());

        if healthy {
            self.registry.set_health(backend.address, true).await;
        } else {
            debug!(
                backend = %backend.name,
                address = %backend.address,
                reason = ?outcome.reason,
                failures,
                "Probe failed"
            );
            let demote = failures >= self.config.unhealthy_threshold
                || !self.registry.is_healthy(backend.address).await;
            if demote {
                self.registry.set_health(backend.address, false).await;
            }
        }

        outcome
    }

    async fn evaluate(&self, backend: &Backend) -> (bool, ProbeReason) {
        let target = SocketAddr::new(backend.address, self.config.port);
        let url = format!("http://{}{}", target, self.config.path);

        match self.client.get(&url).send().await {
            Ok(response) if response.status() == StatusCode::OK => {}
            Ok(response) => {
                return (
                    false,
                    ProbeReason::HttpFailed(format!("HTTP {}", response.status())),
                );
            }
            Err(e) => return (false, ProbeReason::HttpFailed(e.to_string())),
        }

        let Some(readiness) = &self.readiness else {
            return (true, ProbeReason::HttpOk);
        };

        match readiness.node_status(&backend.name).await {
            Err(e) => {
                debug!(
                    backend = %backend.name,
                    error = %e,
                    "Readiness lookup failed, falling back to HTTP result"
                );
                (true, ProbeReason::ReadinessUnavailable(e.to_string()))
            }
            Ok(status) if status.age < self.config.new_node_threshold() => {
                debug!(backend = %backend.name, age = ?status.age, "Node is still warming up");
                (false, ProbeReason::WarmingUp)
            }
            Ok(status) if status.ready => (true, ProbeReason::NodeReady),
            Ok(_) => (false, ProbeReason::NodeNotReady),
        }
    }
}
