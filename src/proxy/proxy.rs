// src/proxy/proxy.rs
use super::copy::{pump, Transfer};
use super::pool::{dial, ConnectionPool};
use crate::config::ProxyConfig;
use crate::load_balancer::BackendSelector;
use crate::metrics::{ConnectionOutcome, MetricsCollector};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy backends available")]
    NoHealthyBackends,

    #[error("Failed to connect to backend {addr}: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// One frontend port and the backend data port it forwards to.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Label used in logs and metrics, e.g. `http` or `https`.
    pub name: String,
    pub bind_addr: SocketAddr,
    pub backend_port: u16,
    pub connect_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_connections: Option<usize>,
}

impl ListenerSettings {
    pub fn new(name: impl Into<String>, bind_addr: SocketAddr, backend_port: u16) -> Self {
        let defaults = ProxyConfig::default();
        Self {
            name: name.into(),
            bind_addr,
            backend_port,
            connect_timeout: defaults.connect_timeout(),
            idle_timeout: defaults.idle_timeout(),
            max_connections: None,
        }
    }

    pub fn with_proxy_config(mut self, config: &ProxyConfig) -> Self {
        self.connect_timeout = config.connect_timeout();
        self.idle_timeout = config.idle_timeout();
        self.max_connections = config.max_connections;
        self
    }
}

/// Per-listener counters.
#[derive(Debug, Default)]
pub struct ProxyStats {
    pub connections_accepted: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_closed: AtomicU64,
    pub no_backend: AtomicU64,
    pub dial_failures: AtomicU64,
    pub bytes_to_backend: AtomicU64,
    pub bytes_from_backend: AtomicU64,
}

/// Summary of one completed connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionReport {
    pub backend: SocketAddr,
    pub transfer: Transfer,
    pub reused: bool,
}

impl ConnectionReport {
    /// Transfers cut short by an I/O error or the idle timeout count as failed.
    pub fn outcome(&self) -> ConnectionOutcome {
        if self.transfer.clean {
            ConnectionOutcome::Proxied
        } else {
            ConnectionOutcome::Failed
        }
    }
}

/// Layer-4 proxy for one frontend port.
pub struct TcpProxy {
    settings: ListenerSettings,
    listener: TcpListener,
    selector: Arc<dyn BackendSelector>,
    pool: Option<Arc<ConnectionPool>>,
    limiter: Option<Arc<Semaphore>>,
    metrics: Option<Arc<MetricsCollector>>,
    stats: Arc<ProxyStats>,
}

impl TcpProxy {
    pub async fn bind(
        settings: ListenerSettings,
        selector: Arc<dyn BackendSelector>,
        pool: Option<Arc<ConnectionPool>>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(settings.bind_addr).await?;

        info!(
            listener = %settings.name,
            bind_addr = %listener.local_addr()?,
            backend_port = settings.backend_port,
            pooling = pool.is_some(),
            "TCP listener bound"
        );

        Ok(Self {
            limiter: settings
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max))),
            settings,
            listener,
            selector,
            pool,
            metrics,
            stats: Arc::new(ProxyStats::default()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<ProxyStats> {
        self.stats.clone()
    }

    /// Accept connections forever, handling each on its own task.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        loop {
            // Taken before accepting so a full listener leaves new clients in
            // the kernel backlog.
            let permit = match &self.limiter {
                Some(limiter) => match limiter.clone().acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return Ok(()),
                },
                None => None,
            };

            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(listener = %self.settings.name, error = %e, "Accept error");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            self.stats
                .connections_accepted
                .fetch_add(1, Ordering::Relaxed);
            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.increment_active_connections();
            }

            let proxy = self.clone();
            let span = tracing::info_span!(
                "connection",
                id = %Uuid::new_v4(),
                listener = %self.settings.name,
                %peer
            );

            tokio::spawn(
                async move {
                    let outcome = match proxy.handle_connection(stream, peer).await {
                        Ok(report) => {
                            debug!(
                                backend = %report.backend,
                                bytes_sent = report.transfer.sent,
                                bytes_received = report.transfer.received,
                                total = report.transfer.total(),
                                reused = report.reused,
                                clean = report.transfer.clean,
                                "Connection closed"
                            );
                            report.outcome()
                        }
                        Err(ProxyError::NoHealthyBackends) => {
                            warn!("No healthy backend available, closing client");
                            ConnectionOutcome::NoBackend
                        }
                        Err(e @ ProxyError::Dial { .. }) => {
                            warn!(error = %e, "Closing client");
                            ConnectionOutcome::DialFailed
                        }
                    };

                    if let Some(metrics) = &proxy.metrics {
                        metrics.record_connection(&proxy.settings.name, outcome);
                        metrics.decrement_active_connections();
                    }
                    proxy.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                    proxy.stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                    drop(permit);
                }
                .instrument(span),
            );
        }
    }

    /// Route one client connection and proxy it to completion.
    pub async fn handle_connection(
        &self,
        mut client: TcpStream,
        peer: SocketAddr,
    ) -> Result<ConnectionReport, ProxyError> {
        let client_ip = peer.ip();

        let Some(backend_ip) = self.selector.select_backend(client_ip).await else {
            self.stats.no_backend.fetch_add(1, Ordering::Relaxed);
            return Err(ProxyError::NoHealthyBackends);
        };

        let backend_addr = SocketAddr::new(backend_ip, self.settings.backend_port);
        let (mut backend, reused) = self.checkout(client_ip, backend_addr).await?;

        debug!(backend = %backend_addr, reused, "Connected to backend");

        let transfer = pump(&mut client, &mut backend, self.settings.idle_timeout).await;

        self.stats
            .bytes_to_backend
            .fetch_add(transfer.sent, Ordering::Relaxed);
        self.stats
            .bytes_from_backend
            .fetch_add(transfer.received, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_transfer(transfer.sent, transfer.received);
        }

        // Both directions ended in EOF or an error, so the backend has already
        // finished with this socket; it is closed here rather than pooled.
        drop(backend);

        Ok(ConnectionReport {
            backend: backend_addr,
            transfer,
            reused,
        })
    }

    async fn checkout(
        &self,
        client_ip: IpAddr,
        backend_addr: SocketAddr,
    ) -> Result<(TcpStream, bool), ProxyError> {
        if let Some(pool) = &self.pool {
            if let Some(stream) = pool.acquire(backend_addr) {
                self.record_checkout(true);
                self.spawn_replenish(pool.clone(), backend_addr);
                return Ok((stream, true));
            }
        }

        match dial(backend_addr, self.settings.connect_timeout).await {
            Ok(stream) => {
                self.record_checkout(false);
                if let Some(pool) = &self.pool {
                    self.spawn_replenish(pool.clone(), backend_addr);
                }
                Ok((stream, false))
            }
            Err(source) => {
                self.stats.dial_failures.fetch_add(1, Ordering::Relaxed);
                // Next attempt from this client starts from a fresh selection.
                self.selector.evict_session(client_ip);
                Err(ProxyError::Dial {
                    addr: backend_addr,
                    source,
                })
            }
        }
    }

    fn record_checkout(&self, reused: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_checkout(reused);
        }
    }

    fn spawn_replenish(&self, pool: Arc<ConnectionPool>, backend_addr: SocketAddr) {
        let connect_timeout = self.settings.connect_timeout;
        tokio::spawn(async move {
            if let Err(e) = pool.replenish(backend_addr, connect_timeout).await {
                debug!(backend = %backend_addr, error = %e, "Failed to replenish idle pool");
            }
        });
    }
}
