// src/main.rs
use anyhow::{Context, Result};
use kube_tcp_balancer::{
    backend::Registry,
    cluster::{ClusterError, KubeClient, NodeDescriptor, NodeInventory, NodeReadiness, StaticInventory},
    config::{self, Config},
    health::HealthProber,
    load_balancer::{BackendSelector, SessionRouter},
    metrics::MetricsRegistry,
    proxy::{ConnectionPool, ListenerSettings, TcpProxy},
    retry::{RetryDecision, RetryStrategy},
    server::{AdminHandler, ServerBuilder},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    let config = config::load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
                .add_directive("hyper=info".parse()?),
        )
        .init();

    info!(config = %config_path, version = env!("CARGO_PKG_VERSION"), "Starting kube-tcp-balancer");

    let metrics_registry = Arc::new(MetricsRegistry::new()?);
    let metrics = metrics_registry.collector();

    let kube = KubeClient::from_config(&config.cluster)
        .await
        .context("Failed to configure cluster client")?
        .map(Arc::new);

    let inventory: Arc<dyn NodeInventory> = match &kube {
        Some(kube) => kube.clone() as Arc<dyn NodeInventory>,
        None => Arc::new(StaticInventory::new(
            config.backends.clone(),
            config.inventory_file.clone(),
        )),
    };

    let nodes = fetch_inventory(&config, inventory.as_ref()).await?;
    let registry = Arc::new(Registry::new(nodes, Some(metrics.clone()))?);

    let readiness: Option<Arc<dyn NodeReadiness>> = match &kube {
        Some(kube) if config.cluster.readiness => Some(kube.clone() as Arc<dyn NodeReadiness>),
        _ => None,
    };

    let prober = Arc::new(HealthProber::new(
        config.health_check.clone(),
        registry.clone(),
        readiness,
        Some(metrics.clone()),
    )?);
    tokio::spawn(prober.clone().start());

    if config.metrics.enabled {
        let admin_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        let handler = AdminHandler::new(
            registry.clone(),
            metrics_registry.clone(),
            &config.metrics.path,
        );
        let (_, admin) = ServerBuilder::new(admin_addr)
            .with_handler(handler)
            .bind()
            .await?;
        tokio::spawn(async move {
            if let Err(e) = admin.serve().await {
                error!(error = %e, "Admin server error");
            }
        });
    }

    let router: Arc<dyn BackendSelector> =
        Arc::new(SessionRouter::new(registry.clone(), Some(metrics.clone())));
    info!(algorithm = router.name(), backends = registry.len(), "Router ready");

    let pool = config
        .proxy
        .pool
        .enabled
        .then(|| Arc::new(ConnectionPool::from_config(&config.proxy.pool)));

    let listeners = [
        ("http", config.frontend_http_port, config.backend_http_port),
        ("https", config.frontend_https_port, config.backend_https_port),
    ];

    let mut running = 0;
    for (name, frontend_port, backend_port) in listeners {
        let settings = ListenerSettings::new(name, ([0, 0, 0, 0], frontend_port).into(), backend_port)
            .with_proxy_config(&config.proxy);

        match TcpProxy::bind(settings, router.clone(), pool.clone(), Some(metrics.clone())).await {
            Ok(proxy) => {
                running += 1;
                tokio::spawn(async move {
                    if let Err(e) = Arc::new(proxy).run().await {
                        error!(listener = name, error = %e, "Listener stopped");
                    }
                });
            }
            Err(e) => error!(listener = name, port = frontend_port, error = %e, "Failed to bind listener"),
        }
    }

    if running == 0 {
        warn!("No frontend listener is running");
    }

    shutdown_signal().await;
    prober.shutdown();
    info!("Shutdown complete");

    Ok(())
}

async fn fetch_inventory(config: &Config, inventory: &dyn NodeInventory) -> Result<Vec<NodeDescriptor>> {
    let strategy = RetryStrategy::new(config.inventory_retry.clone());

    let nodes = strategy
        .execute_with_decision(
            || inventory.nodes(),
            |error: &ClusterError| {
                if error.is_permanent() {
                    RetryDecision::NoRetry
                } else {
                    RetryDecision::Retry
                }
            },
        )
        .await
        .with_context(|| format!("Failed to fetch node inventory from {}", inventory.name()))?;

    info!(source = inventory.name(), nodes = nodes.len(), "Fetched node inventory");
    Ok(nodes)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
