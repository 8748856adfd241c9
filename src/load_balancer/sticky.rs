// src/load_balancer/sticky.rs
use super::algorithm::BackendSelector;
use super::round_robin::RoundRobinCursor;
use crate::backend::Registry;
use crate::metrics::MetricsCollector;
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Sticky-session router: a client keeps its backend while that backend stays
/// healthy, otherwise it is reassigned round-robin.
///
/// Stale affinities are only discovered on lookup; nothing sweeps them.
pub struct SessionRouter {
    registry: Arc<Registry>,
    sessions: DashMap<IpAddr, IpAddr>,
    cursor: RoundRobinCursor,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SessionRouter {
    pub fn new(registry: Arc<Registry>, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self {
            registry,
            sessions: DashMap::new(),
            cursor: RoundRobinCursor::new(),
            metrics,
        }
    }

    /// Backend currently pinned for `client`, healthy or not.
    pub fn session(&self, client: IpAddr) -> Option<IpAddr> {
        self.sessions.get(&client).map(|entry| *entry.value())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    async fn sticky_backend(&self, client: IpAddr) -> Option<IpAddr> {
        // Copy out so the shard lock is not held across the health read.
        let pinned = self.session(client)?;
        if self.registry.is_healthy(pinned).await {
            return Some(pinned);
        }
        debug!(%client, backend = %pinned, "Pinned backend unhealthy, reselecting");
        None
    }

    async fn reselect(&self, client: IpAddr) -> Option<IpAddr> {
        let backends = self.registry.backends();
        let healthy = self.registry.health_snapshot().await;

        let Some(index) = self.cursor.next_eligible(backends.len(), |i| healthy[i]) else {
            warn!(%client, backends = backends.len(), "No healthy backend available");
            return None;
        };

        let backend = &backends[index];
        debug!(
            %client,
            backend = %backend.name,
            address = %backend.address,
            cursor = self.cursor.position(),
            "Assigned backend"
        );
        self.sessions.insert(client, backend.address);
        Some(backend.address)
    }
}

#[async_trait]
impl BackendSelector for SessionRouter {
    async fn select_backend(&self, client: IpAddr) -> Option<IpAddr> {
        let address = match self.sticky_backend(client).await {
            Some(address) => address,
            None => self.reselect(client).await?,
        };

        if let Some(metrics) = &self.metrics {
            if let Some(backend) = self.registry.find_by_address(address) {
                metrics.record_selection(&backend.name);
            }
        }

        Some(address)
    }

    fn evict_session(&self, client: IpAddr) {
        if let Some((_, backend)) = self.sessions.remove(&client) {
            debug!(%client, %backend, "Evicted session");
        }
    }

    fn name(&self) -> &'static str {
        "sticky_round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NodeDescriptor;
    use crate::metrics::MetricsRegistry;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    async fn router_with(
        backends: &[(&str, &str)],
        healthy: &[&str],
    ) -> (SessionRouter, Arc<Registry>) {
        let nodes = backends
            .iter()
            .map(|(name, addr)| NodeDescriptor::new(*name, ip(addr)))
            .collect();
        let registry = Arc::new(Registry::new(nodes, None).unwrap());
        for addr in healthy {
            registry.set_health(ip(addr), true).await;
        }
        (SessionRouter::new(registry.clone(), None), registry)
    }

    const ABC: [(&str, &str); 3] = [
        ("node-a", "10.1.0.1"),
        ("node-b", "10.1.0.2"),
        ("node-c", "10.1.0.3"),
    ];

    #[tokio::test]
    async fn test_failover_scenario() {
        let (router, registry) =
            router_with(&ABC, &["10.1.0.1", "10.1.0.2", "10.1.0.3"]).await;

        assert_eq!(router.select_backend(ip("10.0.0.1")).await, Some(ip("10.1.0.1")));
        assert_eq!(router.select_backend(ip("10.0.0.2")).await, Some(ip("10.1.0.2")));

        registry.set_health(ip("10.1.0.1"), false).await;

        assert_eq!(router.select_backend(ip("10.0.0.1")).await, Some(ip("10.1.0.3")));
        assert_eq!(router.session(ip("10.0.0.1")), Some(ip("10.1.0.3")));
    }

    #[tokio::test]
    async fn test_sticky_across_other_clients() {
        let (router, _registry) =
            router_with(&ABC, &["10.1.0.1", "10.1.0.2", "10.1.0.3"]).await;

        let first = router.select_backend(ip("192.168.0.9")).await.unwrap();
        for i in 0..10 {
            router.select_backend(ip(&format!("172.16.0.{}", i))).await;
            assert_eq!(router.select_backend(ip("192.168.0.9")).await, Some(first));
        }
    }

    #[tokio::test]
    async fn test_exhaustion_writes_no_session() {
        let (router, _registry) = router_with(&ABC, &[]).await;

        for i in 0..5 {
            assert_eq!(router.select_backend(ip(&format!("10.0.0.{}", i))).await, None);
        }
        assert_eq!(router.session_count(), 0);
    }

    #[tokio::test]
    async fn test_evict_forces_reselection() {
        let (router, _registry) =
            router_with(&ABC, &["10.1.0.1", "10.1.0.2", "10.1.0.3"]).await;
        let client = ip("10.0.0.7");

        assert_eq!(router.select_backend(client).await, Some(ip("10.1.0.1")));
        router.evict_session(client);
        assert_eq!(router.session(client), None);
        assert_eq!(router.select_backend(client).await, Some(ip("10.1.0.2")));
    }

    #[tokio::test]
    async fn test_selection_counts_requests() {
        let metrics = MetricsRegistry::new().unwrap();
        let registry = Arc::new(
            Registry::new(vec![NodeDescriptor::new("node-a", ip("10.1.0.1"))], None).unwrap(),
        );
        registry.set_health(ip("10.1.0.1"), true).await;
        let router = SessionRouter::new(registry, Some(metrics.collector()));

        router.select_backend(ip("10.0.0.1")).await;
        router.select_backend(ip("10.0.0.1")).await;

        let count = metrics
            .collector()
            .backend_requests_total
            .with_label_values(&["node-a"])
            .get();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_new_clients_spread_evenly() {
        let (router, _registry) =
            router_with(&ABC, &["10.1.0.1", "10.1.0.2", "10.1.0.3"]).await;
        let router = Arc::new(router);

        let tasks: Vec<_> = (0..3)
            .map(|i| {
                let router = router.clone();
                tokio::spawn(async move {
                    router.select_backend(ip(&format!("10.9.0.{}", i))).await
                })
            })
            .collect();

        let mut picks = HashSet::new();
        for task in tasks {
            picks.insert(task.await.unwrap().unwrap());
        }
        assert_eq!(picks.len(), 3);
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
    }

    fn addresses(n: usize) -> Vec<(String, String)> {
        (0..n)
            .map(|i| (format!("node-{:02}", i), format!("10.2.0.{}", i + 1)))
            .collect()
    }

    async fn router_from(
        nodes: &[(String, String)],
        healthy: &[bool],
    ) -> (SessionRouter, Arc<Registry>) {
        let registry = Arc::new(
            Registry::new(
                nodes
                    .iter()
                    .map(|(name, addr)| NodeDescriptor::new(name.clone(), ip(addr)))
                    .collect(),
                None,
            )
            .unwrap(),
        );
        for ((_, addr), up) in nodes.iter().zip(healthy) {
            registry.set_health(ip(addr), *up).await;
        }
        (SessionRouter::new(registry.clone(), None), registry)
    }

    proptest! {
        #[test]
        fn prop_never_selects_unhealthy(
            healthy in proptest::collection::vec(any::<bool>(), 1..8),
            clients in proptest::collection::vec(any::<u32>(), 1..32),
        ) {
            runtime().block_on(async {
                let nodes = addresses(healthy.len());
                let (router, registry) = router_from(&nodes, &healthy).await;
                for client in &clients {
                    let client = IpAddr::from(client.to_be_bytes());
                    match router.select_backend(client).await {
                        Some(addr) => assert!(registry.is_healthy(addr).await),
                        None => assert!(healthy.iter().all(|h| !h)),
                    }
                }
            });
        }

        #[test]
        fn prop_fresh_clients_visit_each_backend_once(n in 1usize..10) {
            runtime().block_on(async {
                let nodes = addresses(n);
                let (router, _registry) = router_from(&nodes, &vec![true; n]).await;
                let mut seen = HashSet::new();
                for i in 0..n {
                    let client = ip(&format!("10.3.{}.{}", i / 250, i % 250 + 1));
                    assert!(seen.insert(router.select_backend(client).await.unwrap()));
                }
                assert_eq!(seen.len(), n);
            });
        }
    }
}
