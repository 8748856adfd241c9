// src/backend/registry.rs
use super::backend::{Backend, HealthStatus, ProbeOutcome};
use crate::cluster::NodeDescriptor;
use crate::metrics::MetricsCollector;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Duplicate backend name {0}")]
    DuplicateName(String),

    #[error("Backends {first} and {second} share address {address}")]
    DuplicateAddress {
        address: IpAddr,
        first: String,
        second: String,
    },
}

/// Fixed set of backends plus their health, keyed by address.
///
/// Every registered address always has a health entry; a missing entry reads
/// as unhealthy.
pub struct Registry {
    by_name: BTreeMap<String, Arc<Backend>>,
    /// Name order; the round-robin cursor indexes into this.
    ordered: Vec<Arc<Backend>>,
    health: RwLock<HashMap<IpAddr, bool>>,
    metrics: Option<Arc<MetricsCollector>>,
}

/// Point-in-time view of one backend for the admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BackendState {
    pub name: String,
    pub address: IpAddr,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_probe: Option<ProbeOutcome>,
}

impl Registry {
    pub fn new(
        nodes: Vec<NodeDescriptor>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self, RegistryError> {
        let mut by_name = BTreeMap::new();
        let mut owners: HashMap<IpAddr, String> = HashMap::new();

        for node in nodes {
            if by_name.contains_key(&node.name) {
                return Err(RegistryError::DuplicateName(node.name));
            }
            if let Some(first) = owners.get(&node.address) {
                return Err(RegistryError::DuplicateAddress {
                    address: node.address,
                    first: first.clone(),
                    second: node.name,
                });
            }

            debug!(backend = %node.name, address = %node.address, "Registered backend");
            owners.insert(node.address, node.name.clone());
            by_name.insert(
                node.name.clone(),
                Arc::new(Backend::new(node.name, node.address)),
            );
        }

        let ordered: Vec<Arc<Backend>> = by_name.values().cloned().collect();
        let health = ordered.iter().map(|b| (b.address, false)).collect();

        if ordered.is_empty() {
            warn!("Backend registry is empty; every connection will be refused");
        }

        if let Some(metrics) = &metrics {
            metrics.update_backend_counts(0, ordered.len());
            for backend in &ordered {
                metrics.update_backend_health(&backend.name, false);
            }
        }

        Ok(Self {
            by_name,
            ordered,
            health: RwLock::new(health),
            metrics,
        })
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.ordered
    }

    pub fn get(&self, name: &str) -> Option<Arc<Backend>> {
        self.by_name.get(name).cloned()
    }

    pub fn find_by_address(&self, address: IpAddr) -> Option<&Arc<Backend>> {
        self.ordered.iter().find(|b| b.address == address)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Update one backend's health. Returns whether the value changed.
    pub async fn set_health(&self, address: IpAddr, healthy: bool) -> bool {
        let (previous, healthy_count) = {
            let mut health = self.health.write().await;
            let Some(slot) = health.get_mut(&address) else {
                debug!(%address, "Ignoring health update for unregistered address");
                return false;
            };
            let previous = std::mem::replace(slot, healthy);
            (previous, health.values().filter(|h| **h).count())
        };

        if previous == healthy {
            return false;
        }

        let name = self
            .find_by_address(address)
            .map(|b| b.name.as_str())
            .unwrap_or("unknown");

        if healthy {
            info!(backend = %name, %address, healthy_count, "Backend is now healthy");
        } else {
            warn!(backend = %name, %address, healthy_count, "Backend is now unhealthy");
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(name, healthy);
            metrics.update_backend_counts(healthy_count, self.ordered.len());
        }

        true
    }

    pub async fn is_healthy(&self, address: IpAddr) -> bool {
        self.health
            .read()
            .await
            .get(&address)
            .copied()
            .unwrap_or(false)
    }

    /// Health flags aligned with [`Registry::backends`], taken under one read.
    pub async fn health_snapshot(&self) -> Vec<bool> {
        let health = self.health.read().await;
        self.ordered
            .iter()
            .map(|b| health.get(&b.address).copied().unwrap_or(false))
            .collect()
    }

    pub async fn healthy_count(&self) -> usize {
        self.health.read().await.values().filter(|h| **h).count()
    }

    pub async fn snapshot(&self) -> Vec<BackendState> {
        let flags = self.health_snapshot().await;
        self.ordered
            .iter()
            .zip(flags)
            .map(|(backend, healthy)| BackendState {
                name: backend.name.clone(),
                address: backend.address,
                status: match (backend.last_probe().is_some(), healthy) {
                    (false, _) => HealthStatus::Unknown,
                    (true, true) => HealthStatus::Healthy,
                    (true, false) => HealthStatus::Unhealthy,
                },
                consecutive_failures: backend.consecutive_failures(),
                last_probe: backend.last_probe(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ProbeReason;
    use crate::metrics::MetricsRegistry;

    fn node(name: &str, ip: &str) -> NodeDescriptor {
        NodeDescriptor::new(name, ip.parse().unwrap())
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_backends_start_unhealthy_in_name_order() {
        let registry = Registry::new(
            vec![node("node-c", "10.0.0.3"), node("node-a", "10.0.0.1")],
            None,
        )
        .unwrap();

        let names: Vec<_> = registry.backends().iter().map(|b| b.name.clone()).collect();
        assert_eq!(names, vec!["node-a", "node-c"]);
        assert!(!registry.is_healthy(ip("10.0.0.1")).await);
        assert_eq!(registry.health_snapshot().await, vec![false, false]);
        assert_eq!(registry.snapshot().await[0].status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_unknown_address_is_unhealthy() {
        let registry = Registry::new(vec![node("node-a", "10.0.0.1")], None).unwrap();
        assert!(!registry.is_healthy(ip("192.168.1.1")).await);
        assert!(!registry.set_health(ip("192.168.1.1"), true).await);
        assert!(!registry.is_healthy(ip("192.168.1.1")).await);
    }

    #[tokio::test]
    async fn test_set_health_reports_transitions_only() {
        let metrics = MetricsRegistry::new().unwrap();
        let registry = Registry::new(
            vec![node("node-a", "10.0.0.1"), node("node-b", "10.0.0.2")],
            Some(metrics.collector()),
        )
        .unwrap();

        assert!(registry.set_health(ip("10.0.0.1"), true).await);
        assert!(!registry.set_health(ip("10.0.0.1"), true).await);
        assert_eq!(registry.healthy_count().await, 1);
        assert_eq!(metrics.collector().healthy_backends.get(), 1);
        assert_eq!(metrics.collector().total_backends.get(), 2);

        assert!(registry.set_health(ip("10.0.0.1"), false).await);
        assert_eq!(metrics.collector().healthy_backends.get(), 0);
    }

    #[tokio::test]
    async fn test_rejects_duplicates() {
        assert!(matches!(
            Registry::new(vec![node("a", "10.0.0.1"), node("a", "10.0.0.2")], None),
            Err(RegistryError::DuplicateName(_))
        ));
        assert!(matches!(
            Registry::new(vec![node("a", "10.0.0.1"), node("b", "10.0.0.1")], None),
            Err(RegistryError::DuplicateAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_snapshot_reflects_probe_state() {
        let registry = Registry::new(vec![node("node-a", "10.0.0.1")], None).unwrap();
        let backend = registry.get("node-a").unwrap();

        backend.record_probe(ProbeOutcome::new(true, ProbeReason::HttpOk, 2));
        registry.set_health(backend.address, true).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, HealthStatus::Healthy);
        assert!(snapshot[0].last_probe.is_some());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json[0]["status"], "healthy");
        assert_eq!(json[0]["last_probe"]["reason"], "http_ok");
    }
}
