// src/load_balancer/algorithm.rs
use async_trait::async_trait;
use std::net::IpAddr;

/// Picks the backend address a client connection should be forwarded to.
#[async_trait]
pub trait BackendSelector: Send + Sync {
    /// `None` when no healthy backend is available.
    async fn select_backend(&self, client: IpAddr) -> Option<IpAddr>;

    /// Forget any affinity held for `client` so its next selection is fresh.
    fn evict_session(&self, client: IpAddr);

    fn name(&self) -> &'static str;
}
