//! Node inventory and readiness collaborators.
//!
//! The balancer consumes the inventory once at startup and the readiness
//! source on every probe tick. Both are traits so deployments without a
//! cluster API can run on a static backend list.

mod inventory;
mod kube;

pub use inventory::StaticInventory;
pub use kube::KubeClient;

use async_trait::async_trait;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid node address {0:?}")]
    InvalidAddress(String),

    #[error("Node {0} has no InternalIP address")]
    MissingAddress(String),

    #[error("Invalid creation timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse inventory: {0}")]
    Parse(String),

    #[error("Invalid cluster URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ClusterError {
    /// Client errors (bad credentials, unknown node) will not fix themselves.
    pub fn is_permanent(&self) -> bool {
        match self {
            ClusterError::Status { status, .. } => (400..500).contains(status),
            ClusterError::Http(_) | ClusterError::Io { .. } => false,
            _ => true,
        }
    }
}

/// A backend node as reported by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub address: IpAddr,
}

impl NodeDescriptor {
    pub fn new(name: impl Into<String>, address: IpAddr) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }

    pub fn parse(name: impl Into<String>, address: &str) -> Result<Self, ClusterError> {
        Ok(Self::new(name, parse_node_address(address)?))
    }
}

/// Parse a node address, dropping a port if one is present.
pub fn parse_node_address(raw: &str) -> Result<IpAddr, ClusterError> {
    let raw = raw.trim();
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Ok(ip);
    }
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(addr.ip());
    }
    Err(ClusterError::InvalidAddress(raw.to_string()))
}

/// Liveness information for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub ready: bool,
    pub age: Duration,
}

#[async_trait]
pub trait NodeInventory: Send + Sync {
    async fn nodes(&self) -> Result<Vec<NodeDescriptor>, ClusterError>;

    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait NodeReadiness: Send + Sync {
    async fn node_status(&self, node: &str) -> Result<NodeStatus, ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_port() {
        assert_eq!(
            parse_node_address("10.0.0.1:80").unwrap(),
            "10.0.0.1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            parse_node_address("[fd00::1]:443").unwrap(),
            "fd00::1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            parse_node_address(" 10.0.0.2 ").unwrap(),
            "10.0.0.2".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_parse_rejects_hostnames() {
        assert!(matches!(
            parse_node_address("node-a.cluster.local"),
            Err(ClusterError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_permanent_errors() {
        let forbidden = ClusterError::Status {
            url: "https://api/nodes".into(),
            status: 403,
        };
        let unavailable = ClusterError::Status {
            url: "https://api/nodes".into(),
            status: 503,
        };
        assert!(forbidden.is_permanent());
        assert!(!unavailable.is_permanent());
    }
}
