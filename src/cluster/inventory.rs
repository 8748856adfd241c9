// src/cluster/inventory.rs
use super::{ClusterError, NodeDescriptor, NodeInventory};
use crate::config::BackendConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Inventory backed by configuration and an optional YAML/JSON file.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    backends: Vec<BackendConfig>,
    file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InventoryFile {
    Wrapped { backends: Vec<BackendConfig> },
    List(Vec<BackendConfig>),
}

impl StaticInventory {
    pub fn new(backends: Vec<BackendConfig>, file: Option<PathBuf>) -> Self {
        Self { backends, file }
    }

    async fn read_file(path: &Path) -> Result<Vec<BackendConfig>, ClusterError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ClusterError::Io {
                path: path.display().to_string(),
                source,
            })?;

        let is_yaml = matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("yaml") | Some("yml")
        );

        let parsed: InventoryFile = if is_yaml {
            serde_yaml::from_str(&contents).map_err(|e| ClusterError::Parse(e.to_string()))?
        } else {
            serde_json::from_str(&contents).map_err(|e| ClusterError::Parse(e.to_string()))?
        };

        Ok(match parsed {
            InventoryFile::Wrapped { backends } => backends,
            InventoryFile::List(backends) => backends,
        })
    }
}

#[async_trait]
impl NodeInventory for StaticInventory {
    async fn nodes(&self) -> Result<Vec<NodeDescriptor>, ClusterError> {
        let mut entries = self.backends.clone();
        if let Some(path) = &self.file {
            entries.extend(Self::read_file(path).await?);
        }

        let nodes = entries
            .iter()
            .map(|entry| NodeDescriptor::parse(entry.name.clone(), &entry.address))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(count = nodes.len(), "Loaded static inventory");
        Ok(nodes)
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn backend(name: &str, address: &str) -> BackendConfig {
        BackendConfig {
            name: name.into(),
            address: address.into(),
        }
    }

    #[tokio::test]
    async fn test_configured_backends() {
        let inventory = StaticInventory::new(
            vec![backend("node-a", "10.0.0.1:80"), backend("node-b", "10.0.0.2")],
            None,
        );

        let nodes = inventory.nodes().await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "node-a");
        assert_eq!(nodes[0].address, "10.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_yaml_file_is_merged() {
        let path = std::env::temp_dir().join(format!(
            "kube-tcp-balancer-inventory-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "backends:\n  - name: node-c\n    address: 10.0.0.3\n",
        )
        .unwrap();

        let inventory =
            StaticInventory::new(vec![backend("node-a", "10.0.0.1")], Some(path.clone()));
        let nodes = inventory.nodes().await.unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].name, "node-c");

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_invalid_address_fails() {
        let inventory = StaticInventory::new(vec![backend("node-a", "not-an-ip")], None);
        assert!(matches!(
            inventory.nodes().await,
            Err(ClusterError::InvalidAddress(_))
        ));
    }
}
