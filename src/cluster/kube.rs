// src/cluster/kube.rs
use super::{ClusterError, NodeDescriptor, NodeInventory, NodeReadiness, NodeStatus};
use crate::config::ClusterConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Minimal Kubernetes API client covering node listing and node readiness.
pub struct KubeClient {
    base: Url,
    token: Option<String>,
    node_selector: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct Node {
    metadata: ObjectMeta,
    #[serde(default)]
    status: NodeStatusFields,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    creation_timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatusFields {
    #[serde(default)]
    addresses: Vec<NodeAddress>,
    #[serde(default)]
    conditions: Vec<NodeCondition>,
}

#[derive(Debug, Deserialize)]
struct NodeAddress {
    #[serde(rename = "type")]
    kind: String,
    address: String,
}

#[derive(Debug, Deserialize)]
struct NodeCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

impl Node {
    fn internal_ip(&self) -> Option<&str> {
        self.status
            .addresses
            .iter()
            .find(|a| a.kind == "InternalIP")
            .map(|a| a.address.as_str())
    }

    fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True")
    }

    fn age(&self, now: DateTime<Utc>) -> Result<Duration, ClusterError> {
        let raw = self
            .metadata
            .creation_timestamp
            .as_deref()
            .ok_or_else(|| ClusterError::InvalidTimestamp(String::new()))?;
        let created = DateTime::parse_from_rfc3339(raw)
            .map_err(|_| ClusterError::InvalidTimestamp(raw.to_string()))?
            .with_timezone(&Utc);

        // Clock skew can place creation in the future; treat that as brand new.
        Ok((now - created).to_std().unwrap_or(Duration::ZERO))
    }
}

impl KubeClient {
    pub fn new(
        base: Url,
        token: Option<String>,
        node_selector: impl Into<String>,
        timeout: Duration,
        insecure_skip_verify: bool,
    ) -> Result<Self, ClusterError> {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()?;

        Ok(Self {
            base,
            token,
            node_selector: node_selector.into(),
            client,
        })
    }

    /// Build a client from configuration, reading the bearer token from
    /// `token_file` when no inline token is set.
    pub async fn from_config(config: &ClusterConfig) -> Result<Option<Self>, ClusterError> {
        let Some(base) = config.api_server.clone() else {
            return Ok(None);
        };

        let token = match (&config.token, &config.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(path)) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ClusterError::Io {
                        path: path.display().to_string(),
                        source,
                    })?;
                Some(raw.trim().to_string())
            }
            (None, None) => None,
        };

        Self::new(
            base,
            token,
            config.node_selector.clone(),
            config.timeout(),
            config.insecure_skip_verify,
        )
        .map(Some)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClusterError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClusterError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.json::<T>().await?)
    }

    /// Append API path segments to the base URL, keeping any path prefix the
    /// API server is mounted under (e.g. a Rancher cluster proxy).
    fn api_url(&self, segments: &[&str]) -> Result<Url, ClusterError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClusterError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_node(&self, name: &str) -> Result<Node, ClusterError> {
        let url = self.api_url(&["api", "v1", "nodes", name])?;
        self.get_json(url).await
    }
}

#[async_trait]
impl NodeInventory for KubeClient {
    async fn nodes(&self) -> Result<Vec<NodeDescriptor>, ClusterError> {
        let mut url = self.api_url(&["api", "v1", "nodes"])?;
        url.query_pairs_mut()
            .append_pair("labelSelector", &self.node_selector);

        debug!(selector = %self.node_selector, "Listing cluster nodes");
        let list: NodeList = self.get_json(url).await?;

        list.items
            .iter()
            .map(|node| {
                let ip = node
                    .internal_ip()
                    .ok_or_else(|| ClusterError::MissingAddress(node.metadata.name.clone()))?;
                NodeDescriptor::parse(node.metadata.name.clone(), ip)
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "kubernetes"
    }
}

#[async_trait]
impl NodeReadiness for KubeClient {
    async fn node_status(&self, node: &str) -> Result<NodeStatus, ClusterError> {
        let node = self.get_node(node).await?;
        Ok(NodeStatus {
            ready: node.is_ready(),
            age: node.age(Utc::now())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn node_json(name: &str, ip: &str, created: &str, ready: &str) -> String {
        format!(
            r#"{{
                "metadata": {{"name": "{name}", "creationTimestamp": "{created}"}},
                "status": {{
                    "addresses": [
                        {{"type": "Hostname", "address": "{name}"}},
                        {{"type": "InternalIP", "address": "{ip}"}}
                    ],
                    "conditions": [
                        {{"type": "MemoryPressure", "status": "False"}},
                        {{"type": "Ready", "status": "{ready}"}}
                    ]
                }}
            }}"#
        )
    }

    fn client(server: &mockito::ServerGuard) -> KubeClient {
        KubeClient::new(
            Url::parse(&server.url()).unwrap(),
            Some("secret".into()),
            "node-role.kubernetes.io/worker=true",
            Duration::from_secs(2),
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_lists_worker_nodes() {
        let mut server = mockito::Server::new_async().await;
        let body = format!(
            r#"{{"items": [{}, {}]}}"#,
            node_json("worker-1", "10.0.0.1", "2024-01-01T00:00:00Z", "True"),
            node_json("worker-2", "10.0.0.2", "2024-01-01T00:00:00Z", "False"),
        );
        let mock = server
            .mock("GET", "/api/v1/nodes")
            .match_query(Matcher::UrlEncoded(
                "labelSelector".into(),
                "node-role.kubernetes.io/worker=true".into(),
            ))
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let nodes = client(&server).nodes().await.unwrap();
        mock.assert_async().await;

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "worker-1");
        assert_eq!(nodes[1].address.to_string(), "10.0.0.2");
    }

    #[tokio::test]
    async fn test_node_status_reports_ready_and_age() {
        let mut server = mockito::Server::new_async().await;
        let created = (Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
        let _mock = server
            .mock("GET", "/api/v1/nodes/worker-1")
            .with_status(200)
            .with_body(node_json("worker-1", "10.0.0.1", &created, "True"))
            .create_async()
            .await;

        let status = client(&server).node_status("worker-1").await.unwrap();
        assert!(status.ready);
        assert!(status.age >= Duration::from_secs(2 * 3600 - 60));
    }

    #[tokio::test]
    async fn test_node_status_not_ready() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/nodes/worker-2")
            .with_status(200)
            .with_body(node_json(
                "worker-2",
                "10.0.0.2",
                "2020-01-01T00:00:00Z",
                "Unknown",
            ))
            .create_async()
            .await;

        let status = client(&server).node_status("worker-2").await.unwrap();
        assert!(!status.ready);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/nodes/missing")
            .with_status(404)
            .create_async()
            .await;

        let err = client(&server).node_status("missing").await.unwrap_err();
        assert!(matches!(err, ClusterError::Status { status: 404, .. }));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_base_path_prefix_is_kept() {
        let mut server = mockito::Server::new_async().await;
        let created = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        let node_mock = server
            .mock("GET", "/k8s/clusters/c-1/api/v1/nodes/worker-1")
            .with_status(200)
            .with_body(node_json("worker-1", "10.0.0.1", &created, "True"))
            .create_async()
            .await;
        let list_mock = server
            .mock("GET", "/k8s/clusters/c-1/api/v1/nodes")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!(
                r#"{{"items": [{}]}}"#,
                node_json("worker-1", "10.0.0.1", &created, "True")
            ))
            .create_async()
            .await;

        let client = KubeClient::new(
            Url::parse(&format!("{}/k8s/clusters/c-1/", server.url())).unwrap(),
            None,
            "node-role.kubernetes.io/worker=true",
            Duration::from_secs(2),
            false,
        )
        .unwrap();

        assert!(client.node_status("worker-1").await.unwrap().ready);
        assert_eq!(client.nodes().await.unwrap().len(), 1);
        node_mock.assert_async().await;
        list_mock.assert_async().await;
    }

    #[test]
    fn test_api_url_without_prefix() {
        let client = KubeClient::new(
            Url::parse("https://10.43.0.1:6443").unwrap(),
            None,
            "node-role.kubernetes.io/worker=true",
            Duration::from_secs(2),
            false,
        )
        .unwrap();
        assert_eq!(
            client.api_url(&["api", "v1", "nodes", "worker-1"]).unwrap().as_str(),
            "https://10.43.0.1:6443/api/v1/nodes/worker-1"
        );
    }

    #[test]
    fn test_future_creation_is_zero_age() {
        let node: Node = serde_json::from_str(&node_json(
            "worker-3",
            "10.0.0.3",
            "2999-01-01T00:00:00Z",
            "True",
        ))
        .unwrap();
        assert_eq!(node.age(Utc::now()).unwrap(), Duration::ZERO);
    }
}
