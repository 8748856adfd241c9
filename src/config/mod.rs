// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use config::{Environment, File, Map};
use std::path::Path;

/// Environment variables override file settings, e.g. `LB_DEBUG=true` or
/// `LB_HEALTH_CHECK__INTERVAL_SECS=10`.
pub const ENV_PREFIX: &str = "LB";

/// Load configuration from an optional file (YAML or JSON) layered under the
/// environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    load_layered(path.as_ref(), None)
}

/// `env` replaces the process environment when set.
fn load_layered(path: &Path, env: Option<Map<String, String>>) -> Result<Config> {
    let settings = config::Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        )
        .build()
        .context("Failed to read configuration sources")?;

    let config: Config = settings
        .try_deserialize()
        .context("Failed to parse configuration")?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "kube-tcp-balancer-{}-{}",
            std::process::id(),
            name
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.frontend_http_port, 80);
        assert_eq!(config.frontend_https_port, 443);
        assert_eq!(config.metrics.port, 9099);
        assert_eq!(config.health_check.interval_secs, 5);
        assert_eq!(config.health_check.path, "/healthz");
        assert_eq!(config.health_check.unhealthy_threshold, 1);
        assert_eq!(
            config.health_check.new_node_threshold(),
            std::time::Duration::from_secs(15 * 60)
        );
        assert!(!config.proxy.pool.enabled);
        assert!(config.proxy.max_connections.is_none());
    }

    #[test]
    fn test_default_config_requires_inventory() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("no node inventory"));
    }

    #[test]
    fn test_load_yaml_file() {
        let path = write_temp(
            "config.yaml",
            r#"
frontend_http_port: 8080
health_check:
  interval_secs: 2
  port: 10254
proxy:
  idle_timeout_secs: 0
  pool:
    enabled: true
backends:
  - name: node-a
    address: "10.0.0.1:80"
  - name: node-b
    address: "10.0.0.2"
"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.frontend_http_port, 8080);
        assert_eq!(config.frontend_https_port, 443);
        assert_eq!(config.health_check.interval_secs, 2);
        assert_eq!(config.health_check.port, 10254);
        assert!(config.proxy.idle_timeout().is_none());
        assert!(config.proxy.pool.enabled);
        assert_eq!(config.backends.len(), 2);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_environment_overrides_file() {
        let path = write_temp(
            "env-override.yaml",
            r#"
debug: false
health_check:
  interval_secs: 2
  port: 10254
backends:
  - name: node-a
    address: "10.0.0.1"
"#,
        );

        let env: Map<String, String> = [
            ("LB_HEALTH_CHECK__INTERVAL_SECS", "9"),
            ("LB_DEBUG", "true"),
            ("LB_PROXY__POOL__ENABLED", "true"),
            ("OTHER_HEALTH_CHECK__PORT", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = load_layered(&path, Some(env)).unwrap();
        assert_eq!(config.health_check.interval_secs, 9);
        assert_eq!(config.health_check.port, 10254);
        assert!(config.debug);
        assert!(config.proxy.pool.enabled);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_rejects_zero_interval() {
        let mut config = Config::default();
        config.backends.push(BackendConfig {
            name: "node-a".into(),
            address: "10.0.0.1".into(),
        });
        config.health_check.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_health_path() {
        let mut config = Config::default();
        config.inventory_file = Some("nodes.yaml".into());
        config.health_check.path = "healthz".into();
        assert!(config.validate().is_err());
    }
}
