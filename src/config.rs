//! Configuration loading.
//!
//! Settings come from an optional TOML file (default `./config/ti.toml`);
//! environment variables from the deployment always win:
//!
//! | Env | Key |
//! |-----|-----|
//! | `ES_URL` | `store.url` |
//! | `ES_API_KEY` | `store.api_key` |
//! | `KIBANA_URL` | `discovery.kibana_url` |
//! | `CLOUD_RUN_URL` | `auth.audience` |
//! | `PORT` | `server.bind` → `0.0.0.0:$PORT` |
//!
//! ```toml
//! [store]
//! url = "https://my-deployment.es.us-central1.gcp.cloud.es.io"
//! api_key = "..."
//! max_attempts = 3
//!
//! [ingest]
//! per_domain = 10
//!
//! [server]
//! bind = "0.0.0.0:8080"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_bulk_timeout_secs")]
    pub bulk_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_bulk_chunk_size")]
    pub bulk_chunk_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            bulk_timeout_secs: default_bulk_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            bulk_chunk_size: default_bulk_chunk_size(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_bulk_timeout_secs() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_bulk_chunk_size() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    /// Empty means the `daily_discovery` tool reports "not configured".
    #[serde(default)]
    pub kibana_url: String,
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    #[serde(default = "default_discovery_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            kibana_url: String::new(),
            agent_id: default_agent_id(),
            timeout_secs: default_discovery_timeout_secs(),
        }
    }
}

impl DiscoveryConfig {
    pub fn is_enabled(&self) -> bool {
        !self.kibana_url.trim().is_empty()
    }
}

fn default_agent_id() -> String {
    "terra-incognita".to_string()
}
fn default_discovery_timeout_secs() -> u64 {
    180
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_per_domain")]
    pub per_domain: usize,
    #[serde(default = "default_arxiv_url")]
    pub arxiv_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    #[serde(default = "default_num_retries")]
    pub num_retries: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            per_domain: default_per_domain(),
            arxiv_url: default_arxiv_url(),
            page_size: default_page_size(),
            delay_secs: default_delay_secs(),
            num_retries: default_num_retries(),
        }
    }
}

fn default_per_domain() -> usize {
    10
}
fn default_arxiv_url() -> String {
    "http://export.arxiv.org/api/query".to_string()
}
fn default_page_size() -> usize {
    50
}
fn default_delay_secs() -> u64 {
    3
}
fn default_num_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// Expected ID-token audience. Empty disables verification.
    #[serde(default)]
    pub audience: String,
}

impl AuthConfig {
    pub fn is_enabled(&self) -> bool {
        !self.audience.trim().is_empty()
    }
}

/// Reads `path` (if present), applies environment overrides, and validates.
pub fn load_config(path: &Path) -> Result<Config> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit environment lookup.
pub fn load_config_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config, lookup);
    validate(&config)?;
    Ok(config)
}

/// Applies deployment environment values on top of file settings.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty("ES_URL") {
        config.store.url = url;
    }
    if let Some(key) = non_empty("ES_API_KEY") {
        config.store.api_key = key;
    }
    if let Some(url) = non_empty("KIBANA_URL") {
        config.discovery.kibana_url = url;
    }
    if let Some(audience) = non_empty("CLOUD_RUN_URL") {
        config.auth.audience = audience;
    }
    if let Some(port) = non_empty("PORT") {
        config.server.bind = format!("0.0.0.0:{}", port.trim());
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.store.url.trim().is_empty() {
        anyhow::bail!("store.url must be set (or ES_URL)");
    }
    if config.store.api_key.trim().is_empty() {
        anyhow::bail!("store.api_key must be set (or ES_API_KEY)");
    }
    if config.store.max_attempts == 0 {
        anyhow::bail!("store.max_attempts must be >= 1");
    }
    if config.store.bulk_chunk_size == 0 {
        anyhow::bail!("store.bulk_chunk_size must be > 0");
    }
    if config.ingest.per_domain == 0 {
        anyhow::bail!("ingest.per_domain must be > 0");
    }
    if config.ingest.page_size == 0 {
        anyhow::bail!("ingest.page_size must be > 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.store.timeout_secs, 30);
        assert_eq!(cfg.store.bulk_timeout_secs, 120);
        assert_eq!(cfg.store.max_attempts, 3);
        assert_eq!(cfg.discovery.timeout_secs, 180);
        assert_eq!(cfg.ingest.per_domain, 10);
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert!(!cfg.auth.is_enabled());
        assert!(!cfg.discovery.is_enabled());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut cfg: Config = toml::from_str(
            r#"
[store]
url = "http://file:9200"
api_key = "file-key"
"#,
        )
        .unwrap();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("ES_URL", "http://env:9200"),
                ("PORT", "9090"),
                ("CLOUD_RUN_URL", "https://ti.run.app"),
                ("KIBANA_URL", ""),
            ]),
        );
        assert_eq!(cfg.store.url, "http://env:9200");
        assert_eq!(cfg.store.api_key, "file-key");
        assert_eq!(cfg.server.bind, "0.0.0.0:9090");
        assert_eq!(cfg.auth.audience, "https://ti.run.app");
        assert!(!cfg.discovery.is_enabled());
        validate(&cfg).unwrap();
    }

    #[test]
    fn test_example_config_parses() {
        let cfg: Config = toml::from_str(include_str!("../config/ti.example.toml")).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.ingest.page_size, 50);
        assert!(!cfg.auth.is_enabled());
    }

    #[test]
    fn test_validate_requires_store() {
        let cfg = Config::default();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("store.url"));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut cfg = Config::default();
        cfg.store.url = "http://localhost:9200".into();
        cfg.store.api_key = "k".into();
        cfg.store.max_attempts = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_load_missing_file_uses_env_only() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("absent.toml");

        let cfg = load_config_with(
            &path,
            env(&[("ES_URL", "http://env:9200"), ("ES_API_KEY", "env-key")]),
        )
        .unwrap();
        assert_eq!(cfg.store.url, "http://env:9200");
        assert_eq!(cfg.store.max_attempts, 3);

        let err = load_config_with(&path, env(&[])).unwrap_err();
        assert!(err.to_string().contains("store.url"));
    }

    #[test]
    fn test_load_file_then_env() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("ti.toml");
        std::fs::write(
            &path,
            r#"
[store]
url = "http://file:9200"
api_key = "file-key"
max_attempts = 5

[ingest]
per_domain = 4
"#,
        )
        .unwrap();

        let cfg = load_config_with(&path, env(&[("ES_API_KEY", "env-key")])).unwrap();
        assert_eq!(cfg.store.url, "http://file:9200");
        assert_eq!(cfg.store.api_key, "env-key");
        assert_eq!(cfg.store.max_attempts, 5);
        assert_eq!(cfg.ingest.per_domain, 4);
    }

    #[test]
    fn test_load_rejects_unparseable_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("ti.toml");
        std::fs::write(&path, "[store\nurl = ").unwrap();
        let err = load_config_with(&path, env(&[])).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }
}
