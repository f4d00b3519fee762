//! Node configuration loading and management.

use hoplink_core::ForwardingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Full configuration for the routing node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterConfig {
    /// The router's identity in the channel network.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Chain RPC endpoints and contract address books.
    #[serde(default)]
    pub chains: ChainsConfig,

    /// Forwarding policy.
    #[serde(default)]
    pub forwarding: ForwardingConfig,

    /// Channel node connection.
    #[serde(default)]
    pub engine: EngineConfig,

    /// API server settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metrics settings.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityConfig {
    /// Public identifier other participants route to.
    #[serde(default)]
    pub public_identifier: String,
    /// Signing address used in channel updates.
    #[serde(default)]
    pub signer_address: String,
}

/// Keys are chain ids in decimal.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChainsConfig {
    #[serde(default)]
    pub providers: BTreeMap<String, String>,
    #[serde(default)]
    pub contract_addresses: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the channel node's REST server.
    #[serde(default = "default_node_url")]
    pub node_url: String,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Buffered events before slow listeners start lagging.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API listen address.
    #[serde(default = "default_api_addr")]
    pub listen_addr: String,
    /// API port.
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Base URL the channel node posts event webhooks to.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the channel gauges are collected.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between channel gauge refreshes.
    #[serde(default = "default_collect_interval_secs")]
    pub collect_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_node_url() -> String {
    "http://127.0.0.1:8000".into()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_event_capacity() -> usize {
    1024
}
fn default_api_addr() -> String {
    "127.0.0.1".into()
}
fn default_api_port() -> u16 {
    8010
}
fn default_public_url() -> String {
    "http://127.0.0.1:8010".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_true() -> bool {
    true
}
fn default_collect_interval_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_url: default_node_url(),
            request_timeout_ms: default_request_timeout_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_api_addr(),
            port: default_api_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            collect_interval_secs: default_collect_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

pub const ENV_PUBLIC_IDENTIFIER: &str = "HOPLINK_PUBLIC_IDENTIFIER";
pub const ENV_SIGNER_ADDRESS: &str = "HOPLINK_SIGNER_ADDRESS";
pub const ENV_NODE_URL: &str = "HOPLINK_NODE_URL";
pub const ENV_CHAIN_PROVIDERS: &str = "HOPLINK_CHAIN_PROVIDERS";
pub const ENV_CONTRACT_ADDRESSES: &str = "HOPLINK_CONTRACT_ADDRESSES";
pub const ENV_LOG_LEVEL: &str = "HOPLINK_LOG_LEVEL";

impl RouterConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: RouterConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Override file values with `HOPLINK_*` environment variables.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = lookup(ENV_PUBLIC_IDENTIFIER) {
            self.identity.public_identifier = v;
        }
        if let Some(v) = lookup(ENV_SIGNER_ADDRESS) {
            self.identity.signer_address = v;
        }
        if let Some(v) = lookup(ENV_NODE_URL) {
            self.engine.node_url = v;
        }
        if let Some(v) = lookup(ENV_CHAIN_PROVIDERS) {
            self.chains.providers = serde_json::from_str(&v)
                .map_err(|e| anyhow::anyhow!("{ENV_CHAIN_PROVIDERS} is not a JSON object: {e}"))?;
        }
        if let Some(v) = lookup(ENV_CONTRACT_ADDRESSES) {
            self.chains.contract_addresses = serde_json::from_str(&v)
                .map_err(|e| anyhow::anyhow!("{ENV_CONTRACT_ADDRESSES} is not a JSON object: {e}"))?;
        }
        if let Some(v) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = v;
        }
        Ok(())
    }

    /// Reject configurations the node cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.identity.public_identifier.is_empty() {
            anyhow::bail!("identity.public_identifier is required");
        }
        if self.identity.signer_address.is_empty() {
            anyhow::bail!("identity.signer_address is required");
        }
        self.forwarding
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid forwarding config: {e}"))?;
        for (chain_id, url) in &self.chains.providers {
            chain_id
                .parse::<u64>()
                .map_err(|_| anyhow::anyhow!("chain id '{chain_id}' is not a number"))?;
            reqwest::Url::parse(url)
                .map_err(|e| anyhow::anyhow!("provider for chain {chain_id} is not a URL: {e}"))?;
        }
        reqwest::Url::parse(&self.engine.node_url)
            .map_err(|e| anyhow::anyhow!("engine.node_url is not a URL: {e}"))?;
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }
        Ok(())
    }

    pub fn api_socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(format!("{}:{}", self.api.listen_addr, self.api.port).parse()?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.request_timeout_ms)
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.metrics.collect_interval_secs)
    }
}
