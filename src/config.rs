//! Configuration management for the transaction client
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Capacity of the request and response queues when none is configured
pub const DEFAULT_MSG_BUFFER: usize = 1024;

/// How long a tracked message may sit idle before it is forgotten
pub const DEFAULT_MESSAGE_RETENTION_SECS: u64 = 3600;

pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 60_000;

lazy_static! {
    static ref ENV_VAR: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid");
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub client: ClientConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub nonce: NonceConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Capacity of both the inbound request and outbound response queues
    pub queue_capacity: usize,
    pub receipt_poll_interval_ms: u64,
    pub confirmations: u64,
    pub receipt_timeout_secs: u64,
    /// Tracked messages idle for longer than this are pruned
    pub message_retention_secs: u64,
    pub cleanup_interval_ms: u64,
}

impl ClientConfig {
    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn message_retention(&self) -> chrono::Duration {
        // chrono caps durations at i64::MAX milliseconds
        let secs = i64::try_from(self.message_retention_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_MSG_BUFFER,
            receipt_poll_interval_ms: 500,
            confirmations: 1,
            receipt_timeout_secs: 60,
            message_retention_secs: DEFAULT_MESSAGE_RETENTION_SECS,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_urls: Vec<String>,
    /// Expected chain ID; checked against the node on connect when set
    pub chain_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Name of the environment variable holding a hex private key
    pub private_key_env: Option<String>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: Some("TXCLIENT_PRIVATE_KEY".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    pub source: NonceSourceKind,
    /// Persist allocated nonces to this JSON file instead of memory
    pub storage_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NonceSourceKind {
    #[default]
    Pending,
    Latest,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Transfers scheduled by the runner binary
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub count: usize,
    pub recipient: Option<String>,
    pub value_wei: u64,
}

impl Settings {
    /// Load settings from the file named by `EVM_TXCLIENT_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("EVM_TXCLIENT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("No RPC URLs configured");
        }

        if self.client.queue_capacity == 0 {
            anyhow::bail!("client.queue_capacity must be greater than zero");
        }

        if self.client.cleanup_interval_ms == 0 {
            anyhow::bail!("client.cleanup_interval_ms must be greater than zero");
        }

        if self.batch.count > 0 && self.batch.recipient.is_none() {
            anyhow::bail!("batch.recipient is required when batch.count is set");
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            tracing::warn!("Metrics enabled on port 0 - an ephemeral port will be used");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TXCLIENT_TEST_VAR", "test_value");
        let input = "url = \"https://rpc.example.com/${TXCLIENT_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://rpc.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::parse(
            r#"
            [chain]
            rpc_urls = ["http://localhost:8545"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.client.queue_capacity, DEFAULT_MSG_BUFFER);
        assert_eq!(settings.nonce.source, NonceSourceKind::Pending);
        assert!(settings.nonce.storage_path.is_none());
        assert_eq!(settings.client.receipt_poll_interval(), Duration::from_millis(500));
        assert!(!settings.metrics.enabled);
        assert_eq!(settings.client.message_retention(), chrono::Duration::hours(1));
        assert_eq!(settings.client.cleanup_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_missing_rpc_urls() {
        let err = Settings::parse(
            r#"
            [chain]
            rpc_urls = []
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("RPC"));
    }

    #[test]
    fn test_rejects_zero_queue_capacity() {
        let result = Settings::parse(
            r#"
            [client]
            queue_capacity = 0

            [chain]
            rpc_urls = ["http://localhost:8545"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_cleanup_interval() {
        let result = Settings::parse(
            r#"
            [client]
            cleanup_interval_ms = 0

            [chain]
            rpc_urls = ["http://localhost:8545"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_latest_nonce_source() {
        let settings = Settings::parse(
            r#"
            [chain]
            rpc_urls = ["http://localhost:8545"]
            chain_id = 31337

            [nonce]
            source = "latest"
            storage_path = "/tmp/nonces.json"
            "#,
        )
        .unwrap();

        assert_eq!(settings.chain.chain_id, Some(31337));
        assert_eq!(settings.nonce.source, NonceSourceKind::Latest);
        assert_eq!(
            settings.nonce.storage_path,
            Some(PathBuf::from("/tmp/nonces.json"))
        );
    }
}
