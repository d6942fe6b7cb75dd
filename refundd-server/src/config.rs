//! TOML file configuration structures.
//!
//! These structs directly map to the `refundd-config.toml` file format.

use refundd_core::config::EngineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub engine: EngineSection,
    pub indexer: IndexerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    pub refund: RefundSection,
    #[serde(default)]
    pub webhook: Option<WebhookSection>,
}

/// Engine configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// The script address watched for incoming deposits.
    pub deposit_address: String,
    /// Exact deposit amount in lovelace.
    #[serde(default = "default_required_amount")]
    pub required_amount: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_tx_age_secs")]
    pub max_tx_age_secs: u64,
    #[serde(default = "default_circuit_cooldown_secs")]
    pub circuit_cooldown_secs: u64,
}

fn default_required_amount() -> u64 {
    2_000_000
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_tx_age_secs() -> u64 {
    3600
}

fn default_circuit_cooldown_secs() -> u64 {
    300
}

/// Chain indexer section.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerSection {
    /// Base URL of the Blockfrost-compatible API.
    pub base_url: Url,
    /// Static API key sent with every request.
    pub api_key: String,
}

/// Local ledger database section.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./refundd.sqlite")
}

/// Refund submission section: the wallet service that builds, signs and
/// submits refund transactions on our behalf.
#[derive(Debug, Clone, Deserialize)]
pub struct RefundSection {
    pub wallet_url: Url,
}

/// Optional deposit webhook section.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSection {
    pub url: Url,
}

impl FileConfig {
    /// Load and parse the config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Map the engine section onto the core config.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(self.engine.deposit_address.clone());
        config.required_amount = self.engine.required_amount;
        config.poll_interval = Duration::from_secs(self.engine.poll_interval_secs);
        config.max_tx_age = Duration::from_secs(self.engine.max_tx_age_secs);
        config.circuit_cooldown = Duration::from_secs(self.engine.circuit_cooldown_secs);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing_with_defaults() {
        let toml_str = r#"
[engine]
deposit_address = "addr1_watched_script"

[indexer]
base_url = "https://cardano-mainnet.blockfrost.io/api/v0/"
api_key = "mainnet_key"

[refund]
wallet_url = "https://wallet.internal/refunds"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.deposit_address, "addr1_watched_script");
        assert_eq!(config.engine.required_amount, 2_000_000);
        assert_eq!(config.engine.poll_interval_secs, 30);
        assert_eq!(config.engine.max_tx_age_secs, 3600);
        assert_eq!(config.engine.circuit_cooldown_secs, 300);
        assert_eq!(config.database.path, PathBuf::from("./refundd.sqlite"));
        assert!(config.webhook.is_none());
    }

    #[test]
    fn test_config_parsing_full() {
        let toml_str = r#"
[engine]
deposit_address = "addr1_watched_script"
required_amount = 5000000
poll_interval_secs = 10
max_tx_age_secs = 600
circuit_cooldown_secs = 60

[indexer]
base_url = "https://cardano-preprod.blockfrost.io/api/v0/"
api_key = "preprod_key"

[database]
path = "/var/lib/refundd/ledger.sqlite"

[refund]
wallet_url = "https://wallet.internal/refunds"

[webhook]
url = "https://example.com/hooks/deposit"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        let engine = config.engine_config();
        assert_eq!(engine.required_amount, 5_000_000);
        assert_eq!(engine.poll_interval, Duration::from_secs(10));
        assert_eq!(engine.max_tx_age, Duration::from_secs(600));
        assert_eq!(engine.circuit_cooldown, Duration::from_secs(60));
        assert!(config.webhook.is_some());
    }
}
