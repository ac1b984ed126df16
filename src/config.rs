use serde::Deserialize;
use std::path::Path;

use crate::entity::label_store::Category;

pub const DEFAULT_CONFIG_PATH: &str = "stake-flow.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub staking_api: StakingApiConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
}

// ============================================================
// RPC
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_rpc_interval_ms")]
    pub request_interval_ms: u64,
    #[serde(default = "default_block_time_secs")]
    pub block_time_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoints: default_rpc_endpoints(),
            timeout_secs: default_timeout_secs(),
            request_interval_ms: default_rpc_interval_ms(),
            block_time_secs: default_block_time_secs(),
        }
    }
}

fn default_rpc_endpoints() -> Vec<String> {
    vec![
        "https://ethereum-rpc.publicnode.com".to_string(),
        "https://eth.llamarpc.com".to_string(),
    ]
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_rpc_interval_ms() -> u64 {
    250
}

fn default_block_time_secs() -> u64 {
    12
}

// ============================================================
// Log scanning
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct LogsConfig {
    /// Staking event emitter (StakingInfo on Ethereum mainnet by default).
    #[serde(default = "default_contract")]
    pub contract: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: u64,
    #[serde(default = "default_true")]
    pub resolve_timestamps: bool,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            contract: default_contract(),
            batch_size: default_batch_size(),
            min_batch_size: default_min_batch_size(),
            resolve_timestamps: true,
        }
    }
}

fn default_contract() -> String {
    "0xa59C847Bd5aC0172Ff4FE912C5d29E5A71A7512B".to_string()
}

fn default_batch_size() -> u64 {
    crate::indexer::fetcher::DEFAULT_BATCH_SIZE
}

fn default_min_batch_size() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

// ============================================================
// Block explorer
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ExplorerConfig {
    #[serde(default = "default_explorer_url")]
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_rpc_interval_ms")]
    pub request_interval_ms: u64,
    #[serde(default = "default_true")]
    pub use_for_block_lookup: bool,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            base_url: default_explorer_url(),
            api_key: None,
            chain_id: default_chain_id(),
            request_interval_ms: default_rpc_interval_ms(),
            use_for_block_lookup: true,
        }
    }
}

fn default_explorer_url() -> String {
    "https://api.etherscan.io/v2/api".to_string()
}

fn default_chain_id() -> u64 {
    1
}

// ============================================================
// Staking API
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct StakingApiConfig {
    #[serde(default = "default_staking_api_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u64,
    #[serde(default = "default_staking_interval_ms")]
    pub request_interval_ms: u64,
}

impl Default for StakingApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_staking_api_url(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            request_interval_ms: default_staking_interval_ms(),
        }
    }
}

fn default_staking_api_url() -> String {
    "https://staking-api.polygon.technology/api/v2".to_string()
}

fn default_page_size() -> u64 {
    100
}

fn default_max_pages() -> u64 {
    50
}

fn default_staking_interval_ms() -> u64 {
    100
}

// ============================================================
// Classification
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ClassificationConfig {
    #[serde(default = "default_category")]
    pub default_category: Category,
    pub exchange_wallets_path: Option<String>,
    pub labels_csv_path: Option<String>,
    #[serde(default)]
    pub manual_labels: Vec<ManualLabelConfig>,
    pub service_url: Option<String>,
    pub service_api_key: Option<String>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            default_category: default_category(),
            exchange_wallets_path: None,
            labels_csv_path: None,
            manual_labels: Vec::new(),
            service_url: None,
            service_api_key: None,
        }
    }
}

fn default_category() -> Category {
    crate::entity::classifier::DEFAULT_CATEGORY
}

#[derive(Debug, Deserialize, Clone)]
pub struct ManualLabelConfig {
    pub address: String,
    pub name: String,
    pub category: Category,
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults. Environment overrides
    /// are applied on top and the result is validated.
    pub fn load_or_default(path: &str) -> eyre::Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::load(path)?
        } else {
            tracing::info!(path, "No config file found, using defaults");
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// `RPC_URLS` (comma separated), `ETHERSCAN_API_KEY`, `LABEL_SERVICE_API_KEY`.
    pub fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(urls) = var("RPC_URLS") {
            let endpoints: Vec<String> = urls
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
            if !endpoints.is_empty() {
                self.rpc.endpoints = endpoints;
            }
        }
        if let Some(key) = var("ETHERSCAN_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.explorer.api_key = Some(key);
        }
        if let Some(key) = var("LABEL_SERVICE_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.classification.service_api_key = Some(key);
        }
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.rpc.endpoints.is_empty() {
            return Err(eyre::eyre!("At least one RPC endpoint must be configured"));
        }
        if self.rpc.block_time_secs == 0 {
            return Err(eyre::eyre!("rpc.block_time_secs must be positive"));
        }
        if !is_hex_address(&self.logs.contract) {
            return Err(eyre::eyre!(
                "Invalid staking contract address '{}'",
                self.logs.contract
            ));
        }
        if self.logs.min_batch_size == 0 {
            return Err(eyre::eyre!("logs.min_batch_size must be at least 1"));
        }
        if self.logs.batch_size < self.logs.min_batch_size {
            return Err(eyre::eyre!(
                "logs.batch_size ({}) is smaller than logs.min_batch_size ({})",
                self.logs.batch_size,
                self.logs.min_batch_size
            ));
        }
        for label in &self.classification.manual_labels {
            if !is_hex_address(&label.address) {
                return Err(eyre::eyre!(
                    "Invalid manual label address '{}' ({})",
                    label.address,
                    label.name
                ));
            }
        }
        Ok(())
    }
}

fn is_hex_address(value: &str) -> bool {
    value.len() == 42
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}
