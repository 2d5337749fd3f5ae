//! Configuration for the snapshot fetchers

use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::constants;
use crate::fetcher::RetryPolicy;

/// Fatal configuration problems, detected before any network call
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid address for {field}: '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be between 1 and {max}, got {value}")]
    InvalidWorkers {
        field: &'static str,
        value: usize,
        max: usize,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("page_size ({page_size}) exceeds page_ceiling ({page_ceiling})")]
    PageSizeAboveCeiling {
        page_size: usize,
        page_ceiling: usize,
    },

    #[error("No RPC endpoints configured")]
    NoRpcUrls,

    #[error("{0} not set (environment or [api_keys] in config.toml)")]
    MissingApiKey(&'static str),
}

// =============================================================================
// File-based Configuration (config.toml)
// =============================================================================

/// Configuration loaded from config.toml. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub paths: PathsSection,
    pub explorer: ExplorerSection,
    pub rpc: RpcSection,
    pub contracts: ContractsSection,
    pub fetch: FetchSection,
    pub resolver: ResolverSection,
    pub output: OutputSection,
    pub api_keys: ApiKeys,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// Caches and resume cursors
    pub data_dir: PathBuf,
    /// Published JSON/CSV snapshots
    pub output_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            output_dir: PathBuf::from("./output"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ExplorerSection {
    pub etherscan_url: String,
    pub routescan_url: String,
    pub page_size: usize,
    pub block_page_size: usize,
    pub page_ceiling: usize,
    pub page_delay_ms: u64,
}

impl Default for ExplorerSection {
    fn default() -> Self {
        Self {
            etherscan_url: constants::ETHERSCAN_V2_API.to_string(),
            routescan_url: constants::ROUTESCAN_API.to_string(),
            page_size: constants::EXPLORER_PAGE_SIZE,
            block_page_size: constants::BLOCK_PAGE_SIZE,
            page_ceiling: constants::PAGE_CEILING,
            page_delay_ms: constants::LIST_PAGE_DELAY_MS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    /// Tried in order until one answers
    pub urls: Vec<String>,
    pub log_window_blocks: u64,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            urls: constants::DEFAULT_RPC_URLS
                .iter()
                .map(|u| u.to_string())
                .collect(),
            log_window_blocks: constants::LOG_WINDOW_BLOCKS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ContractsSection {
    pub vedolo: String,
    pub dolo: String,
    pub odolo: String,
    pub odolo_vester: String,
    pub usdc_e: String,
    pub recoup_secondary_prefix: String,
}

impl Default for ContractsSection {
    fn default() -> Self {
        Self {
            vedolo: constants::VEDOLO_CONTRACT.to_string(),
            dolo: constants::DOLO_TOKEN.to_string(),
            odolo: constants::ODOLO_TOKEN.to_string(),
            odolo_vester: constants::ODOLO_VESTER.to_string(),
            usdc_e: constants::USDC_E_TOKEN.to_string(),
            recoup_secondary_prefix: constants::RECOUP_SECONDARY_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub rate_limit_base_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            max_attempts: constants::MAX_ATTEMPTS,
            retry_base_delay_ms: constants::RETRY_BASE_DELAY_MS,
            rate_limit_base_delay_ms: constants::RATE_LIMIT_BASE_DELAY_MS,
            request_timeout_secs: constants::REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ResolverSection {
    pub receipt_workers: usize,
    pub call_workers: usize,
    pub calls_per_batch: usize,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            receipt_workers: constants::RECEIPT_WORKERS,
            call_workers: constants::CALL_WORKERS,
            calls_per_batch: constants::CALLS_PER_BATCH,
            batch_size: constants::RESOLVER_BATCH_SIZE,
            batch_delay_ms: constants::RESOLVER_BATCH_DELAY_MS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// EIP-55 checksum addresses in published files. When false addresses stay lowercase.
    pub checksum_addresses: bool,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            checksum_addresses: true,
        }
    }
}

/// Fallback API keys, used only when the environment does not provide them
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub berascan: Option<String>,
    pub etherscan: Option<String>,
}

impl FileConfig {
    /// Load configuration from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Command-line overrides applied on top of config.toml
#[derive(Debug, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,

    pub etherscan_url: String,
    pub routescan_url: String,
    pub rpc_urls: Vec<String>,

    /// veDOLO voting escrow
    pub vedolo: Address,
    pub dolo: Address,
    pub odolo: Address,
    pub odolo_vester: Address,
    pub usdc_e: Address,
    /// Lowercase hex prefix of the secondary recoup recipient
    pub recoup_secondary_prefix: String,

    pub page_size: usize,
    pub block_page_size: usize,
    pub page_ceiling: usize,
    pub page_delay: Duration,
    pub log_window_blocks: u64,

    pub retry: RetryPolicy,
    pub request_timeout: Duration,

    pub receipt_workers: usize,
    pub call_workers: usize,
    pub calls_per_batch: usize,
    pub resolver_batch_size: usize,
    pub resolver_batch_delay: Duration,

    pub checksum_addresses: bool,

    berascan_api_key: Option<String>,
    etherscan_api_key: Option<String>,
}

impl Config {
    /// Build the runtime config from the file config, the environment and CLI overrides
    pub fn from_file(file: &FileConfig, overrides: Overrides) -> Result<Self, ConfigError> {
        Self::build(file, overrides, |name| std::env::var(name).ok())
    }

    fn build(
        file: &FileConfig,
        overrides: Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let contracts = &file.contracts;

        if file.rpc.urls.is_empty() {
            return Err(ConfigError::NoRpcUrls);
        }
        if file.explorer.page_size == 0 {
            return Err(ConfigError::Zero("explorer.page_size"));
        }
        if file.explorer.block_page_size == 0 {
            return Err(ConfigError::Zero("explorer.block_page_size"));
        }
        if file.explorer.page_size > file.explorer.page_ceiling {
            return Err(ConfigError::PageSizeAboveCeiling {
                page_size: file.explorer.page_size,
                page_ceiling: file.explorer.page_ceiling,
            });
        }
        if file.rpc.log_window_blocks == 0 {
            return Err(ConfigError::Zero("rpc.log_window_blocks"));
        }
        if file.fetch.max_attempts == 0 {
            return Err(ConfigError::Zero("fetch.max_attempts"));
        }
        if file.resolver.calls_per_batch == 0 {
            return Err(ConfigError::Zero("resolver.calls_per_batch"));
        }
        if file.resolver.batch_size == 0 {
            return Err(ConfigError::Zero("resolver.batch_size"));
        }

        Ok(Self {
            data_dir: overrides
                .data_dir
                .unwrap_or_else(|| file.paths.data_dir.clone()),
            output_dir: overrides
                .output_dir
                .unwrap_or_else(|| file.paths.output_dir.clone()),

            etherscan_url: file.explorer.etherscan_url.clone(),
            routescan_url: file.explorer.routescan_url.clone(),
            rpc_urls: file.rpc.urls.clone(),

            vedolo: parse_address("contracts.vedolo", &contracts.vedolo)?,
            dolo: parse_address("contracts.dolo", &contracts.dolo)?,
            odolo: parse_address("contracts.odolo", &contracts.odolo)?,
            odolo_vester: parse_address("contracts.odolo_vester", &contracts.odolo_vester)?,
            usdc_e: parse_address("contracts.usdc_e", &contracts.usdc_e)?,
            recoup_secondary_prefix: contracts.recoup_secondary_prefix.to_lowercase(),

            page_size: file.explorer.page_size,
            block_page_size: file.explorer.block_page_size,
            page_ceiling: file.explorer.page_ceiling,
            page_delay: Duration::from_millis(file.explorer.page_delay_ms),
            log_window_blocks: file.rpc.log_window_blocks,

            retry: RetryPolicy {
                max_attempts: file.fetch.max_attempts,
                base_delay: Duration::from_millis(file.fetch.retry_base_delay_ms),
                rate_limit_delay: Duration::from_millis(file.fetch.rate_limit_base_delay_ms),
            },
            request_timeout: Duration::from_secs(file.fetch.request_timeout_secs),

            receipt_workers: check_workers(
                "resolver.receipt_workers",
                file.resolver.receipt_workers,
            )?,
            call_workers: check_workers("resolver.call_workers", file.resolver.call_workers)?,
            calls_per_batch: file.resolver.calls_per_batch,
            resolver_batch_size: file.resolver.batch_size,
            resolver_batch_delay: Duration::from_millis(file.resolver.batch_delay_ms),

            checksum_addresses: file.output.checksum_addresses,

            berascan_api_key: pick_key(env("BERASCAN_API_KEY"), file.api_keys.berascan.as_ref()),
            etherscan_api_key: pick_key(env("ETHERSCAN_API_KEY"), file.api_keys.etherscan.as_ref()),
        })
    }

    /// Key for Etherscan V2 requests against Berachain.
    /// V2 keys are multichain, so the Etherscan key is accepted as an alternate.
    pub fn berachain_key(&self) -> Result<&str, ConfigError> {
        self.berascan_api_key
            .as_deref()
            .or(self.etherscan_api_key.as_deref())
            .ok_or(ConfigError::MissingApiKey("BERASCAN_API_KEY"))
    }

    /// Key for Etherscan V2 requests on any chain
    pub fn etherscan_key(&self) -> Option<&str> {
        self.etherscan_api_key.as_deref()
    }

    pub fn data_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    pub fn output_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, ConfigError> {
    Address::from_str(value.trim()).map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

fn check_workers(field: &'static str, value: usize) -> Result<usize, ConfigError> {
    if (1..=constants::MAX_WORKERS).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidWorkers {
            field,
            value,
            max: constants::MAX_WORKERS,
        })
    }
}

/// Environment wins over the file; blank values count as unset
fn pick_key(env_value: Option<String>, file_value: Option<&String>) -> Option<String> {
    env_value
        .filter(|k| !k.trim().is_empty())
        .or_else(|| file_value.filter(|k| !k.trim().is_empty()).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn test_config(toml_src: &str) -> Result<Config, ConfigError> {
        let file: FileConfig = toml::from_str(toml_src).unwrap();
        Config::build(&file, Overrides::default(), no_env)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = test_config("").unwrap();
        assert_eq!(config.page_size, constants::EXPLORER_PAGE_SIZE);
        assert_eq!(config.receipt_workers, constants::RECEIPT_WORKERS);
        assert_eq!(config.call_workers, constants::CALL_WORKERS);
        assert_eq!(config.rpc_urls.len(), constants::DEFAULT_RPC_URLS.len());
        assert_eq!(
            config.vedolo,
            Address::from_str(constants::VEDOLO_CONTRACT).unwrap()
        );
        assert!(config.checksum_addresses);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let config = test_config(
            r#"
            [resolver]
            receipt_workers = 2

            [output]
            checksum_addresses = false
            "#,
        )
        .unwrap();
        assert_eq!(config.receipt_workers, 2);
        assert_eq!(config.call_workers, constants::CALL_WORKERS);
        assert!(!config.checksum_addresses);
    }

    #[test]
    fn test_invalid_address_rejected() {
        let err = test_config(
            r#"
            [contracts]
            vedolo = "0x1234"
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidAddress {
                field: "contracts.vedolo",
                ..
            }
        ));
    }

    #[test]
    fn test_worker_bounds() {
        let err = test_config("[resolver]\nreceipt_workers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWorkers { value: 0, .. }));

        let err = test_config("[resolver]\ncall_workers = 9").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWorkers { value: 9, .. }));

        assert!(test_config("[resolver]\ncall_workers = 8").is_ok());
    }

    #[test]
    fn test_page_size_above_ceiling() {
        let err = test_config("[explorer]\npage_size = 20000").unwrap_err();
        assert!(matches!(err, ConfigError::PageSizeAboveCeiling { .. }));
    }

    #[test]
    fn test_empty_rpc_list_rejected() {
        assert_eq!(
            test_config("[rpc]\nurls = []").unwrap_err(),
            ConfigError::NoRpcUrls
        );
    }

    #[test]
    fn test_env_key_wins_over_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [api_keys]
            berascan = "from-file"
            "#,
        )
        .unwrap();
        let config = Config::build(&file, Overrides::default(), |name| {
            (name == "BERASCAN_API_KEY").then(|| "from-env".to_string())
        })
        .unwrap();
        assert_eq!(config.berachain_key().unwrap(), "from-env");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let config = test_config("").unwrap();
        assert_eq!(
            config.berachain_key().unwrap_err(),
            ConfigError::MissingApiKey("BERASCAN_API_KEY")
        );
        assert!(config.etherscan_key().is_none());
    }

    #[test]
    fn test_etherscan_key_serves_berachain() {
        let file: FileConfig = toml::from_str("[api_keys]\netherscan = \"multi\"").unwrap();
        let config = Config::build(&file, Overrides::default(), no_env).unwrap();
        assert_eq!(config.berachain_key().unwrap(), "multi");
    }

    #[test]
    fn test_blank_keys_ignored() {
        assert_eq!(pick_key(Some("  ".into()), None), None);
        assert_eq!(
            pick_key(Some(String::new()), Some(&"file".to_string())),
            Some("file".to_string())
        );
    }

    #[test]
    fn test_cli_overrides_paths() {
        let file = FileConfig::default();
        let config = Config::build(
            &file,
            Overrides {
                data_dir: Some(PathBuf::from("/tmp/cache")),
                output_dir: None,
            },
            no_env,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/cache"));
        assert_eq!(config.output_dir, PathBuf::from("./output"));
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(file.explorer.page_size, constants::EXPLORER_PAGE_SIZE);
    }
}
