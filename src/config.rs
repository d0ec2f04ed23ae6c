use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address_book::{AddressBook, AddressBookConfig};
use crate::bond::BondId;
use crate::network::NetworkId;

const DEFAULT_MAINNET_RPC: &str = "https://api.avax.network/ext/bc/C/rpc";
const DEFAULT_TESTNET_RPC: &str = "https://rinkeby.infura.io/v3/";
const DEFAULT_BLOCK_POLL_INTERVAL_MS: u64 = 13_000;
const MIN_BLOCK_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_SLIPPAGE_BPS: u32 = 50;
const MAX_SLIPPAGE_BPS: u32 = 10_000;
const DEFAULT_ORACLE_ENDPOINT: &str = "https://min-api.cryptocompare.com/data/price";
const DEFAULT_RESERVE_SYMBOL: &str = "MIM";
const DEFAULT_ORACLE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{label}: {message}")]
    Parse { label: String, message: String },
    #[error("{label}: unknown configuration key(s): {}", keys.join(", "))]
    UnknownKeys { label: String, keys: Vec<String> },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Client configuration as read from TOML.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub network: NetworkConfig,
    pub sync: SyncConfig,
    pub bonds: BondsConfig,
    pub oracle: OracleConfig,
    pub logging: LoggingConfig,
    pub address_book: AddressBookConfig,
}

/// Network selection and RPC endpoints used for read-only access.
///
/// The crate does not open RPC connections itself; the embedder's
/// [`ReadProviderFactory`](crate::contracts::ReadProviderFactory) builds its
/// transports from [`NetworkConfig::rpc_uri`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network used while no wallet is connected.
    pub default_network: NetworkId,
    pub mainnet_rpc: String,
    pub testnet_rpc: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_network: NetworkId::DEFAULT,
            mainnet_rpc: DEFAULT_MAINNET_RPC.to_string(),
            testnet_rpc: DEFAULT_TESTNET_RPC.to_string(),
        }
    }
}

impl NetworkConfig {
    /// RPC endpoint serving `network`; the target chain uses the mainnet URI.
    pub fn rpc_uri(&self, network: NetworkId) -> &str {
        match network {
            NetworkId::Testnet => &self.testnet_rpc,
            _ => &self.mainnet_rpc,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Refresh metrics and bonds whenever a new block is observed.
    pub watch_blocks: bool,
    pub block_poll_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watch_blocks: true,
            block_poll_interval_ms: DEFAULT_BLOCK_POLL_INTERVAL_MS,
        }
    }
}

impl SyncConfig {
    pub fn block_poll_interval(&self) -> Duration {
        Duration::from_millis(self.block_poll_interval_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BondsConfig {
    /// Bonds that may be quoted, bought and redeemed.
    pub enabled: Vec<BondId>,
    pub default_slippage_bps: u32,
}

impl Default for BondsConfig {
    fn default() -> Self {
        Self {
            enabled: vec![BondId::Mim],
            default_slippage_bps: DEFAULT_SLIPPAGE_BPS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    pub endpoint: String,
    /// Symbol of the reserve stablecoin priced through the oracle.
    pub reserve_symbol: String,
    pub timeout_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ORACLE_ENDPOINT.to_string(),
            reserve_symbol: DEFAULT_RESERVE_SYMBOL.to_string(),
            timeout_ms: DEFAULT_ORACLE_TIMEOUT_MS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            json: false,
        }
    }
}

/// Deserialize TOML, rejecting keys that no field consumes.
pub fn parse_strict<T: DeserializeOwned>(content: &str, label: &str) -> Result<T, ConfigError> {
    let mut unknown_keys = Vec::new();
    let deserializer = toml::de::Deserializer::new(content);

    let value = serde_ignored::deserialize(deserializer, |path| {
        unknown_keys.push(path.to_string());
    })
    .map_err(|err| ConfigError::Parse {
        label: label.to_string(),
        message: err.to_string(),
    })?;

    if !unknown_keys.is_empty() {
        return Err(ConfigError::UnknownKeys {
            label: label.to_string(),
            keys: unknown_keys,
        });
    }

    Ok(value)
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("unable to read client config {}", path.display()))?;
        let label = path.display().to_string();
        let config = Self::from_toml(&content, &label)?;
        Ok(config)
    }

    pub fn from_toml(content: &str, label: &str) -> Result<Self, ConfigError> {
        let config: Self = parse_strict(content, label)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let default_network = self.network.default_network;
        if !default_network.is_supported() {
            return Err(ConfigError::Invalid(format!(
                "network.default_network {default_network} is not a supported network"
            )));
        }
        if self.sync.block_poll_interval_ms < MIN_BLOCK_POLL_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "sync.block_poll_interval_ms must be at least {MIN_BLOCK_POLL_INTERVAL_MS}"
            )));
        }
        let slippage = self.bonds.default_slippage_bps;
        if slippage == 0 || slippage > MAX_SLIPPAGE_BPS {
            return Err(ConfigError::Invalid(format!(
                "bonds.default_slippage_bps must be within 1..={MAX_SLIPPAGE_BPS}, got {slippage}"
            )));
        }
        if self.bonds.enabled.is_empty() {
            return Err(ConfigError::Invalid(
                "bonds.enabled must list at least one bond".into(),
            ));
        }
        if self.oracle.reserve_symbol.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "oracle.reserve_symbol must not be empty".into(),
            ));
        }

        let book = self.address_book();
        let deployment = book.network(default_network).map_err(|_| {
            ConfigError::Invalid(format!(
                "address_book has no deployment for default network {default_network}"
            ))
        })?;
        for bond in &self.bonds.enabled {
            if deployment.bond(*bond).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "enabled bond {bond} has no address_book entry on {default_network}"
                )));
            }
        }
        Ok(())
    }

    pub fn address_book(&self) -> AddressBook {
        AddressBook::new(self.address_book.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT: &str = r#"
[address_book.target_chain]
time_token = "0x1111111111111111111111111111111111111111"
memo_token = "0x1212121212121212121212121212121212121212"
mim_token = "0x1313131313131313131313131313131313131313"
staking = "0x1414141414141414141414141414141414141414"
staking_helper = "0x1515151515151515151515151515151515151515"
treasury = "0x1616161616161616161616161616161616161616"
bonding_calculator = "0x1717171717171717171717171717171717171717"
liquidity_pair = "0x1818181818181818181818181818181818181818"

[[address_book.target_chain.bonds]]
id = "mim"
depository = "0x2121212121212121212121212121212121212121"
reserve = "0x1313131313131313131313131313131313131313"
"#;

    #[test]
    fn defaults_apply_to_omitted_sections() {
        let config = ClientConfig::from_toml(DEPLOYMENT, "inline").expect("config");
        assert_eq!(config.network.default_network, NetworkId::TargetChain);
        assert_eq!(config.bonds.enabled, vec![BondId::Mim]);
        assert_eq!(config.bonds.default_slippage_bps, 50);
        assert_eq!(config.oracle.reserve_symbol, "MIM");
        assert_eq!(config.sync.block_poll_interval(), Duration::from_secs(13));
        assert!(config.address_book().has_network(NetworkId::TargetChain));
    }

    #[test]
    fn unknown_keys_are_reported_with_their_path() {
        let content = format!("{DEPLOYMENT}\n[sync]\npoll_every = 3\n");
        let err = ClientConfig::from_toml(&content, "inline").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unknown configuration key"), "{message}");
        assert!(message.contains("sync.poll_every"), "{message}");
    }

    #[test]
    fn malformed_addresses_fail_to_parse() {
        let content = DEPLOYMENT.replace(
            "0x1414141414141414141414141414141414141414",
            "0x1414",
        );
        let err = ClientConfig::from_toml(&content, "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let cases = [
            "[bonds]\ndefault_slippage_bps = 0\n",
            "[bonds]\ndefault_slippage_bps = 10001\n",
            "[bonds]\nenabled = []\n",
            "[bonds]\nenabled = [\"mim_time_lp\"]\n",
            "[sync]\nblock_poll_interval_ms = 250\n",
            "[network]\ndefault_network = \"mainnet\"\n",
        ];
        for case in cases {
            let content = format!("{case}{DEPLOYMENT}");
            let err = ClientConfig::from_toml(&content, "inline").unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{case}: {err}");
        }
    }

    #[test]
    fn missing_deployment_is_invalid() {
        let err = ClientConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("no deployment"), "{err}");
    }

    #[test]
    fn rpc_uri_follows_network() {
        let network = NetworkConfig::default();
        assert_eq!(network.rpc_uri(NetworkId::Testnet), DEFAULT_TESTNET_RPC);
        assert_eq!(network.rpc_uri(NetworkId::TargetChain), DEFAULT_MAINNET_RPC);
    }
}
