use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Blocks between two staking rebases.
pub const EPOCH_INTERVAL: u64 = 2_200;
/// Average block production interval used for countdown estimates.
pub const BLOCK_RATE_SECONDS: f64 = 13.14;
/// Decimals of the protocol token and its staked representation.
pub const TOKEN_DECIMALS: u32 = 9;
/// Decimals of the reserve stablecoin.
pub const RESERVE_DECIMALS: u32 = 18;

/// Closed set of chains the client knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkId {
    Unknown,
    Mainnet,
    Testnet,
    TargetChain,
}

impl NetworkId {
    pub const DEFAULT: NetworkId = NetworkId::TargetChain;

    pub fn from_chain_id(chain_id: u64) -> Self {
        match chain_id {
            1 => NetworkId::Mainnet,
            4 => NetworkId::Testnet,
            43_114 => NetworkId::TargetChain,
            _ => NetworkId::Unknown,
        }
    }

    pub fn chain_id(self) -> u64 {
        match self {
            NetworkId::Unknown => 0,
            NetworkId::Mainnet => 1,
            NetworkId::Testnet => 4,
            NetworkId::TargetChain => 43_114,
        }
    }

    /// Whether a wallet session may be established on this network.
    pub fn is_supported(self) -> bool {
        matches!(self, NetworkId::TargetChain | NetworkId::Testnet)
    }

    pub fn label(self) -> &'static str {
        match self {
            NetworkId::Unknown => "unknown",
            NetworkId::Mainnet => "mainnet",
            NetworkId::Testnet => "testnet",
            NetworkId::TargetChain => "target-chain",
        }
    }
}

impl Default for NetworkId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.chain_id())
    }
}

impl FromStr for NetworkId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unknown" => Ok(NetworkId::Unknown),
            "mainnet" => Ok(NetworkId::Mainnet),
            "testnet" => Ok(NetworkId::Testnet),
            "target-chain" => Ok(NetworkId::TargetChain),
            other => other
                .parse::<u64>()
                .map(NetworkId::from_chain_id)
                .map_err(|_| format!("unknown network `{other}`")),
        }
    }
}

/// First block of the next rebase epoch.
pub fn next_rebase_block(current_block: u64) -> u64 {
    current_block + EPOCH_INTERVAL - (current_block % EPOCH_INTERVAL)
}

/// Estimated wall-clock time until `end_block`, zero once it has passed.
pub fn seconds_until_block(start_block: u64, end_block: u64) -> Duration {
    let blocks = end_block.saturating_sub(start_block);
    Duration::from_secs_f64(blocks as f64 * BLOCK_RATE_SECONDS)
}
