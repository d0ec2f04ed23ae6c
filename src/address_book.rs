use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::bond::BondId;
use crate::network::NetworkId;

/// 20-byte account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AccountAddress([u8; 20]);

impl AccountAddress {
    pub const ZERO: AccountAddress = AccountAddress([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid address `{input}`: {reason}")]
pub struct AddressParseError {
    pub input: String,
    pub reason: String,
}

impl FromStr for AccountAddress {
    type Err = AddressParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| AddressParseError {
            input: value.to_string(),
            reason: reason.to_string(),
        };
        let digits = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .ok_or_else(|| invalid("missing 0x prefix"))?;
        let bytes = hex::decode(digits).map_err(|err| invalid(&err.to_string()))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| invalid("expected 20 bytes"))?;
        Ok(Self(bytes))
    }
}

impl Serialize for AccountAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccountAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Logical contracts the client talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContractName {
    TimeToken,
    MemoToken,
    MimToken,
    Staking,
    StakingHelper,
    Treasury,
    BondingCalculator,
    /// Reserve/protocol-token liquidity pair used for on-chain pricing.
    LiquidityPair,
    BondDepository(BondId),
    Reserve(BondId),
}

impl fmt::Display for ContractName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractName::TimeToken => write!(f, "time-token"),
            ContractName::MemoToken => write!(f, "memo-token"),
            ContractName::MimToken => write!(f, "mim-token"),
            ContractName::Staking => write!(f, "staking"),
            ContractName::StakingHelper => write!(f, "staking-helper"),
            ContractName::Treasury => write!(f, "treasury"),
            ContractName::BondingCalculator => write!(f, "bonding-calculator"),
            ContractName::LiquidityPair => write!(f, "liquidity-pair"),
            ContractName::BondDepository(bond) => write!(f, "bond-depository:{bond}"),
            ContractName::Reserve(bond) => write!(f, "reserve:{bond}"),
        }
    }
}

/// Depository and reserve asset for one bond type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondAddresses {
    pub id: BondId,
    pub depository: AccountAddress,
    pub reserve: AccountAddress,
}

/// Fixed deployment addresses on one network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddresses {
    pub time_token: AccountAddress,
    pub memo_token: AccountAddress,
    pub mim_token: AccountAddress,
    pub staking: AccountAddress,
    pub staking_helper: AccountAddress,
    pub treasury: AccountAddress,
    pub bonding_calculator: AccountAddress,
    pub liquidity_pair: AccountAddress,
    #[serde(default)]
    pub bonds: Vec<BondAddresses>,
}

impl NetworkAddresses {
    pub fn resolve(&self, name: ContractName) -> Option<AccountAddress> {
        match name {
            ContractName::TimeToken => Some(self.time_token),
            ContractName::MemoToken => Some(self.memo_token),
            ContractName::MimToken => Some(self.mim_token),
            ContractName::Staking => Some(self.staking),
            ContractName::StakingHelper => Some(self.staking_helper),
            ContractName::Treasury => Some(self.treasury),
            ContractName::BondingCalculator => Some(self.bonding_calculator),
            ContractName::LiquidityPair => Some(self.liquidity_pair),
            ContractName::BondDepository(bond) => self.bond(bond).map(|entry| entry.depository),
            ContractName::Reserve(bond) => self.bond(bond).map(|entry| entry.reserve),
        }
    }

    pub fn bond(&self, bond: BondId) -> Option<&BondAddresses> {
        self.bonds.iter().find(|entry| entry.id == bond)
    }
}

/// Address-book rows per network as they appear in configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressBookConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_chain: Option<NetworkAddresses>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub testnet: Option<NetworkAddresses>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mainnet: Option<NetworkAddresses>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AddressBookError {
    #[error("no deployment configured for network {0}")]
    UnknownNetwork(NetworkId),
    #[error("contract {name} is not deployed on network {network}")]
    MissingContract {
        network: NetworkId,
        name: ContractName,
    },
}

/// Pure lookup of deployment addresses by network.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressBook {
    config: AddressBookConfig,
}

impl AddressBook {
    pub fn new(config: AddressBookConfig) -> Self {
        Self { config }
    }

    pub fn network(&self, network: NetworkId) -> Result<&NetworkAddresses, AddressBookError> {
        let row = match network {
            NetworkId::TargetChain => self.config.target_chain.as_ref(),
            NetworkId::Testnet => self.config.testnet.as_ref(),
            NetworkId::Mainnet => self.config.mainnet.as_ref(),
            NetworkId::Unknown => None,
        };
        row.ok_or(AddressBookError::UnknownNetwork(network))
    }

    pub fn has_network(&self, network: NetworkId) -> bool {
        self.network(network).is_ok()
    }

    pub fn resolve(
        &self,
        network: NetworkId,
        name: ContractName,
    ) -> Result<AccountAddress, AddressBookError> {
        self.network(network)?
            .resolve(name)
            .ok_or(AddressBookError::MissingContract { network, name })
    }

    /// Address of the reserve asset deposited into `bond`.
    pub fn address_for_asset(
        &self,
        bond: BondId,
        network: NetworkId,
    ) -> Result<AccountAddress, AddressBookError> {
        self.resolve(network, ContractName::Reserve(bond))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn address(byte: u8) -> AccountAddress {
        AccountAddress::new([byte; 20])
    }

    pub fn network_addresses() -> NetworkAddresses {
        NetworkAddresses {
            time_token: address(0x11),
            memo_token: address(0x12),
            mim_token: address(0x13),
            staking: address(0x14),
            staking_helper: address(0x15),
            treasury: address(0x16),
            bonding_calculator: address(0x17),
            liquidity_pair: address(0x18),
            bonds: vec![
                BondAddresses {
                    id: BondId::Mim,
                    depository: address(0x21),
                    reserve: address(0x13),
                },
                BondAddresses {
                    id: BondId::MimTimeLp,
                    depository: address(0x22),
                    reserve: address(0x18),
                },
            ],
        }
    }

    pub fn address_book() -> AddressBook {
        AddressBook::new(AddressBookConfig {
            target_chain: Some(network_addresses()),
            testnet: Some(network_addresses()),
            mainnet: None,
        })
    }
}
